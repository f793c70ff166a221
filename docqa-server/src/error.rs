use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use docqa_rag::QueryError;
use serde_json::json;

pub const UNAVAILABLE_DETAIL: &str = "Service temporarily unavailable. Please try again later.";
pub const INTERNAL_DETAIL: &str = "An internal error occurred while processing your request.";

/// An error rendered as `{"detail": "..."}`. Internal error text is never
/// included in the body.
#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(String),
    Unavailable,
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::InvalidRequest(message) => format!("Invalid request: {message}"),
            Self::Unavailable => UNAVAILABLE_DETAIL.to_string(),
            Self::Internal => INTERNAL_DETAIL.to_string(),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::InvalidRequest(message) => Self::InvalidRequest(message),
            QueryError::DependencyUnavailable { .. } => Self::Unavailable,
            QueryError::Internal(_) => Self::Internal,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.detail() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_errors_map_to_statuses() {
        let invalid = ApiError::from(QueryError::InvalidRequest("question must not be empty".into()));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.detail(), "Invalid request: question must not be empty");

        let unavailable = ApiError::from(QueryError::DependencyUnavailable {
            dependency: "embeddings",
            message: "connection refused at 10.1.2.3".into(),
        });
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!unavailable.detail().contains("10.1.2.3"));

        let internal = ApiError::from(QueryError::Internal("dimension mismatch".into()));
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.detail(), INTERNAL_DETAIL);
    }
}
