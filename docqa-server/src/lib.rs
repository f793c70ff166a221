//! HTTP API for the docqa question answering pipeline.
//!
//! Routes live under `/api/v1`: `POST /query`, `GET /health` (liveness),
//! `GET /ready` (dependency readiness), `GET /info` and `GET /models`.
//! Every response carries an `X-Correlation-ID` header.

pub mod correlation;
pub mod error;
pub mod server;

pub use correlation::{CORRELATION_HEADER, CorrelationId};
pub use error::ApiError;
pub use server::{AppState, QueryRequest, SERVICE_NAME, ServerConfig, app_router, run_server};
