//! Prompt assembly from retrieved chunks.

use serde_json::Value;

use crate::document::RetrievedChunk;

/// Context text used when no chunks were retrieved.
pub const EMPTY_CONTEXT: &str = "No relevant documents found.";

/// Question-answering template with `{context}` and `{question}` slots.
pub const PROMPT_TEMPLATE: &str = "You are a helpful AI assistant that answers questions based on the provided context.

Context information:
{context}

Question: {question}

Please provide a comprehensive answer based on the context information. If the context doesn't contain enough information to answer the question, say so. Be accurate and helpful in your response.

Answer:";

/// Render chunks as numbered context blocks.
///
/// Each block is `Document {i}:`, the chunk text, an optional
/// `Source: k: v, ...` line of non-null metadata, and a blank line.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    let mut parts = Vec::with_capacity(chunks.len() * 4);
    for (i, chunk) in chunks.iter().enumerate() {
        parts.push(format!("Document {}:", i + 1));
        parts.push(chunk.text.clone());

        let source = std::iter::once(("document_name", chunk.document_name.clone()))
            .chain(chunk.metadata.iter().filter_map(|(k, v)| render_value(v).map(|v| (k.as_str(), v))))
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("Source: {source}"));

        parts.push(String::new());
    }
    parts.join("\n")
}

/// Fill [`PROMPT_TEMPLATE`] with the rendered context and the question.
///
/// Slots are filled in one pass so braces in the question or the documents
/// are never expanded.
pub fn build_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let context = build_context(chunks);
    let slots = PROMPT_TEMPLATE.split_once("{context}").and_then(|(head, rest)| {
        rest.split_once("{question}").map(|(middle, tail)| (head, middle, tail))
    });
    match slots {
        Some((head, middle, tail)) => format!("{head}{context}{middle}{question}{tail}"),
        None => PROMPT_TEMPLATE.to_string(),
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn chunk(text: &str, document: &str, metadata: Value) -> RetrievedChunk {
        RetrievedChunk {
            text: text.into(),
            score: 0.9,
            raw_score: 1.8,
            document_name: document.into(),
            chunk_id: Some("c1".into()),
            page_number: None,
            metadata: metadata.as_object().cloned().unwrap_or_else(Map::new),
        }
    }

    #[test]
    fn empty_context_placeholder() {
        assert_eq!(build_context(&[]), EMPTY_CONTEXT);
        assert!(build_prompt("why?", &[]).contains("Context information:\nNo relevant documents found.\n"));
    }

    #[test]
    fn context_blocks_are_numbered_with_sources() {
        let chunks = vec![
            chunk("First body", "a.pdf", json!({ "page_number": 3, "section": null })),
            chunk("Second body", "b.md", json!({})),
        ];
        let context = build_context(&chunks);
        assert_eq!(
            context,
            "Document 1:\nFirst body\nSource: document_name: a.pdf, page_number: 3\n\n\
             Document 2:\nSecond body\nSource: document_name: b.md\n"
        );
    }

    #[test]
    fn prompt_fills_both_slots() {
        let prompt = build_prompt("How do I install it?", &[chunk("Run the installer", "x", json!({}))]);
        assert!(prompt.starts_with("You are a helpful AI assistant"));
        assert!(prompt.contains("Question: How do I install it?\n"));
        assert!(prompt.contains("Document 1:\nRun the installer\n"));
        assert!(prompt.ends_with("Answer:"));
        assert!(!prompt.contains("{context}"));
    }

    #[test]
    fn placeholders_in_the_question_are_left_alone() {
        let prompt = build_prompt("what is {context}?", &[]);
        assert!(prompt.contains("Question: what is {context}?\n"));
    }
}
