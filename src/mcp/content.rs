//! Canonical conversion of remote content shapes.
//!
//! Servers send prompt messages and resource contents in whatever shape their
//! binding produces. Everything funnels through a small tagged union so the
//! rest of the crate never inspects wire objects ad hoc.

use serde_json::Value;

use crate::api::{ContentBlock, MessageParam, Role};

const JSON_MEDIA_TYPE: &str = "application/json";

/// Remote message content, classified off the wire representation.
#[derive(Debug, Clone, PartialEq)]
pub enum WireContent {
    Text(String),
    TextList(Vec<String>),
    Unsupported,
}

/// Resource payload after media-type resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceContent {
    /// Declared `application/json`, parsed into structured data.
    Json(Value),
    /// Any other (or missing) media type; the raw text, unchanged.
    Text(String),
}

impl ResourceContent {
    /// The payload as text: raw text as-is, structured data re-serialized.
    pub fn as_text(&self) -> String {
        match self {
            ResourceContent::Text(text) => text.clone(),
            ResourceContent::Json(value) => value.to_string(),
        }
    }
}

/// Classifies one wire content value.
pub fn classify_content(content: &Value) -> WireContent {
    if content.get("type").and_then(Value::as_str) == Some("text") {
        let text = content
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return WireContent::Text(text.to_string());
    }

    if let Some(items) = content.as_array() {
        let texts: Vec<String> = items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .map(|item| {
                item.get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        if !texts.is_empty() {
            return WireContent::TextList(texts);
        }
    }

    WireContent::Unsupported
}

/// Converts one remote prompt message into a conversation message.
/// Unsupported content becomes an empty text block so the exchange keeps the
/// server's message count.
pub fn prompt_message_param(role: Role, content: &Value) -> MessageParam {
    let content = match classify_content(content) {
        WireContent::Text(text) => vec![ContentBlock::Text { text }],
        WireContent::TextList(texts) => texts
            .into_iter()
            .map(|text| ContentBlock::Text { text })
            .collect(),
        WireContent::Unsupported => vec![ContentBlock::Text {
            text: String::new(),
        }],
    };
    MessageParam { role, content }
}

/// Resolves the first usable entry of a read-resource `contents` array.
/// Returns `None` when the server sent nothing we can represent.
pub fn resource_from_contents(contents: &[Value]) -> Option<ResourceContent> {
    let first = contents.first()?;
    let Some(text) = first.get("text").and_then(Value::as_str) else {
        // Binary/blob contents keep their wire representation.
        return Some(ResourceContent::Json(first.clone()));
    };

    if first.get("mimeType").and_then(Value::as_str) == Some(JSON_MEDIA_TYPE) {
        return match serde_json::from_str(text) {
            Ok(parsed) => Some(ResourceContent::Json(parsed)),
            Err(_) => Some(ResourceContent::Text(text.to_string())),
        };
    }
    Some(ResourceContent::Text(text.to_string()))
}
