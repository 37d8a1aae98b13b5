//! Conversation message log entries and typed tool payloads.
//!
//! A conversation is an append-only, ordered record of turns. Each entry is
//! one [`Message`]: human input, assistant output, or the normalized result
//! of a retrieval tool call. The serialized field names are the persisted
//! wire shapes and must stay stable across storage generations: assistant
//! messages may carry citation references (`rag_source_ids` and friends),
//! the legacy singular `image_source`, or the oldest embedded `sources`
//! object, all at once.
//!
//! Tool payloads are decoded exactly once, at the store boundary, into a
//! closed tagged union per tool category ([`ToolPayload`]). Every field is
//! optional with a documented default; a payload that does not decode is
//! treated as a failed call, which downstream resolution turns into zero
//! sources.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ToolsConfig;
use crate::models::{ImageSource, RagSource, WebSource};

/// One entry in the conversation message log, tagged by `role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    Human {
        id: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        created_at: i64,
    },
    Assistant {
        id: String,
        /// Empty content marks tool-call scaffolding, never shown to users.
        #[serde(default)]
        content: String,
        #[serde(default)]
        created_at: i64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        rag_source_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        web_source_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        image_source_ids: Vec<String>,
        /// Legacy singular image reference, predates `image_source_ids`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_source: Option<LegacyImageRef>,
        /// Oldest generation: sources embedded directly on the message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sources: Option<EmbeddedSources>,
    },
    Tool {
        id: String,
        tool_name: String,
        /// Normalized, counter-rewritten tool result (`{success, results}`).
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        created_at: i64,
    },
}

impl Message {
    pub fn id(&self) -> &str {
        match self {
            Message::Human { id, .. } => id,
            Message::Assistant { id, .. } => id,
            Message::Tool { id, .. } => id,
        }
    }

    pub fn created_at(&self) -> i64 {
        match self {
            Message::Human { created_at, .. } => *created_at,
            Message::Assistant { created_at, .. } => *created_at,
            Message::Tool { created_at, .. } => *created_at,
        }
    }
}

/// The legacy `image_source: { slide_id, page_number }` reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyImageRef {
    #[serde(default)]
    pub slide_id: String,
    #[serde(default)]
    pub page_number: i64,
}

/// The legacy `sources` object: plain source records stored without id
/// indirection, either embedded on the message or in a side table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedSources {
    #[serde(default)]
    pub rag_sources: Vec<RagSource>,
    #[serde(default)]
    pub web_sources: Vec<WebSource>,
}

impl EmbeddedSources {
    pub fn is_empty(&self) -> bool {
        self.rag_sources.is_empty() && self.web_sources.is_empty()
    }
}

/// The `{ success, results }` envelope every retrieval tool returns.
///
/// `success` defaults to `false`: an undecodable or truncated payload is
/// indistinguishable from a failed call, and failed calls contribute no
/// sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> Default for ToolEnvelope<T> {
    fn default() -> Self {
        Self {
            success: false,
            results: Vec::new(),
        }
    }
}

impl<T> ToolEnvelope<T> {
    /// Envelope of a failed call: no results, never cited.
    pub fn failed() -> Self {
        Self::default()
    }
}

/// A tool payload decoded by category.
///
/// The tool name on the message selects the variant; tools this engine does
/// not know about are carried opaquely and contribute no sources.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Rag(ToolEnvelope<RagSource>),
    Web(ToolEnvelope<WebSource>),
    Image(ToolEnvelope<ImageSource>),
    Other,
}

impl ToolPayload {
    /// Decode a raw payload once, keyed by the configured tool names.
    pub fn decode(tool_name: &str, payload: &Value, tools: &ToolsConfig) -> ToolPayload {
        if tool_name == tools.document_tool {
            ToolPayload::Rag(decode_envelope(payload))
        } else if tool_name == tools.web_tool {
            ToolPayload::Web(decode_envelope(payload))
        } else if tool_name == tools.image_tool {
            ToolPayload::Image(decode_envelope(payload))
        } else {
            ToolPayload::Other
        }
    }
}

fn decode_envelope<T: DeserializeOwned>(payload: &Value) -> ToolEnvelope<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, "undecodable tool payload, treating as failed call");
            ToolEnvelope::failed()
        }
    }
}

/// An ordered projection of a conversation's messages, oldest-first.
///
/// The ephemeral tier stores snapshots serialized as a JSON array; the
/// durable message log can always re-derive them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub messages: Vec<Message>,
}

impl Snapshot {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_wire_shape_round_trip() {
        let raw = json!({
            "role": "assistant",
            "id": "m2",
            "content": "See [2].",
            "created_at": 1700000000,
            "rag_source_ids": ["2"],
            "image_source": { "slide_id": "s9", "page_number": 3 }
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        match &msg {
            Message::Assistant {
                rag_source_ids,
                web_source_ids,
                image_source,
                sources,
                ..
            } => {
                assert_eq!(rag_source_ids, &["2".to_string()]);
                assert!(web_source_ids.is_empty());
                assert_eq!(image_source.as_ref().unwrap().slide_id, "s9");
                assert!(sources.is_none());
            }
            other => panic!("expected assistant, got {:?}", other),
        }

        // Field names survive re-serialization unchanged.
        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["rag_source_ids"], json!(["2"]));
        assert_eq!(back["image_source"]["page_number"], json!(3));
    }

    #[test]
    fn test_embedded_sources_decode_with_omitted_fields() {
        let raw = json!({
            "role": "assistant",
            "id": "m1",
            "content": "old message",
            "sources": {
                "rag_sources": [ { "text": "partial record" } ]
            }
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        let Message::Assistant { sources, .. } = &msg else {
            panic!("expected assistant");
        };
        let embedded = sources.as_ref().unwrap();
        assert_eq!(embedded.rag_sources.len(), 1);
        assert_eq!(embedded.rag_sources[0].text, "partial record");
        assert_eq!(embedded.rag_sources[0].id, "");
        assert!(embedded.web_sources.is_empty());
    }

    #[test]
    fn test_tool_payload_decode_by_category() {
        let tools = ToolsConfig::default();
        let payload = json!({
            "success": true,
            "results": [ { "id": "1", "slide_id": "s1", "text": "t" } ]
        });
        match ToolPayload::decode(&tools.document_tool, &payload, &tools) {
            ToolPayload::Rag(env) => {
                assert!(env.success);
                assert_eq!(env.results[0].id, "1");
            }
            other => panic!("expected rag payload, got {:?}", other),
        }
        assert_eq!(
            ToolPayload::decode("unrelated_tool", &payload, &tools),
            ToolPayload::Other
        );
    }

    #[test]
    fn test_undecodable_payload_is_a_failed_call() {
        let tools = ToolsConfig::default();
        let payload = json!({ "success": "not-a-bool", "results": 7 });
        match ToolPayload::decode(&tools.web_tool, &payload, &tools) {
            ToolPayload::Web(env) => {
                assert!(!env.success);
                assert!(env.results.is_empty());
            }
            other => panic!("expected web payload, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_serializes_as_plain_array() {
        let snap = Snapshot::new(vec![Message::Human {
            id: "m1".into(),
            content: "hi".into(),
            created_at: 0,
        }]);
        let value = serde_json::to_value(&snap).unwrap();
        assert!(value.is_array());
        let back: Snapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snap);
    }
}
