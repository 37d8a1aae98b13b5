//! Compatibility resolvers for pre-indirection storage generations.
//!
//! Two older shapes survive in production data: sources embedded directly
//! on the assistant message, and a per-conversation side table keyed by
//! message id. Each resolver is a pure function from a message to an
//! optional source set; [`resolve_legacy`] tries them in a fixed order and
//! falls through to empty lists, a valid terminal state rather than an
//! error.

use std::collections::HashMap;

use crate::message::{EmbeddedSources, Message};
use crate::models::{ImageSource, RagSource, WebSource};

/// Sources resolved for one assistant message, in citation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSources {
    pub rag: Vec<RagSource>,
    pub web: Vec<WebSource>,
    pub images: Vec<ImageSource>,
}

impl ResolvedSources {
    pub fn is_empty(&self) -> bool {
        self.rag.is_empty() && self.web.is_empty() && self.images.is_empty()
    }
}

impl From<&EmbeddedSources> for ResolvedSources {
    fn from(embedded: &EmbeddedSources) -> Self {
        Self {
            rag: embedded.rag_sources.clone(),
            web: embedded.web_sources.clone(),
            images: Vec::new(),
        }
    }
}

/// Oldest generation: a `sources` object embedded on the message itself.
pub fn resolve_embedded(message: &Message) -> Option<ResolvedSources> {
    let Message::Assistant {
        sources: Some(embedded),
        ..
    } = message
    else {
        return None;
    };
    if embedded.is_empty() {
        return None;
    }
    Some(ResolvedSources::from(embedded))
}

/// Middle generation: the same shape stored in a side table keyed by the
/// assistant message's own id.
pub fn resolve_side_table(
    message: &Message,
    side_table: &HashMap<String, EmbeddedSources>,
) -> Option<ResolvedSources> {
    let Message::Assistant { id, .. } = message else {
        return None;
    };
    let embedded = side_table.get(id)?;
    if embedded.is_empty() {
        return None;
    }
    Some(ResolvedSources::from(embedded))
}

/// Run the fallback chain: embedded, then side table, then empty.
pub fn resolve_legacy(
    message: &Message,
    side_table: &HashMap<String, EmbeddedSources>,
) -> ResolvedSources {
    resolve_embedded(message)
        .or_else(|| resolve_side_table(message, side_table))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assistant_with_embedded() -> Message {
        serde_json::from_value(json!({
            "role": "assistant",
            "id": "m1",
            "content": "answer",
            "sources": {
                "rag_sources": [ { "id": "1", "text": "embedded passage" } ],
                "web_sources": []
            }
        }))
        .unwrap()
    }

    fn bare_assistant(id: &str) -> Message {
        serde_json::from_value(json!({
            "role": "assistant",
            "id": id,
            "content": "answer"
        }))
        .unwrap()
    }

    #[test]
    fn test_embedded_wins_over_side_table() {
        let message = assistant_with_embedded();
        let mut side = HashMap::new();
        side.insert(
            "m1".to_string(),
            EmbeddedSources {
                rag_sources: vec![RagSource {
                    text: "side table passage".into(),
                    ..Default::default()
                }],
                web_sources: Vec::new(),
            },
        );

        let resolved = resolve_legacy(&message, &side);
        assert_eq!(resolved.rag.len(), 1);
        assert_eq!(resolved.rag[0].text, "embedded passage");
    }

    #[test]
    fn test_side_table_used_when_message_has_no_embedded() {
        let message = bare_assistant("m7");
        let mut side = HashMap::new();
        side.insert(
            "m7".to_string(),
            EmbeddedSources {
                rag_sources: Vec::new(),
                web_sources: vec![WebSource {
                    title: "ref".into(),
                    url: "https://example.com".into(),
                    ..Default::default()
                }],
            },
        );

        let resolved = resolve_legacy(&message, &side);
        assert!(resolved.rag.is_empty());
        assert_eq!(resolved.web.len(), 1);
    }

    #[test]
    fn test_empty_embedded_falls_through_to_side_table() {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "id": "m3",
            "content": "answer",
            "sources": { "rag_sources": [], "web_sources": [] }
        }))
        .unwrap();
        let mut side = HashMap::new();
        side.insert(
            "m3".to_string(),
            EmbeddedSources {
                rag_sources: vec![RagSource::default()],
                web_sources: Vec::new(),
            },
        );

        let resolved = resolve_legacy(&message, &side);
        assert_eq!(resolved.rag.len(), 1);
    }

    #[test]
    fn test_neither_shape_yields_empty_terminal_state() {
        let message = bare_assistant("m9");
        let resolved = resolve_legacy(&message, &HashMap::new());
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_non_assistant_messages_never_resolve() {
        let human: Message = serde_json::from_value(json!({
            "role": "human",
            "id": "m1",
            "content": "hi"
        }))
        .unwrap();
        assert!(resolve_embedded(&human).is_none());
        assert!(resolve_side_table(&human, &HashMap::new()).is_none());
    }
}
