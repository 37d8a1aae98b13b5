//! History reconstruction.
//!
//! Turns a conversation snapshot into the ordered, newest-first list of
//! user-facing messages, resolving each assistant message's citation ids
//! back into concrete source records through the tool messages that issued
//! them. Resolution never fails a history fetch: a missing reference, a
//! failed tool call, or a payload from an unknown tool contributes zero
//! sources and nothing else.

use std::collections::HashMap;

use crate::config::ToolsConfig;
use crate::legacy::{self, ResolvedSources};
use crate::message::{EmbeddedSources, Message, ToolPayload};
use crate::models::{format_ts_iso, ImageKind, ImageSource, RagSource, UserMessage, WebSource};
use crate::normalize::image_source_id;

/// Index over the item ids issued by successful tool calls.
///
/// Built once per reconstruction by decoding every tool payload in the
/// snapshot. Only successful calls of the configured retrieval tools are
/// indexed, so a cited id from a failed call simply misses. Each citation
/// resolves to at most one source; if corrupted data repeats an id, the
/// first occurrence wins.
#[derive(Default)]
struct ToolIndex {
    rag: HashMap<String, RagSource>,
    web: HashMap<String, WebSource>,
    image: HashMap<String, ImageSource>,
}

fn build_index(messages: &[Message], tools: &ToolsConfig) -> ToolIndex {
    let mut index = ToolIndex::default();

    for message in messages {
        let Message::Tool {
            tool_name, payload, ..
        } = message
        else {
            continue;
        };

        match ToolPayload::decode(tool_name, payload, tools) {
            ToolPayload::Rag(envelope) if envelope.success => {
                for item in envelope.results {
                    insert_first(&mut index.rag, item.id.clone(), item);
                }
            }
            ToolPayload::Web(envelope) if envelope.success => {
                for item in envelope.results {
                    insert_first(&mut index.web, item.id.clone(), item);
                }
            }
            ToolPayload::Image(envelope) if envelope.success => {
                for item in envelope.results {
                    insert_first(&mut index.image, item.id.clone(), item);
                }
            }
            // Failed calls and unknown tools are never citable.
            _ => {}
        }
    }

    index
}

fn insert_first<T>(map: &mut HashMap<String, T>, id: String, item: T) {
    if id.is_empty() {
        return;
    }
    if map.contains_key(&id) {
        tracing::warn!(id = %id, "duplicate source id in tool payloads, keeping first");
        return;
    }
    map.insert(id, item);
}

/// Whether reconstruction of this snapshot may need the legacy side table.
///
/// True when at least one user-visible assistant message carries neither
/// citation ids nor embedded sources, the only situation in which the
/// side-table resolver can contribute anything.
pub fn needs_side_table(messages: &[Message]) -> bool {
    messages.iter().any(|message| {
        let Message::Assistant {
            content,
            rag_source_ids,
            web_source_ids,
            image_source_ids,
            sources,
            ..
        } = message
        else {
            return false;
        };
        !content.trim().is_empty()
            && rag_source_ids.is_empty()
            && web_source_ids.is_empty()
            && image_source_ids.is_empty()
            && sources.as_ref().map_or(true, |s| s.is_empty())
    })
}

/// Reconstruct the user-facing history from a snapshot.
///
/// `messages` is oldest-first (snapshot order); the returned list is
/// newest-first and truncated to `limit`. Source lists preserve citation
/// order (the order ids were recorded on the assistant message), never a
/// re-sort by id or relevance.
pub fn reconstruct(
    messages: &[Message],
    side_table: &HashMap<String, EmbeddedSources>,
    tools: &ToolsConfig,
    limit: usize,
) -> Vec<UserMessage> {
    let index = build_index(messages, tools);
    let mut history: Vec<UserMessage> = Vec::new();

    for message in messages {
        match message {
            Message::Human {
                id,
                content,
                created_at,
            } => {
                history.push(UserMessage {
                    id: id.clone(),
                    role: "user".to_string(),
                    content: content.clone(),
                    created_at: format_ts_iso(*created_at),
                    rag_sources: Vec::new(),
                    web_sources: Vec::new(),
                    image_sources: Vec::new(),
                });
            }
            Message::Assistant {
                id,
                content,
                created_at,
                rag_source_ids,
                web_source_ids,
                image_source_ids,
                image_source,
                ..
            } => {
                // Tool-call scaffolding, not user-visible.
                if content.trim().is_empty() {
                    continue;
                }

                let mut resolved = ResolvedSources::default();
                for source_id in rag_source_ids {
                    match index.rag.get(source_id) {
                        Some(source) => resolved.rag.push(source.clone()),
                        None => {
                            tracing::debug!(message_id = %id, source_id = %source_id,
                                "unresolved document citation")
                        }
                    }
                }
                for source_id in web_source_ids {
                    match index.web.get(source_id) {
                        Some(source) => resolved.web.push(source.clone()),
                        None => {
                            tracing::debug!(message_id = %id, source_id = %source_id,
                                "unresolved web citation")
                        }
                    }
                }
                for source_id in image_source_ids {
                    match index.image.get(source_id) {
                        Some(source) => resolved.images.push(source.clone()),
                        None => {
                            tracing::debug!(message_id = %id, source_id = %source_id,
                                "unresolved image citation")
                        }
                    }
                }

                let indirection_empty = resolved.is_empty();

                // Singular legacy image reference, consulted only when no
                // cited image resolved.
                if resolved.images.is_empty() {
                    if let Some(legacy_ref) = image_source {
                        resolved.images.push(ImageSource {
                            id: image_source_id(
                                ImageKind::Current,
                                &legacy_ref.slide_id,
                                legacy_ref.page_number,
                                None,
                            ),
                            kind: ImageKind::Current,
                            slide_id: legacy_ref.slide_id.clone(),
                            page_number: legacy_ref.page_number,
                        });
                    }
                }

                if indirection_empty {
                    let fallback = legacy::resolve_legacy(message, side_table);
                    resolved.rag = fallback.rag;
                    resolved.web = fallback.web;
                }

                history.push(UserMessage {
                    id: id.clone(),
                    role: "assistant".to_string(),
                    content: content.clone(),
                    created_at: format_ts_iso(*created_at),
                    rag_sources: resolved.rag,
                    web_sources: resolved.web,
                    image_sources: resolved.images,
                });
            }
            // Tool messages are never user-visible.
            Message::Tool { .. } => {}
        }
    }

    history.reverse();
    history.truncate(limit);
    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn tools() -> ToolsConfig {
        ToolsConfig::default()
    }

    fn human(id: &str, content: &str, ts: i64) -> Message {
        Message::Human {
            id: id.into(),
            content: content.into(),
            created_at: ts,
        }
    }

    fn tool(id: &str, tool_name: &str, payload: Value) -> Message {
        Message::Tool {
            id: id.into(),
            tool_name: tool_name.into(),
            payload,
            created_at: 0,
        }
    }

    fn assistant(id: &str, content: &str, rag_ids: &[&str]) -> Message {
        Message::Assistant {
            id: id.into(),
            content: content.into(),
            created_at: 0,
            rag_source_ids: rag_ids.iter().map(|s| s.to_string()).collect(),
            web_source_ids: Vec::new(),
            image_source_ids: Vec::new(),
            image_source: None,
            sources: None,
        }
    }

    fn doc_payload(items: &[(&str, &str)]) -> Value {
        json!({
            "success": true,
            "results": items
                .iter()
                .map(|(id, text)| json!({
                    "id": id,
                    "slide_id": "s1",
                    "document_id": "d1",
                    "text": text
                }))
                .collect::<Vec<_>>()
        })
    }

    #[test]
    fn test_citations_resolve_across_tool_calls_in_citation_order() {
        // Two document calls issued ids {1,2,3} and {4,5}; the assistant
        // cites 2 and 4.
        let tools = tools();
        let messages = vec![
            human("m1", "what is a monad?", 10),
            tool(
                "t1",
                &tools.document_tool,
                doc_payload(&[("1", "a"), ("2", "b"), ("3", "c")]),
            ),
            tool(
                "t2",
                &tools.document_tool,
                doc_payload(&[("4", "d"), ("5", "e")]),
            ),
            assistant("m2", "See [2] and [4].", &["2", "4"]),
        ];

        let history = reconstruct(&messages, &HashMap::new(), &tools, 50);
        assert_eq!(history.len(), 2);
        // Newest-first.
        assert_eq!(history[0].id, "m2");
        let rag = &history[0].rag_sources;
        assert_eq!(rag.len(), 2);
        assert_eq!((rag[0].id.as_str(), rag[0].text.as_str()), ("2", "b"));
        assert_eq!((rag[1].id.as_str(), rag[1].text.as_str()), ("4", "d"));
    }

    #[test]
    fn test_blank_assistant_scaffolding_is_excluded() {
        let tools = tools();
        let messages = vec![
            human("m1", "question", 0),
            assistant("m2", "", &[]),
            assistant("m3", "   ", &[]),
            assistant("m4", "answer", &[]),
        ];
        let history = reconstruct(&messages, &HashMap::new(), &tools, 50);
        let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m4", "m1"]);
    }

    #[test]
    fn test_limit_keeps_the_most_recent_messages() {
        let tools = tools();
        let mut messages = Vec::new();
        for i in 0..5 {
            messages.push(human(&format!("h{}", i), "q", i));
            messages.push(assistant(&format!("a{}", i), "ans", &[]));
        }
        let history = reconstruct(&messages, &HashMap::new(), &tools, 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "a4");
    }

    #[test]
    fn test_missing_reference_contributes_zero_sources() {
        let tools = tools();
        let messages = vec![
            human("m1", "q", 0),
            assistant("m2", "cites a ghost [9]", &["9"]),
        ];
        let history = reconstruct(&messages, &HashMap::new(), &tools, 50);
        assert!(history[0].rag_sources.is_empty());
    }

    #[test]
    fn test_failed_tool_call_is_never_resolvable() {
        let tools = tools();
        let messages = vec![
            tool(
                "t1",
                &tools.document_tool,
                json!({ "success": false, "results": [ { "id": "1", "text": "x" } ] }),
            ),
            assistant("m1", "cites [1]", &["1"]),
        ];
        let history = reconstruct(&messages, &HashMap::new(), &tools, 50);
        assert!(history[0].rag_sources.is_empty());
    }

    #[test]
    fn test_tool_name_must_match_category() {
        // A web payload cannot satisfy a document citation even if ids align.
        let tools = tools();
        let messages = vec![
            tool(
                "t1",
                &tools.web_tool,
                json!({
                    "success": true,
                    "results": [ { "id": "1", "title": "t", "url": "u", "text": "x" } ]
                }),
            ),
            assistant("m1", "cites [1]", &["1"]),
        ];
        let history = reconstruct(&messages, &HashMap::new(), &tools, 50);
        assert!(history[0].rag_sources.is_empty());
        assert!(history[0].web_sources.is_empty());
    }

    #[test]
    fn test_legacy_image_fallback_when_no_cited_image_resolves() {
        let tools = tools();
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "id": "m1",
            "content": "look at the slide",
            "image_source": { "slide_id": "s3", "page_number": 7 }
        }))
        .unwrap();
        let history = reconstruct(&[message], &HashMap::new(), &tools, 50);
        let images = &history[0].image_sources;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, "s3:p7");
        assert_eq!(images[0].kind, ImageKind::Current);
    }

    #[test]
    fn test_legacy_parity_with_indirected_shape() {
        let tools = tools();

        let indirected = vec![
            tool("t1", &tools.document_tool, doc_payload(&[("1", "passage")])),
            assistant("m1", "answer", &["1"]),
        ];
        let embedded: Vec<Message> = vec![serde_json::from_value(json!({
            "role": "assistant",
            "id": "m1",
            "content": "answer",
            "sources": {
                "rag_sources": [
                    { "id": "1", "slide_id": "s1", "document_id": "d1", "text": "passage" }
                ]
            }
        }))
        .unwrap()];

        let from_indirected = reconstruct(&indirected, &HashMap::new(), &tools, 50);
        let from_embedded = reconstruct(&embedded, &HashMap::new(), &tools, 50);
        assert_eq!(
            from_indirected[0].rag_sources,
            from_embedded[0].rag_sources
        );
    }

    #[test]
    fn test_needs_side_table_only_for_unreferenced_assistants() {
        let with_ids = vec![assistant("m1", "answer", &["1"])];
        assert!(!needs_side_table(&with_ids));

        let bare = vec![assistant("m2", "answer", &[])];
        assert!(needs_side_table(&bare));

        // Scaffolding never needs the side table.
        let blank = vec![assistant("m3", "", &[])];
        assert!(!needs_side_table(&blank));
    }
}
