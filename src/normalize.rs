//! Tool result normalization.
//!
//! Runs during live agent execution, between a retrieval tool returning and
//! the agent seeing the result. Document and web results get the next block
//! of counter ids for their conversation, assigned in the order the tool
//! returned them; image results get a composite slide-position identifier.
//! The rewritten envelope is what both the agent (for citation text) and
//! the message log receive.

use anyhow::Result;
use serde_json::Value;

use crate::counter::CounterLedger;
use crate::message::ToolEnvelope;
use crate::models::{
    ConversationKey, ImageKind, ImageSource, RagSource, SourceCategory, WebSource,
};

/// Derive the composite identifier of an image reference.
///
/// Current-page references are identified by slide and page alone.
/// Previous-page references additionally carry the originating tool
/// invocation, so two looks at the same page in one conversation stay
/// distinguishable.
pub fn image_source_id(
    kind: ImageKind,
    slide_id: &str,
    page_number: i64,
    invocation_id: Option<&str>,
) -> String {
    match (kind, invocation_id) {
        (ImageKind::Previous, Some(invocation)) => {
            format!("{}:p{}:{}", slide_id, page_number, invocation)
        }
        _ => format!("{}:p{}", slide_id, page_number),
    }
}

/// Normalize one raw tool result.
///
/// A failed call (`success == false`, or a payload that does not decode)
/// short-circuits: no ids are reserved and an empty result list is
/// propagated, so the agent can never cite a source from a failed call.
/// For successful document/web calls the relevant counter advances
/// irreversibly, whether or not every returned item ends up cited.
pub async fn normalize_tool_result(
    ledger: &CounterLedger,
    key: &ConversationKey,
    category: SourceCategory,
    raw: Value,
    invocation_id: Option<&str>,
) -> Result<Value> {
    let normalized = match category {
        SourceCategory::Document => {
            let mut envelope = decode_or_failed::<RagSource>(raw);
            if envelope.success && !envelope.results.is_empty() {
                let ids = ledger.reserve_rag(key, envelope.results.len()).await;
                for (item, id) in envelope.results.iter_mut().zip(ids) {
                    item.id = id.to_string();
                }
            }
            serde_json::to_value(envelope)?
        }
        SourceCategory::Web => {
            let mut envelope = decode_or_failed::<WebSource>(raw);
            if envelope.success && !envelope.results.is_empty() {
                let ids = ledger.reserve_web(key, envelope.results.len()).await;
                for (item, id) in envelope.results.iter_mut().zip(ids) {
                    item.id = id.to_string();
                }
            }
            serde_json::to_value(envelope)?
        }
        SourceCategory::Image => {
            let mut envelope = decode_or_failed::<ImageSource>(raw);
            if envelope.success {
                for item in envelope.results.iter_mut() {
                    item.id =
                        image_source_id(item.kind, &item.slide_id, item.page_number, invocation_id);
                }
            }
            serde_json::to_value(envelope)?
        }
    };

    Ok(normalized)
}

fn decode_or_failed<T: serde::de::DeserializeOwned>(raw: Value) -> ToolEnvelope<T> {
    match serde_json::from_value::<ToolEnvelope<T>>(raw) {
        Ok(envelope) if envelope.success => envelope,
        Ok(_) => ToolEnvelope::failed(),
        Err(e) => {
            tracing::debug!(error = %e, "raw tool result did not decode, propagating failure");
            ToolEnvelope::failed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn test_ledger() -> CounterLedger {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        CounterLedger::new(pool)
    }

    fn doc_result(texts: &[&str]) -> Value {
        json!({
            "success": true,
            "results": texts
                .iter()
                .map(|t| json!({ "slide_id": "s1", "document_id": "d1", "text": t }))
                .collect::<Vec<_>>()
        })
    }

    #[tokio::test]
    async fn test_ids_assigned_in_input_order_across_calls() {
        let ledger = test_ledger().await;
        let key = ConversationKey::new("u1", "c1");

        let first = normalize_tool_result(
            &ledger,
            &key,
            SourceCategory::Document,
            doc_result(&["a", "b", "c"]),
            None,
        )
        .await
        .unwrap();
        let second = normalize_tool_result(
            &ledger,
            &key,
            SourceCategory::Document,
            doc_result(&["d", "e"]),
            None,
        )
        .await
        .unwrap();

        let ids = |v: &Value| {
            v["results"]
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r["id"].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ["1", "2", "3"]);
        assert_eq!(ids(&second), ["4", "5"]);
        // Input order preserved, no re-sorting.
        assert_eq!(first["results"][1]["text"], json!("b"));
    }

    #[tokio::test]
    async fn test_failed_call_reserves_nothing() {
        let ledger = test_ledger().await;
        let key = ConversationKey::new("u1", "c1");

        let failed = normalize_tool_result(
            &ledger,
            &key,
            SourceCategory::Document,
            json!({ "success": false, "results": [ { "text": "ignored" } ] }),
            None,
        )
        .await
        .unwrap();
        assert_eq!(failed, json!({ "success": false, "results": [] }));

        // The next successful call still starts at 1.
        let next = normalize_tool_result(
            &ledger,
            &key,
            SourceCategory::Document,
            doc_result(&["a"]),
            None,
        )
        .await
        .unwrap();
        assert_eq!(next["results"][0]["id"], json!("1"));
    }

    #[tokio::test]
    async fn test_web_and_document_counters_are_independent() {
        let ledger = test_ledger().await;
        let key = ConversationKey::new("u1", "c1");

        normalize_tool_result(
            &ledger,
            &key,
            SourceCategory::Document,
            doc_result(&["a", "b"]),
            None,
        )
        .await
        .unwrap();
        let web = normalize_tool_result(
            &ledger,
            &key,
            SourceCategory::Web,
            json!({
                "success": true,
                "results": [ { "title": "t", "url": "https://example.com", "text": "w" } ]
            }),
            None,
        )
        .await
        .unwrap();
        assert_eq!(web["results"][0]["id"], json!("1"));
    }

    #[tokio::test]
    async fn test_image_ids_are_composite() {
        let ledger = test_ledger().await;
        let key = ConversationKey::new("u1", "c1");

        let normalized = normalize_tool_result(
            &ledger,
            &key,
            SourceCategory::Image,
            json!({
                "success": true,
                "results": [
                    { "kind": "current", "slide_id": "s1", "page_number": 4 },
                    { "kind": "previous", "slide_id": "s1", "page_number": 3 }
                ]
            }),
            Some("t-9"),
        )
        .await
        .unwrap();

        assert_eq!(normalized["results"][0]["id"], json!("s1:p4"));
        assert_eq!(normalized["results"][1]["id"], json!("s1:p3:t-9"));
    }

    #[tokio::test]
    async fn test_undecodable_input_propagates_failure() {
        let ledger = test_ledger().await;
        let key = ConversationKey::new("u1", "c1");

        let out = normalize_tool_result(
            &ledger,
            &key,
            SourceCategory::Web,
            json!({ "success": true, "results": "garbage" }),
            None,
        )
        .await
        .unwrap();
        assert_eq!(out, json!({ "success": false, "results": [] }));
    }
}
