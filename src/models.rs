//! Core data models used throughout the citation ledger.
//!
//! These types represent the conversations, source records, and user-facing
//! messages that flow through normalization and history reconstruction.

use serde::{Deserialize, Serialize};

/// Identifies one user's chat thread within one course.
///
/// Stable for the conversation's lifetime; used as the lookup key for both
/// cache tiers and the counter ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub user_id: String,
    pub course_id: String,
}

impl ConversationKey {
    pub fn new(user_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            course_id: course_id.into(),
        }
    }

    /// Key under which this conversation's snapshot lives in the ephemeral tier.
    pub fn cache_key(&self) -> String {
        format!("conv:{}:{}", self.user_id, self.course_id)
    }
}

/// Category of a retrieval tool invocation.
///
/// Document and web results consume the per-conversation counters; image
/// results are identified by slide position instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCategory {
    Document,
    Web,
    Image,
}

/// A retrieved passage from the course material index.
///
/// Created once per tool call, never mutated afterwards. `id` is empty until
/// the normalizer assigns a counter value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagSource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub slide_id: String,
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub page_start: i64,
    #[serde(default)]
    pub page_end: i64,
    #[serde(default)]
    pub text: String,
}

/// A retrieved web search result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: String,
}

/// Whether an image reference points at the page under discussion or a page
/// the conversation has since moved past.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    #[default]
    Current,
    Previous,
}

/// A slide-page image reference.
///
/// Identified by its composite slide + page position rather than a counter:
/// images are not accumulated in a numbered list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub kind: ImageKind,
    #[serde(default)]
    pub slide_id: String,
    #[serde(default)]
    pub page_number: i64,
}

/// A reconstructed, presentation-facing chat message with resolved sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserMessage {
    pub id: String,
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
    /// ISO8601 timestamp.
    pub created_at: String,
    pub rag_sources: Vec<RagSource>,
    pub web_sources: Vec<WebSource>,
    pub image_sources: Vec<ImageSource>,
}

/// Format a Unix timestamp as ISO8601, falling back to the raw number for
/// out-of-range values.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_scopes_user_and_course() {
        let a = ConversationKey::new("u1", "c1");
        let b = ConversationKey::new("u1", "c2");
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "conv:u1:c1");
    }

    #[test]
    fn test_image_kind_default_is_current() {
        let img: ImageSource = serde_json::from_value(serde_json::json!({
            "slide_id": "s1",
            "page_number": 4
        }))
        .unwrap();
        assert_eq!(img.kind, ImageKind::Current);
        assert!(img.id.is_empty());
    }

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
    }
}
