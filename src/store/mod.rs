//! Two-tier conversation storage.
//!
//! Reads go through a fast, session-scoped ephemeral tier holding serialized
//! snapshots, with fallback to the durable message log in SQLite. The
//! [`EphemeralTier`] trait keeps the fast tier pluggable (in-memory for this
//! crate and its tests, an external cache in deployment).
//!
//! Ownership: the durable log and the ephemeral snapshot are written by the
//! live agent-execution path, outside this engine. The engine reads both and
//! deletes both on conversation clear; it never populates the ephemeral tier
//! on the read path.
//!
//! Every read-side failure has a non-fatal fallback: a corrupt ephemeral
//! payload is a miss, a missing conversation is an empty snapshot, and a
//! slow durable read is cut off by a bounded timeout.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::message::{EmbeddedSources, Message, Snapshot};
use crate::models::ConversationKey;

/// A fast key/value tier holding serialized conversation snapshots.
///
/// Implementations must replace values atomically so concurrent readers
/// observe either the previous or the new snapshot, never a partial write.
#[async_trait]
pub trait EphemeralTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, payload: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read-through store over the ephemeral tier and the durable message log.
pub struct TwoTierStore {
    ephemeral: Arc<dyn EphemeralTier>,
    pool: SqlitePool,
    durable_timeout: Duration,
}

impl TwoTierStore {
    pub fn new(
        ephemeral: Arc<dyn EphemeralTier>,
        pool: SqlitePool,
        durable_timeout: Duration,
    ) -> Self {
        Self {
            ephemeral,
            pool,
            durable_timeout,
        }
    }

    /// Handle to the fast tier, for the population path and for tests.
    pub fn ephemeral(&self) -> Arc<dyn EphemeralTier> {
        self.ephemeral.clone()
    }

    /// Read a conversation snapshot.
    ///
    /// Ephemeral tier first; a miss, an unreachable tier, or an undecodable
    /// payload falls through to the durable log. Durable absence, failure,
    /// or timeout degrades to an empty snapshot. The result is not written
    /// back to the ephemeral tier.
    pub async fn read(&self, key: &ConversationKey) -> Snapshot {
        let cache_key = key.cache_key();

        match self.ephemeral.get(&cache_key).await {
            Ok(Some(payload)) => match serde_json::from_str::<Snapshot>(&payload) {
                Ok(snapshot) => return snapshot,
                Err(e) => {
                    tracing::warn!(key = %cache_key, error = %e,
                        "corrupt ephemeral snapshot, falling through to durable tier");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key = %cache_key, error = %e,
                    "ephemeral tier unavailable, falling through to durable tier");
            }
        }

        match tokio::time::timeout(self.durable_timeout, self.read_durable(key)).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                tracing::warn!(key = %cache_key, error = %e,
                    "durable read failed, returning empty snapshot");
                Snapshot::default()
            }
            Err(_) => {
                tracing::warn!(key = %cache_key, timeout_ms = self.durable_timeout.as_millis() as u64,
                    "durable read timed out, returning empty snapshot");
                Snapshot::default()
            }
        }
    }

    async fn read_durable(&self, key: &ConversationKey) -> Result<Snapshot> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload_json FROM messages
            WHERE user_id = ? AND course_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.course_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let payload: String = row.get("payload_json");
            match serde_json::from_str::<Message>(&payload) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    let id: String = row.get("id");
                    tracing::warn!(message_id = %id, error = %e,
                        "skipping undecodable message row");
                }
            }
        }

        Ok(Snapshot::new(messages))
    }

    /// Load the legacy per-conversation side table (message id → sources).
    ///
    /// Infallible: any failure degrades to an empty map, which resolves the
    /// same as a conversation that never had side-table rows.
    pub async fn read_side_table(&self, key: &ConversationKey) -> HashMap<String, EmbeddedSources> {
        let rows = sqlx::query(
            "SELECT message_id, sources_json FROM message_sources WHERE user_id = ? AND course_id = ?",
        )
        .bind(&key.user_id)
        .bind(&key.course_id)
        .fetch_all(&self.pool)
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(user_id = %key.user_id, course_id = %key.course_id, error = %e,
                    "side table unavailable");
                return HashMap::new();
            }
        };

        let mut table = HashMap::with_capacity(rows.len());
        for row in &rows {
            let message_id: String = row.get("message_id");
            let sources_json: String = row.get("sources_json");
            match serde_json::from_str::<EmbeddedSources>(&sources_json) {
                Ok(sources) => {
                    table.insert(message_id, sources);
                }
                Err(e) => {
                    tracing::warn!(message_id = %message_id, error = %e,
                        "skipping undecodable side-table row");
                }
            }
        }
        table
    }

    /// Remove every projection of this conversation: the ephemeral snapshot,
    /// the durable message rows, and the legacy side-table rows.
    ///
    /// Idempotent: clearing an already-empty conversation succeeds.
    pub async fn clear(&self, key: &ConversationKey) -> Result<()> {
        self.ephemeral.remove(&key.cache_key()).await?;

        sqlx::query("DELETE FROM messages WHERE user_id = ? AND course_id = ?")
            .bind(&key.user_id)
            .bind(&key.course_id)
            .execute(&self.pool)
            .await?;

        sqlx::query("DELETE FROM message_sources WHERE user_id = ? AND course_id = ?")
            .bind(&key.user_id)
            .bind(&key.course_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
