//! Per-conversation source counters.
//!
//! Every document or web retrieval result shown to the agent gets a numeric
//! identifier that is unique within its conversation for the conversation's
//! lifetime. Identifiers are reserved in contiguous blocks, one counter per
//! category, and are never re-issued, even for results the agent ends up
//! not citing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::models::ConversationKey;

/// Monotonic counters for one conversation: last issued id per category.
///
/// Counters never decrease. Image references do not consume a counter; they
/// are identified by slide position (see [`crate::normalize`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCounterState {
    pub rag: i64,
    pub web: i64,
}

impl SourceCounterState {
    /// Reserve the next `n` document-source ids, advancing the counter.
    pub fn next_rag_ids(&mut self, n: usize) -> Vec<i64> {
        let start = self.rag + 1;
        self.rag += n as i64;
        (start..=self.rag).collect()
    }

    /// Reserve the next `n` web-source ids, advancing the counter.
    pub fn next_web_ids(&mut self, n: usize) -> Vec<i64> {
        let start = self.web + 1;
        self.web += n as i64;
        (start..=self.web).collect()
    }
}

/// Per-conversation counter slot: the loaded flag distinguishes "fresh
/// conversation" from "not yet read from the database".
#[derive(Debug, Default)]
pub(crate) struct CounterSlot {
    loaded: bool,
    state: SourceCounterState,
}

enum CountedCategory {
    Rag,
    Web,
}

/// Registry of counter slots, one per [`ConversationKey`].
///
/// All mutation for a key is serialized through that key's async mutex;
/// unrelated conversations never contend. State is loaded from the
/// `source_counters` table on first use and upserted after every
/// reservation.
///
/// If the persisted state cannot be loaded, the ledger reinitializes at
/// zero. This keeps tool calls working but can re-issue ids already cited
/// before the loss; a known, accepted limitation of the storage scheme.
pub struct CounterLedger {
    pool: SqlitePool,
    slots: StdMutex<HashMap<ConversationKey, Arc<Mutex<CounterSlot>>>>,
}

impl CounterLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    /// Fetch (or create) the slot guarding `key`.
    ///
    /// The returned mutex is the serialization point for every counter
    /// mutation and for conversation clearing.
    pub(crate) fn slot(&self, key: &ConversationKey) -> Arc<Mutex<CounterSlot>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(key.clone()).or_default().clone()
    }

    /// Atomically reserve `n` consecutive document-source ids.
    pub async fn reserve_rag(&self, key: &ConversationKey, n: usize) -> Vec<i64> {
        self.reserve(key, n, CountedCategory::Rag).await
    }

    /// Atomically reserve `n` consecutive web-source ids.
    pub async fn reserve_web(&self, key: &ConversationKey, n: usize) -> Vec<i64> {
        self.reserve(key, n, CountedCategory::Web).await
    }

    async fn reserve(&self, key: &ConversationKey, n: usize, cat: CountedCategory) -> Vec<i64> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        self.ensure_loaded(&mut guard, key).await;

        let ids = match cat {
            CountedCategory::Rag => guard.state.next_rag_ids(n),
            CountedCategory::Web => guard.state.next_web_ids(n),
        };

        // The in-memory counter has already advanced; uniqueness within
        // this process does not depend on the write landing.
        if let Err(e) = self.persist(key, guard.state).await {
            tracing::warn!(
                user_id = %key.user_id,
                course_id = %key.course_id,
                error = %e,
                "failed to persist counter state"
            );
        }

        ids
    }

    async fn ensure_loaded(&self, slot: &mut CounterSlot, key: &ConversationKey) {
        if slot.loaded {
            return;
        }
        match self.load_state(key).await {
            Ok(state) => slot.state = state,
            Err(e) => {
                tracing::warn!(
                    user_id = %key.user_id,
                    course_id = %key.course_id,
                    error = %e,
                    "counter state unavailable, reinitializing at zero; \
                     ids issued before the loss may be duplicated"
                );
                slot.state = SourceCounterState::default();
            }
        }
        slot.loaded = true;
    }

    async fn load_state(&self, key: &ConversationKey) -> Result<SourceCounterState> {
        let row = sqlx::query(
            "SELECT rag_counter, web_counter FROM source_counters WHERE user_id = ? AND course_id = ?",
        )
        .bind(&key.user_id)
        .bind(&key.course_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => SourceCounterState {
                rag: row.get("rag_counter"),
                web: row.get("web_counter"),
            },
            // First tool call of a fresh conversation.
            None => SourceCounterState::default(),
        })
    }

    async fn persist(&self, key: &ConversationKey, state: SourceCounterState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_counters (user_id, course_id, rag_counter, web_counter, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, course_id) DO UPDATE SET
                rag_counter = excluded.rag_counter,
                web_counter = excluded.web_counter,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.course_id)
        .bind(state.rag)
        .bind(state.web)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reset a slot as part of conversation clearing.
    ///
    /// The caller holds the slot's lock, so no reservation for this key can
    /// run until the clear has fully completed.
    pub(crate) async fn clear_locked(
        &self,
        slot: &mut CounterSlot,
        key: &ConversationKey,
    ) -> Result<()> {
        sqlx::query("DELETE FROM source_counters WHERE user_id = ? AND course_id = ?")
            .bind(&key.user_id)
            .bind(&key.course_id)
            .execute(&self.pool)
            .await?;
        slot.state = SourceCounterState::default();
        slot.loaded = true;
        Ok(())
    }
}
