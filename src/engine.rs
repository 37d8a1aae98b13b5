//! Engine facade.
//!
//! [`CitationEngine`] wires the counter ledger, the two-tier store, and
//! history reconstruction behind the three operations the outside world
//! uses: normalize a tool result during live execution, fetch user-facing
//! history, and clear a conversation. The CLI and the HTTP server both go
//! through this type.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::config::{Config, ToolsConfig};
use crate::counter::CounterLedger;
use crate::db;
use crate::history;
use crate::models::{ConversationKey, SourceCategory, UserMessage};
use crate::normalize;
use crate::store::memory::InMemoryTier;
use crate::store::{EphemeralTier, TwoTierStore};

pub struct CitationEngine {
    ledger: CounterLedger,
    store: TwoTierStore,
    tools: ToolsConfig,
    default_limit: usize,
}

impl CitationEngine {
    /// Build an engine over an existing pool with the in-memory ephemeral
    /// tier.
    pub fn new(config: &Config, pool: SqlitePool) -> Self {
        let ephemeral = Arc::new(InMemoryTier::new(config.cache.max_conversations));
        Self::with_ephemeral(config, pool, ephemeral)
    }

    /// Build an engine with a caller-supplied ephemeral tier.
    pub fn with_ephemeral(
        config: &Config,
        pool: SqlitePool,
        ephemeral: Arc<dyn EphemeralTier>,
    ) -> Self {
        Self {
            ledger: CounterLedger::new(pool.clone()),
            store: TwoTierStore::new(
                ephemeral,
                pool,
                Duration::from_millis(config.history.durable_timeout_ms),
            ),
            tools: config.tools.clone(),
            default_limit: config.history.default_limit,
        }
    }

    /// Open the configured database and build an engine over it.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.db).await?;
        Ok(Self::new(config, pool))
    }

    pub fn tools(&self) -> &ToolsConfig {
        &self.tools
    }

    /// Handle to the ephemeral tier, for the external population path and
    /// for tests.
    pub fn ephemeral(&self) -> Arc<dyn EphemeralTier> {
        self.store.ephemeral()
    }

    /// Map a recorded tool name to its retrieval category.
    pub fn category_for_tool(&self, tool_name: &str) -> Option<SourceCategory> {
        if tool_name == self.tools.document_tool {
            Some(SourceCategory::Document)
        } else if tool_name == self.tools.web_tool {
            Some(SourceCategory::Web)
        } else if tool_name == self.tools.image_tool {
            Some(SourceCategory::Image)
        } else {
            None
        }
    }

    /// Normalize one raw tool result during live agent execution.
    ///
    /// See [`normalize::normalize_tool_result`] for the id-assignment and
    /// failure semantics.
    pub async fn on_tool_result(
        &self,
        key: &ConversationKey,
        category: SourceCategory,
        raw: Value,
        invocation_id: Option<&str>,
    ) -> Result<Value> {
        normalize::normalize_tool_result(&self.ledger, key, category, raw, invocation_id).await
    }

    /// Fetch the user-facing history, newest-first, truncated to `limit`
    /// (or the configured default).
    ///
    /// Never fails: every storage failure degrades to the closest
    /// renderable state, down to an empty list.
    pub async fn get_history(
        &self,
        key: &ConversationKey,
        limit: Option<usize>,
    ) -> Vec<UserMessage> {
        let snapshot = self.store.read(key).await;

        let side_table = if history::needs_side_table(&snapshot.messages) {
            self.store.read_side_table(key).await
        } else {
            Default::default()
        };

        history::reconstruct(
            &snapshot.messages,
            &side_table,
            &self.tools,
            limit.unwrap_or(self.default_limit),
        )
    }

    /// Reset a conversation: counters and every stored projection.
    ///
    /// Holds the conversation's counter slot for the whole operation, so a
    /// normalization racing the clear cannot observe half-cleared state or
    /// resurrect stale counters. Idempotent.
    pub async fn clear_conversation(&self, key: &ConversationKey) -> Result<()> {
        let slot = self.ledger.slot(key);
        let mut guard = slot.lock().await;
        self.ledger.clear_locked(&mut guard, key).await?;
        self.store.clear(key).await?;
        Ok(())
    }
}
