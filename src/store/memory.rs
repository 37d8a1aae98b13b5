//! In-memory [`EphemeralTier`] implementation.
//!
//! Payloads live behind `Arc<str>` inside a `std::sync::RwLock`'d map, so a
//! put replaces the whole value in one swap: concurrent readers see either
//! the previous snapshot or the new one, never a torn write. A bounded entry
//! count evicts the oldest-inserted conversation first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use super::EphemeralTier;

struct Inner {
    entries: HashMap<String, Arc<str>>,
    insertion_order: VecDeque<String>,
}

/// In-memory ephemeral tier for single-process deployments and tests.
pub struct InMemoryTier {
    inner: RwLock<Inner>,
    max_entries: usize,
}

impl InMemoryTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EphemeralTier for InMemoryTier {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.entries.get(key).map(|payload| payload.to_string()))
    }

    async fn put(&self, key: &str, payload: String) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let payload: Arc<str> = payload.into();

        if inner.entries.insert(key.to_string(), payload).is_none() {
            inner.insertion_order.push_back(key.to_string());
            while inner.entries.len() > self.max_entries {
                if let Some(evicted) = inner.insertion_order.pop_front() {
                    inner.entries.remove(&evicted);
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entries.remove(key);
        inner.insertion_order.retain(|k| k != key);
        Ok(())
    }
}
