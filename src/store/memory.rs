use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::CounterStore;
use crate::clock::Clock;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u64,
    expires_at_ms: u64,
}

impl WindowEntry {
    fn new(now_ms: u64, ttl: Duration) -> Self {
        Self {
            count: 0,
            expires_at_ms: now_ms + ttl.as_millis() as u64,
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Process-local counter store.
///
/// Entries are sharded by `DashMap`, so an increment only locks the shard
/// holding its key. Expired entries are reset lazily when touched and removed
/// by [`MemoryStore::prune_expired`].
#[derive(Debug)]
pub struct MemoryStore {
    counters: DashMap<(String, u64), WindowEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    /// Drop every expired counter, returning how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.counters.len();
        self.counters.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.counters.len())
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_and_get(&self, key: &str, window: u64, ttl: Duration) -> Result<u64> {
        let now = self.clock.now_ms();
        let mut entry = self
            .counters
            .entry((key.to_string(), window))
            .or_insert_with(|| WindowEntry::new(now, ttl));

        if entry.is_expired(now) {
            *entry = WindowEntry::new(now, ttl);
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn get(&self, key: &str, window: u64) -> Result<u64> {
        let now = self.clock.now_ms();
        Ok(self
            .counters
            .get(&(key.to_string(), window))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    async fn reset(&self, key: &str, window: u64) -> Result<()> {
        self.counters.remove(&(key.to_string(), window));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
