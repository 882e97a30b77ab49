use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::cache::CacheLayer;
use crate::types::{CacheEntry, Result};

/// In-process layer backed by a sharded concurrent map.
#[derive(Debug)]
pub struct MemoryCacheLayer<V> {
    name: String,
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V> MemoryCacheLayer<V> {
    pub fn new() -> Self {
        Self::with_name("memory")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl<V> Default for MemoryCacheLayer<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> CacheLayer<V> for MemoryCacheLayer<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, entry: CacheEntry<V>) -> Result<()> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        debug!("Memory layer '{}' removed {} expired entries", self.name, removed);
        Ok(removed)
    }
}
