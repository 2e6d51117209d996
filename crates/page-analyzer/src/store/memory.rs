//! In-process tier backed by a sorted map.

use super::{DurableTier, SessionTier, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A key-value tier held in memory. Serves as the session tier of the daemon
/// and as the durable tier when persistence is disabled.
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn lookup(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }
}

#[async_trait]
impl DurableTier for MemoryTier {
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.insert(key, value)
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.lookup(key)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[async_trait]
impl SessionTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.lookup(key)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.insert(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_prefix_scan_stays_within_prefix() {
        let tier = MemoryTier::new();
        tier.put("archive:1", json!(1)).await.unwrap();
        tier.put("archive:2", json!(2)).await.unwrap();
        tier.put("archivex", json!(3)).await.unwrap();
        tier.put("run:1", json!(4)).await.unwrap();

        let keys: Vec<_> = tier
            .scan_prefix("archive:")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["archive:1", "archive:2"]);
        assert_eq!(tier.len(), 4);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let tier = MemoryTier::new();
        assert!(tier.is_empty());
        tier.set("last_result", json!({"a": 1})).await.unwrap();
        tier.set("last_result", json!({"a": 2})).await.unwrap();
        assert_eq!(
            SessionTier::get(&tier, "last_result").await.unwrap(),
            Some(json!({"a": 2}))
        );
    }
}
