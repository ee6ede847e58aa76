//! In-memory key-value store for tests and ephemeral channels

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sluice_core::{KvStore, SluiceResult};

/// `KvStore` held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryKv {
    data: DashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Clone for MemoryKv {
    fn clone(&self) -> Self {
        let copy = Self::new();
        for entry in self.data.iter() {
            copy.data.insert(entry.key().clone(), entry.value().clone());
        }
        copy
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &[u8]) -> SluiceResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> SluiceResult<()> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> SluiceResult<bool> {
        // the entry guard holds the shard lock across compare and write
        match self.data.entry(key.to_vec()) {
            Entry::Occupied(mut occupied) => {
                if expected != Some(occupied.get().as_slice()) {
                    return Ok(false);
                }
                occupied.insert(value.to_vec());
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(value.to_vec());
                Ok(true)
            }
        }
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> SluiceResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_put() {
        let kv = MemoryKv::new();
        assert!(kv.is_empty());
        kv.put(b"a", b"1").await.unwrap();
        assert_eq!(kv.get(b"a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get(b"b").await.unwrap(), None);
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let kv = MemoryKv::new();
        assert!(kv.compare_and_swap(b"k", None, b"v1").await.unwrap());
        assert!(!kv.compare_and_swap(b"k", None, b"v2").await.unwrap());
        assert!(!kv.compare_and_swap(b"k", Some(b"zz"), b"v2").await.unwrap());
        assert!(kv.compare_and_swap(b"k", Some(b"v1"), b"v2").await.unwrap());
        assert_eq!(kv.get(b"k").await.unwrap(), Some(b"v2".to_vec()));
        assert!(!kv.compare_and_swap(b"missing", Some(b"v1"), b"x").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_prefix_sorted() {
        let kv = MemoryKv::new();
        kv.put(b"p:2", b"b").await.unwrap();
        kv.put(b"q:1", b"x").await.unwrap();
        kv.put(b"p:1", b"a").await.unwrap();

        let entries = kv.scan_prefix(b"p:").await.unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"p:1".as_slice(), b"p:2".as_slice()]);
    }
}
