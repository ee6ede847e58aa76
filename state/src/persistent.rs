//! Persistent key-value store backed by sled

use async_trait::async_trait;
use sled::{Db, Tree};
use sluice_core::{KvStore, SluiceError, SluiceResult};
use std::path::Path;
use tracing::info;

const CHANNELS_TREE: &str = "channels";

/// `KvStore` over a sled tree
#[derive(Clone)]
pub struct SledKv {
    db: Db,
    tree: Tree,
}

fn storage_err(e: sled::Error) -> SluiceError {
    SluiceError::StorageError(e.to_string())
}

impl SledKv {
    pub fn open<P: AsRef<Path>>(path: P) -> SluiceResult<Self> {
        let db = sled::open(path.as_ref()).map_err(storage_err)?;
        let tree = db.open_tree(CHANNELS_TREE).map_err(storage_err)?;
        info!(path = %path.as_ref().display(), entries = tree.len(), "opened channel database");
        Ok(Self { db, tree })
    }

    /// Throwaway database removed on drop
    pub fn temporary() -> SluiceResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        let tree = db.open_tree(CHANNELS_TREE).map_err(storage_err)?;
        Ok(Self { db, tree })
    }

    pub async fn flush(&self) -> SluiceResult<()> {
        self.db.flush_async().await.map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for SledKv {
    async fn get(&self, key: &[u8]) -> SluiceResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key).map_err(storage_err)?.map(|v| v.to_vec()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> SluiceResult<()> {
        self.tree.insert(key, value).map_err(storage_err)?;
        self.flush().await
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> SluiceResult<bool> {
        let swapped = self
            .tree
            .compare_and_swap(key, expected, Some(value))
            .map_err(storage_err)?
            .is_ok();
        if swapped {
            self.flush().await?;
        }
        Ok(swapped)
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> SluiceResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree
            .scan_prefix(prefix)
            .map(|entry| {
                entry
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(storage_err)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("channels.db");
        {
            let kv = SledKv::open(&path).unwrap();
            kv.put(b"channel:1", b"state").await.unwrap();
        }
        let kv = SledKv::open(&path).unwrap();
        assert_eq!(kv.get(b"channel:1").await.unwrap(), Some(b"state".to_vec()));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let kv = SledKv::temporary().unwrap();
        assert!(kv.compare_and_swap(b"k", None, b"v1").await.unwrap());
        assert!(!kv.compare_and_swap(b"k", None, b"v2").await.unwrap());
        assert!(kv.compare_and_swap(b"k", Some(b"v1"), b"v2").await.unwrap());
        assert_eq!(kv.get(b"k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let kv = SledKv::temporary().unwrap();
        kv.put(b"tx:a:2", b"2").await.unwrap();
        kv.put(b"tx:a:1", b"1").await.unwrap();
        kv.put(b"tx:b:1", b"x").await.unwrap();
        let values: Vec<_> = kv
            .scan_prefix(b"tx:a:")
            .await
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
    }
}
