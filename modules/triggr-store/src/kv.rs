//! Thin adapter over sled. Single owner of the on-disk state; exposes
//! ordered point reads, prefix scans, and atomic batches.

use std::path::Path;

use triggr_common::{Result, TriggrError};

/// One operation inside an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered byte-key/byte-value engine. All failures surface as
/// `TriggrError::Storage`; the enclosing request fails, the node stays up.
pub struct KvEngine {
    db: sled::Db,
}

impl KvEngine {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        Ok(Self { db })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key).map_err(storage_err)?.map(|v| v.to_vec()))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value).map_err(storage_err)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key).map_err(storage_err)?;
        Ok(())
    }

    /// All pairs whose key starts with `prefix`, in ascending key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item.map_err(storage_err)?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Apply a batch atomically and fsync before returning. A batch that
    /// returned Ok is durable.
    pub async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.insert(key, value),
                BatchOp::Delete { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch).map_err(storage_err)?;
        self.db.flush_async().await.map_err(storage_err)?;
        Ok(())
    }

    /// Flush any buffered writes. Used on shutdown.
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(storage_err)?;
        Ok(())
    }
}

fn storage_err(e: sled::Error) -> TriggrError {
    TriggrError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> KvEngine {
        let dir = tempfile::tempdir().unwrap();
        KvEngine::open(dir.keep()).unwrap()
    }

    #[test]
    fn put_get_delete() {
        let kv = engine();
        kv.put(b"a", b"1").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
        kv.delete(b"a").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), None);
    }

    #[test]
    fn scan_prefix_is_ordered_and_scoped() {
        let kv = engine();
        kv.put(b"doc/p/users/b", b"2").unwrap();
        kv.put(b"doc/p/users/a", b"1").unwrap();
        kv.put(b"doc/p/txns/a", b"x").unwrap();

        let pairs = kv.scan_prefix(b"doc/p/users/").unwrap();
        let keys: Vec<_> = pairs.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"doc/p/users/a"[..], &b"doc/p/users/b"[..]]);
    }

    #[tokio::test]
    async fn batch_applies_all_or_nothing_visibly() {
        let kv = engine();
        kv.put(b"k1", b"old").unwrap();
        kv.apply_batch(vec![
            BatchOp::Put {
                key: b"k1".to_vec(),
                value: b"new".to_vec(),
            },
            BatchOp::Put {
                key: b"k2".to_vec(),
                value: b"v".to_vec(),
            },
            BatchOp::Delete { key: b"k3".to_vec() },
        ])
        .await
        .unwrap();

        assert_eq!(kv.get(b"k1").unwrap(), Some(b"new".to_vec()));
        assert_eq!(kv.get(b"k2").unwrap(), Some(b"v".to_vec()));
    }
}
