//! Disk-backed content-addressed result cache.
//!
//! Writers go through a temp sibling file, then an atomic rename into
//! place. `store` is therefore idempotent for a given key — concurrent
//! writers converge on one of the (equal, by construction) values.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::value::Value;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn lookup(&self, key: &str) -> Option<Value>;
    async fn store(&self, key: &str, value: &Value);
    async fn has(&self, key: &str) -> bool;
}

/// Cache disabled — no directory configured. Every operation is a no-op.
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn lookup(&self, _key: &str) -> Option<Value> {
        None
    }

    async fn store(&self, _key: &str, _value: &Value) {}

    async fn has(&self, _key: &str) -> bool {
        false
    }
}

/// Flat directory of `<fingerprint>.v1` files, each the canonicalized
/// JSON serialization of the result. Temp files are named
/// `<fingerprint>.v1.tmp.<nonce>` and renamed into place on completion.
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.v1"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let nonce = Uuid::new_v4();
        self.dir.join(format!("{key}.v1.tmp.{nonce}"))
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn lookup(&self, key: &str) -> Option<Value> {
        // Any read error — missing file, I/O error, corrupt JSON — is
        // treated as a miss rather than failing the task.
        let path = self.entry_path(key);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "cache read failed, treating as miss");
                }
                return None;
            }
        };
        match serde_json::from_str::<serde_json::Value>(&data) {
            Ok(json) => Value::from_json(&json).ok(),
            Err(e) => {
                warn!(key = %key, error = %e, "cache entry corrupt, treating as miss");
                None
            }
        }
    }

    async fn store(&self, key: &str, value: &Value) {
        if let Err(e) = self.store_inner(key, value).await {
            // Logged but never fails the task — the result was already
            // produced successfully.
            warn!(key = %key, error = %e, "cache write failed");
        }
    }

    async fn has(&self, key: &str) -> bool {
        tokio::fs::metadata(self.entry_path(key)).await.is_ok()
    }
}

impl DiskCache {
    async fn store_inner(&self, key: &str, value: &Value) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.temp_path(key);
        let data = serde_json::to_string(&value.to_json())?;
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, self.entry_path(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_then_store_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        assert!(!cache.has("k1").await);
        assert!(cache.lookup("k1").await.is_none());

        cache.store("k1", &Value::Int(42)).await;
        assert!(cache.has("k1").await);
        assert_eq!(cache.lookup("k1").await, Some(Value::Int(42)));
    }

    #[tokio::test]
    async fn no_cache_is_always_a_miss() {
        let cache = NoCache;
        cache.store("k1", &Value::Int(1)).await;
        assert!(!cache.has("k1").await);
        assert!(cache.lookup("k1").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_reads_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("bad.v1"), b"not json")
            .await
            .unwrap();
        let cache = DiskCache::new(dir.path());
        assert!(cache.lookup("bad").await.is_none());
    }
}
