//! Durable storage for ban records.
//!
//! The penalty manager keeps bans in memory and writes every new ban through
//! to a [`BanStore`], reading it back on startup and on cache misses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{GatekeeperError, Result};

/// A persisted ban.
///
/// Invariant: `expires_at_ms > created_at_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub identifier: String,
    pub reason: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl BanRecord {
    pub fn is_active(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }

    /// Time left on the ban, zero once expired.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at_ms.saturating_sub(now_ms)
    }
}

/// Trait for ban persistence backends.
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait BanStore: Send + Sync {
    /// Fetch the ban for an identifier, if one was persisted.
    async fn load(&self, identifier: &str) -> Result<Option<BanRecord>>;

    /// Insert or replace the ban for `record.identifier`.
    async fn save(&self, record: &BanRecord) -> Result<()>;

    /// Delete the ban for an identifier. Missing records are not an error.
    async fn remove(&self, identifier: &str) -> Result<()>;

    /// Every persisted ban, expired or not.
    async fn load_all(&self) -> Result<Vec<BanRecord>>;
}

/// Ban store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryBanStore {
    records: DashMap<String, BanRecord>,
}

impl MemoryBanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BanStore for MemoryBanStore {
    async fn load(&self, identifier: &str) -> Result<Option<BanRecord>> {
        Ok(self.records.get(identifier).map(|r| r.value().clone()))
    }

    async fn save(&self, record: &BanRecord) -> Result<()> {
        self.records.insert(record.identifier.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, identifier: &str) -> Result<()> {
        self.records.remove(identifier);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<BanRecord>> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BanDocument {
    #[serde(default)]
    bans: Vec<BanRecord>,
}

/// Ban store mirrored to a JSON file.
///
/// The whole document is rewritten on every change through a temporary file
/// and a rename, so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileBanStore {
    path: PathBuf,
    mirror: Mutex<HashMap<String, BanRecord>>,
}

impl FileBanStore {
    /// Open the store, reading existing bans if the file is present.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mirror = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => {
                let document: BanDocument = serde_json::from_slice(&bytes)?;
                document
                    .bans
                    .into_iter()
                    .map(|r| (r.identifier.clone(), r))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), bans = mirror.len(), "Opened ban store");

        Ok(Self {
            path,
            mirror: Mutex::new(mirror),
        })
    }

    fn persist_error(&self, e: std::io::Error) -> GatekeeperError {
        GatekeeperError::Store(format!(
            "failed to persist bans to {}: {}",
            self.path.display(),
            e
        ))
    }

    async fn flush(&self, records: &HashMap<String, BanRecord>) -> Result<()> {
        let mut bans: Vec<BanRecord> = records.values().cloned().collect();
        bans.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        let bytes = serde_json::to_vec_pretty(&BanDocument { bans })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.persist_error(e))?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| self.persist_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.persist_error(e))?;

        debug!(path = %self.path.display(), bans = records.len(), "Flushed ban store");
        Ok(())
    }
}

#[async_trait]
impl BanStore for FileBanStore {
    async fn load(&self, identifier: &str) -> Result<Option<BanRecord>> {
        Ok(self.mirror.lock().await.get(identifier).cloned())
    }

    async fn save(&self, record: &BanRecord) -> Result<()> {
        let mut mirror = self.mirror.lock().await;
        mirror.insert(record.identifier.clone(), record.clone());
        self.flush(&mirror).await
    }

    async fn remove(&self, identifier: &str) -> Result<()> {
        let mut mirror = self.mirror.lock().await;
        if mirror.remove(identifier).is_some() {
            self.flush(&mirror).await?;
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<BanRecord>> {
        Ok(self.mirror.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn record(identifier: &str, expires_at_ms: u64) -> BanRecord {
        BanRecord {
            identifier: identifier.to_string(),
            reason: "security_ban".to_string(),
            created_at_ms: 1_000,
            expires_at_ms,
        }
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("gatekeeper-{}", uuid::Uuid::new_v4()))
            .join("bans.json")
    }

    #[test]
    fn test_ban_record_expiry() {
        let ban = record("client", 5_000);
        assert!(ban.is_active(4_999));
        assert!(!ban.is_active(5_000));
        assert_eq!(ban.remaining_ms(4_000), 1_000);
        assert_eq!(ban.remaining_ms(9_000), 0);
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryBanStore::new();
        assert_eq!(store.load("client").await.unwrap(), None);

        assert_ok!(store.save(&record("client", 5_000)).await);
        assert_eq!(store.load("client").await.unwrap(), Some(record("client", 5_000)));
        assert_eq!(store.load_all().await.unwrap().len(), 1);

        assert_ok!(store.remove("client").await);
        assert_ok!(store.remove("client").await);
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let path = temp_path();

        {
            let store = FileBanStore::open(&path).await.unwrap();
            store.save(&record("a", 5_000)).await.unwrap();
            store.save(&record("b", 6_000)).await.unwrap();
            store.remove("a").await.unwrap();
        }

        let reopened = FileBanStore::open(&path).await.unwrap();
        let all = reopened.load_all().await.unwrap();
        assert_eq!(all, vec![record("b", 6_000)]);
        assert_eq!(reopened.load("a").await.unwrap(), None);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_file_store_reports_write_failures() {
        let path = temp_path();
        let store = FileBanStore::open(&path).await.unwrap();
        // A directory squatting on the temporary file blocks the write
        std::fs::create_dir_all(path.with_extension("json.tmp")).unwrap();

        let err = store.save(&record("client", 5_000)).await.unwrap_err();
        assert!(matches!(err, crate::error::GatekeeperError::Store(_)));
        assert!(err.to_string().contains("bans.json"));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let err = FileBanStore::open(&path).await.unwrap_err();
        assert!(matches!(err, crate::error::GatekeeperError::Serialization(_)));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
