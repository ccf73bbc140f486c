//! Storage backends for wallet records
//!
//! The store only needs a keyed record abstraction; the default backend
//! keeps one JSON file per user under the data directory.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

use super::types::{UserIdentity, WalletRecord};

/// Keyed persistence for wallet and identity records
#[async_trait]
pub trait WalletBackend: Send + Sync {
    async fn load(&self, uid: i64) -> Result<Option<WalletRecord>>;
    async fn save(&self, record: &WalletRecord) -> Result<()>;
    async fn delete(&self, uid: i64) -> Result<()>;
    async fn load_identity(&self, uid: i64) -> Result<Option<UserIdentity>>;
    async fn save_identity(&self, identity: &UserIdentity) -> Result<()>;
}

/// JSON-file backend, one record per file
pub struct JsonFileBackend {
    wallets_dir: PathBuf,
    identities_dir: PathBuf,
}

impl JsonFileBackend {
    /// Create a backend rooted at `data_dir`, creating subdirectories
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let root = data_dir.into();
        let wallets_dir = root.join("wallets");
        let identities_dir = root.join("identities");

        tokio::fs::create_dir_all(&wallets_dir)
            .await
            .map_err(|e| Error::Store(format!("Failed to create {:?}: {}", wallets_dir, e)))?;
        tokio::fs::create_dir_all(&identities_dir)
            .await
            .map_err(|e| Error::Store(format!("Failed to create {:?}: {}", identities_dir, e)))?;

        Ok(Self {
            wallets_dir,
            identities_dir,
        })
    }

    fn wallet_path(&self, uid: i64) -> PathBuf {
        self.wallets_dir.join(format!("{}.json", uid))
    }

    fn identity_path(&self, uid: i64) -> PathBuf {
        self.identities_dir.join(format!("{}.json", uid))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<Option<T>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let value = serde_json::from_str(&content)
                    .map_err(|e| Error::Store(format!("Corrupt record {:?}: {}", path, e)))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Store(format!("Failed to read {:?}: {}", path, e))),
        }
    }

    async fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| Error::Store(format!("Failed to serialize record: {}", e)))?;

        // Write to a sibling temp file first so a crash mid-write cannot
        // truncate the live record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Store(format!("Failed to write {:?}: {}", tmp, e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::Store(format!("Failed to persist {:?}: {}", path, e)))?;

        debug!("Persisted {:?}", path);
        Ok(())
    }
}

#[async_trait]
impl WalletBackend for JsonFileBackend {
    async fn load(&self, uid: i64) -> Result<Option<WalletRecord>> {
        Self::read_json(&self.wallet_path(uid)).await
    }

    async fn save(&self, record: &WalletRecord) -> Result<()> {
        Self::write_json(&self.wallet_path(record.uid), record).await
    }

    async fn delete(&self, uid: i64) -> Result<()> {
        match tokio::fs::remove_file(self.wallet_path(uid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Store(format!("Failed to delete wallet {}: {}", uid, e))),
        }
    }

    async fn load_identity(&self, uid: i64) -> Result<Option<UserIdentity>> {
        Self::read_json(&self.identity_path(uid)).await
    }

    async fn save_identity(&self, identity: &UserIdentity) -> Result<()> {
        Self::write_json(&self.identity_path(identity.uid), identity).await
    }
}

/// In-memory backend for tests
#[cfg(test)]
pub struct MemoryBackend {
    wallets: std::sync::Mutex<std::collections::HashMap<i64, WalletRecord>>,
    identities: std::sync::Mutex<std::collections::HashMap<i64, UserIdentity>>,
}

#[cfg(test)]
impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            wallets: std::sync::Mutex::new(std::collections::HashMap::new()),
            identities: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl WalletBackend for MemoryBackend {
    async fn load(&self, uid: i64) -> Result<Option<WalletRecord>> {
        Ok(self.wallets.lock().unwrap().get(&uid).cloned())
    }

    async fn save(&self, record: &WalletRecord) -> Result<()> {
        self.wallets
            .lock()
            .unwrap()
            .insert(record.uid, record.clone());
        Ok(())
    }

    async fn delete(&self, uid: i64) -> Result<()> {
        self.wallets.lock().unwrap().remove(&uid);
        Ok(())
    }

    async fn load_identity(&self, uid: i64) -> Result<Option<UserIdentity>> {
        Ok(self.identities.lock().unwrap().get(&uid).cloned())
    }

    async fn save_identity(&self, identity: &UserIdentity) -> Result<()> {
        self.identities
            .lock()
            .unwrap()
            .insert(identity.uid, identity.clone());
        Ok(())
    }
}
