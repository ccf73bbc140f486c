//! Wallet store - durable per-user wallet records
//!
//! Every read-modify-write against the backend runs under one global
//! lock. The lock is held only across the backend round-trip, never
//! across a router call, so two concurrent operations can never persist
//! interleaved token lists or balances. Coarser than strictly needed,
//! and deliberately so.

pub mod backend;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::WalletDefaultsConfig;
use crate::error::{Error, Result};

use backend::WalletBackend;
use types::{PriorityLevel, TokenUpdate, UserIdentity, WalletRecord};

/// Which slippage side a settings update targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlipSide {
    Buy,
    Sell,
}

/// Serialized-access store of wallet records
pub struct WalletStore {
    backend: Arc<dyn WalletBackend>,
    defaults: WalletDefaultsConfig,
    // Global mutual exclusion for all record mutation
    lock: Mutex<()>,
}

impl WalletStore {
    pub fn new(backend: Arc<dyn WalletBackend>, defaults: WalletDefaultsConfig) -> Self {
        Self {
            backend,
            defaults,
            lock: Mutex::new(()),
        }
    }

    /// Fetch a wallet record
    pub async fn get(&self, uid: i64) -> Result<Option<WalletRecord>> {
        let _guard = self.lock.lock().await;
        self.backend.load(uid).await
    }

    /// Create a wallet for `uid` from a freshly ground keypair.
    ///
    /// Fails if a record already exists; a user gets exactly one keypair.
    pub async fn create(&self, uid: i64, pubkey: String, privkey: String) -> Result<WalletRecord> {
        let _guard = self.lock.lock().await;

        if self.backend.load(uid).await?.is_some() {
            return Err(Error::Store(format!("Wallet already exists for {}", uid)));
        }

        let record = WalletRecord {
            uid,
            pubkey,
            privkey,
            balance: 0.0,
            tokens: vec![],
            priority_level: PriorityLevel::parse(&self.defaults.priority_level)
                .unwrap_or_default(),
            buy_slip: self.defaults.buy_slip_pct,
            sell_slip: self.defaults.sell_slip_pct,
            withdraw_to: String::new(),
            created_at: Utc::now(),
        };

        self.backend.save(&record).await?;
        info!("Created wallet {} for user {}", record.pubkey, uid);
        Ok(record)
    }

    /// Overwrite the cached SOL balance
    pub async fn update_balance(&self, uid: i64, balance: f64) -> Result<()> {
        self.mutate(uid, |record| {
            record.balance = balance;
        })
        .await
    }

    /// Merge token updates by mint key.
    ///
    /// Existing entries keep their `dex`/`pool` when the update omits
    /// them; unknown mints are inserted. The merge is idempotent.
    pub async fn update_tokens(&self, uid: i64, updates: &[TokenUpdate]) -> Result<()> {
        self.mutate(uid, |record| {
            let mut by_mint: BTreeMap<String, types::TokenHolding> = record
                .tokens
                .drain(..)
                .map(|t| (t.mint.clone(), t))
                .collect();

            for update in updates {
                match by_mint.get_mut(&update.mint) {
                    Some(existing) => {
                        existing.balance = update.balance;
                        if let Some(dex) = &update.dex {
                            existing.dex = dex.clone();
                        }
                        if let Some(pool) = &update.pool {
                            existing.pool = pool.clone();
                        }
                    }
                    None => {
                        by_mint.insert(
                            update.mint.clone(),
                            types::TokenHolding {
                                mint: update.mint.clone(),
                                balance: update.balance,
                                dex: update.dex.clone().unwrap_or_default(),
                                pool: update.pool.clone().unwrap_or_default(),
                            },
                        );
                    }
                }
            }

            record.tokens = by_mint.into_values().collect();
        })
        .await
    }

    /// Drop a token entry entirely
    pub async fn remove_token(&self, uid: i64, mint: &str) -> Result<()> {
        self.mutate(uid, |record| {
            record.tokens.retain(|t| t.mint != mint);
        })
        .await
    }

    pub async fn update_priority_level(&self, uid: i64, level: PriorityLevel) -> Result<()> {
        self.mutate(uid, |record| {
            record.priority_level = level;
        })
        .await
    }

    pub async fn update_slippage(&self, uid: i64, side: SlipSide, pct: f64) -> Result<()> {
        self.mutate(uid, move |record| match side {
            SlipSide::Buy => record.buy_slip = pct,
            SlipSide::Sell => record.sell_slip = pct,
        })
        .await
    }

    pub async fn update_withdraw_address(&self, uid: i64, address: String) -> Result<()> {
        self.mutate(uid, move |record| {
            record.withdraw_to = address.clone();
        })
        .await
    }

    /// Remove a wallet record entirely (not part of the normal flow)
    pub async fn remove(&self, uid: i64) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.backend.delete(uid).await
    }

    /// Cache an identity on first contact
    pub async fn cache_identity(&self, uid: i64, username: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.backend
            .save_identity(&UserIdentity {
                uid,
                username: username.to_string(),
                created_at: Utc::now(),
            })
            .await
    }

    pub async fn get_identity(&self, uid: i64) -> Result<Option<UserIdentity>> {
        let _guard = self.lock.lock().await;
        self.backend.load_identity(uid).await
    }

    /// One transactional read-modify-write unit
    async fn mutate<F>(&self, uid: i64, apply: F) -> Result<()>
    where
        F: FnOnce(&mut WalletRecord),
    {
        let _guard = self.lock.lock().await;

        let mut record = self
            .backend
            .load(uid)
            .await?
            .ok_or(Error::WalletMissing(uid))?;

        apply(&mut record);

        if let Err(e) = self.backend.save(&record).await {
            warn!("Wallet {} write failed: {}", uid, e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::backend::MemoryBackend;
    use super::*;

    fn store() -> WalletStore {
        WalletStore::new(Arc::new(MemoryBackend::new()), WalletDefaultsConfig::default())
    }

    #[tokio::test]
    async fn test_create_is_exactly_once() {
        let store = store();
        store.create(1, "pk".into(), "sk".into()).await.unwrap();
        assert!(store.create(1, "pk2".into(), "sk2".into()).await.is_err());

        let record = store.get(1).await.unwrap().unwrap();
        assert_eq!(record.pubkey, "pk");
        assert_eq!(record.priority_level, PriorityLevel::Medium);
        assert_eq!(record.buy_slip, 10.0);
    }

    #[tokio::test]
    async fn test_update_tokens_merge_is_idempotent() {
        let store = store();
        store.create(1, "pk".into(), "sk".into()).await.unwrap();

        let update = [TokenUpdate::full("M1", 5.0, "raydium", "P1")];
        store.update_tokens(1, &update).await.unwrap();
        store.update_tokens(1, &update).await.unwrap();

        let record = store.get(1).await.unwrap().unwrap();
        assert_eq!(record.tokens.len(), 1);
        assert_eq!(record.tokens[0].balance, 5.0);
        assert_eq!(record.tokens[0].pool, "P1");
    }

    #[tokio::test]
    async fn test_partial_update_preserves_dex_and_pool() {
        let store = store();
        store.create(1, "pk".into(), "sk".into()).await.unwrap();

        store
            .update_tokens(1, &[TokenUpdate::full("M1", 5.0, "raydium", "P1")])
            .await
            .unwrap();
        store
            .update_tokens(1, &[TokenUpdate::balance_only("M1", 2.5)])
            .await
            .unwrap();

        let record = store.get(1).await.unwrap().unwrap();
        assert_eq!(record.tokens[0].balance, 2.5);
        assert_eq!(record.tokens[0].dex, "raydium");
        assert_eq!(record.tokens[0].pool, "P1");
    }

    #[tokio::test]
    async fn test_no_duplicate_mints() {
        let store = store();
        store.create(1, "pk".into(), "sk".into()).await.unwrap();

        store
            .update_tokens(
                1,
                &[
                    TokenUpdate::balance_only("M1", 1.0),
                    TokenUpdate::balance_only("M1", 2.0),
                    TokenUpdate::balance_only("M2", 3.0),
                ],
            )
            .await
            .unwrap();

        let record = store.get(1).await.unwrap().unwrap();
        assert_eq!(record.tokens.len(), 2);
        assert_eq!(record.token("M1").unwrap().balance, 2.0);
    }

    #[tokio::test]
    async fn test_remove_token() {
        let store = store();
        store.create(1, "pk".into(), "sk".into()).await.unwrap();
        store
            .update_tokens(1, &[TokenUpdate::balance_only("M1", 1.0)])
            .await
            .unwrap();

        store.remove_token(1, "M1").await.unwrap();
        assert!(store.get(1).await.unwrap().unwrap().tokens.is_empty());
    }

    #[tokio::test]
    async fn test_mutate_missing_wallet_fails() {
        let store = store();
        let err = store.update_balance(99, 1.0).await.unwrap_err();
        assert!(matches!(err, Error::WalletMissing(99)));
    }

    #[tokio::test]
    async fn test_concurrent_merges_lose_no_updates() {
        let store = Arc::new(store());
        store.create(1, "pk".into(), "sk".into()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_tokens(1, &[TokenUpdate::balance_only(format!("M{}", i), 1.0)])
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get(1).await.unwrap().unwrap();
        assert_eq!(record.tokens.len(), 16);
    }

    #[tokio::test]
    async fn test_identity_cached_on_first_contact() {
        let store = store();
        assert!(store.get_identity(7).await.unwrap().is_none());

        store.cache_identity(7, "alice").await.unwrap();
        let identity = store.get_identity(7).await.unwrap().unwrap();
        assert_eq!(identity.uid, 7);
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn test_update_slippage_sides_independent() {
        let store = store();
        store.create(1, "pk".into(), "sk".into()).await.unwrap();

        store.update_slippage(1, SlipSide::Buy, 15.0).await.unwrap();
        let record = store.get(1).await.unwrap().unwrap();
        assert_eq!(record.buy_slip, 15.0);
        assert_eq!(record.sell_slip, 10.0);
    }
}
