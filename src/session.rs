//! Per-user session state
//!
//! Everything here is process-local and lost on restart: pending
//! prompts, rate counters, and menu message handles. Users simply
//! re-trigger the menu after a restart.
//!
//! The registry hands out one `Arc<Mutex<UserSession>>` per uid. The
//! controller holds that lock for the whole inbound event, which gives
//! each user an illusion of sequentiality: two near-simultaneous
//! messages cannot both consume the same awaiting slot or both slip
//! past the rate limit, while different users run fully in parallel.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// The single pending multi-step action a user may have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitingAction {
    Buy,
    Sell,
    SlipBuy,
    SlipSell,
    WithdrawalAddress,
    WithdrawSol,
    WithdrawTokens,
    BurnTokens,
}

/// Ephemeral per-user state
#[derive(Debug)]
pub struct UserSession {
    /// At most one pending prompt; consumed exactly once
    pub awaiting: Option<AwaitingAction>,

    /// Sliding rate window start
    pub window_start: Instant,

    /// Events counted in the current window
    pub window_count: u32,

    /// Last rendered menu message, for in-place edits
    pub menu_msg: Option<i64>,
}

impl Default for UserSession {
    fn default() -> Self {
        Self {
            awaiting: None,
            window_start: Instant::now(),
            window_count: 0,
            menu_msg: None,
        }
    }
}

impl UserSession {
    /// Take the pending action, clearing the slot atomically
    pub fn consume_awaiting(&mut self) -> Option<AwaitingAction> {
        self.awaiting.take()
    }
}

/// Registry of per-user sessions plus the process-wide pool blacklist
pub struct SessionRegistry {
    sessions: DashMap<i64, Arc<Mutex<UserSession>>>,
    // Pools that failed at execution time this run; grows monotonically
    excluded_pools: std::sync::Mutex<Vec<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            excluded_pools: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get or lazily create the session for a uid
    pub fn session(&self, uid: i64) -> Arc<Mutex<UserSession>> {
        self.sessions
            .entry(uid)
            .or_insert_with(|| Arc::new(Mutex::new(UserSession::default())))
            .clone()
    }

    /// Snapshot of the excluded pools
    pub fn excluded_pools(&self) -> Vec<String> {
        self.excluded_pools.lock().unwrap().clone()
    }

    /// Blacklist a pool for the rest of the run
    pub fn exclude_pool(&self, pool: &str) {
        let mut pools = self.excluded_pools.lock().unwrap();
        if !pools.iter().any(|p| p == pool) {
            pools.push(pool.to_string());
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_is_per_uid() {
        let registry = SessionRegistry::new();

        registry.session(1).lock().await.awaiting = Some(AwaitingAction::Buy);

        assert!(registry.session(2).lock().await.awaiting.is_none());
        assert_eq!(
            registry.session(1).lock().await.awaiting,
            Some(AwaitingAction::Buy)
        );
    }

    #[tokio::test]
    async fn test_consume_awaiting_is_exactly_once() {
        let registry = SessionRegistry::new();
        let session = registry.session(1);

        let mut guard = session.lock().await;
        guard.awaiting = Some(AwaitingAction::Sell);
        assert_eq!(guard.consume_awaiting(), Some(AwaitingAction::Sell));
        assert_eq!(guard.consume_awaiting(), None);
    }

    #[test]
    fn test_excluded_pools_grow_without_duplicates() {
        let registry = SessionRegistry::new();
        registry.exclude_pool("A");
        registry.exclude_pool("B");
        registry.exclude_pool("A");
        assert_eq!(registry.excluded_pools(), vec!["A", "B"]);
    }
}
