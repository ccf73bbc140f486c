//! Admission guard - denylist, sliding-window rate limit, membership
//!
//! Runs on every inbound event before any dispatch. The caller must
//! hold the uid's session lock so the window update is atomic.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lazy_static::lazy_static;
use tracing::debug;

use crate::session::UserSession;

lazy_static! {
    /// Chat ids silenced unconditionally (known noisy group relays)
    static ref BUILTIN_DENYLIST: HashSet<i64> = {
        let mut set = HashSet::new();
        // Telegram's anonymous group-admin sender id
        set.insert(1_087_968_824);
        set
    };
}

/// Admission verdict for an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    GroupChat,
    RateLimit,
    NotMember,
}

/// Pluggable membership check against the hosting context
#[async_trait]
pub trait MembershipCheck: Send + Sync {
    async fn is_member(&self, uid: i64) -> bool;
}

/// Default membership check: everyone is a member
pub struct OpenMembership;

#[async_trait]
impl MembershipCheck for OpenMembership {
    async fn is_member(&self, _uid: i64) -> bool {
        true
    }
}

/// Per-user admission control
pub struct AdmissionGuard {
    window: Duration,
    limit: u32,
    denylist: HashSet<i64>,
    membership: Arc<dyn MembershipCheck>,
}

impl AdmissionGuard {
    pub fn new(
        window: Duration,
        limit: u32,
        extra_denylist: &[i64],
        membership: Arc<dyn MembershipCheck>,
    ) -> Self {
        let mut denylist = BUILTIN_DENYLIST.clone();
        denylist.extend(extra_denylist.iter().copied());
        Self {
            window,
            limit,
            denylist,
            membership,
        }
    }

    /// Check whether a uid may act right now.
    ///
    /// Denylisted ids are rejected without touching the rate window.
    /// Otherwise the window is updated first and the limit is evaluated
    /// against the pre-increment count, so exactly `limit` events pass
    /// per window and the next one is rejected.
    pub async fn check(&self, uid: i64, session: &mut UserSession, now: Instant) -> Verdict {
        if self.denylist.contains(&uid) {
            return Verdict::GroupChat;
        }

        if now.duration_since(session.window_start) > self.window {
            session.window_start = now;
            session.window_count = 0;
        }
        let prior = session.window_count;
        session.window_count += 1;
        if prior >= self.limit {
            debug!("Rate limit hit for uid {}", uid);
            return Verdict::RateLimit;
        }

        if !self.membership.is_member(uid).await {
            return Verdict::NotMember;
        }

        Verdict::Allowed
    }

    /// Re-run only the membership check, for the retry affordance
    pub async fn recheck_membership(&self, uid: i64) -> bool {
        self.membership.is_member(uid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedMembership;

    #[async_trait]
    impl MembershipCheck for ClosedMembership {
        async fn is_member(&self, _uid: i64) -> bool {
            false
        }
    }

    fn guard(limit: u32) -> AdmissionGuard {
        AdmissionGuard::new(
            Duration::from_secs(10),
            limit,
            &[555],
            Arc::new(OpenMembership),
        )
    }

    #[tokio::test]
    async fn test_exactly_limit_events_pass_per_window() {
        let guard = guard(5);
        let mut session = UserSession::default();
        let now = Instant::now();

        for _ in 0..5 {
            assert_eq!(guard.check(1, &mut session, now).await, Verdict::Allowed);
        }
        assert_eq!(guard.check(1, &mut session, now).await, Verdict::RateLimit);
    }

    #[tokio::test]
    async fn test_window_elapse_resets_counter() {
        let guard = guard(5);
        let mut session = UserSession::default();
        let start = Instant::now();

        for _ in 0..6 {
            guard.check(1, &mut session, start).await;
        }
        assert_eq!(
            guard.check(1, &mut session, start).await,
            Verdict::RateLimit
        );

        let later = start + Duration::from_secs(11);
        assert_eq!(guard.check(1, &mut session, later).await, Verdict::Allowed);
        assert_eq!(session.window_count, 1);
    }

    #[tokio::test]
    async fn test_denylist_rejects_without_counting() {
        let guard = guard(5);
        let mut session = UserSession::default();
        let now = Instant::now();

        assert_eq!(guard.check(555, &mut session, now).await, Verdict::GroupChat);
        assert_eq!(session.window_count, 0);

        // builtin entry too
        assert_eq!(
            guard.check(1_087_968_824, &mut session, now).await,
            Verdict::GroupChat
        );
    }

    #[tokio::test]
    async fn test_non_member_rejected_after_rate_accounting() {
        let guard = AdmissionGuard::new(
            Duration::from_secs(10),
            5,
            &[],
            Arc::new(ClosedMembership),
        );
        let mut session = UserSession::default();
        let now = Instant::now();

        assert_eq!(guard.check(1, &mut session, now).await, Verdict::NotMember);
        assert_eq!(session.window_count, 1);
        assert!(!guard.recheck_membership(1).await);
    }
}
