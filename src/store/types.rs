//! Core types for the wallet store
//!
//! Defines wallet records, token holdings, and user identities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse fee-tier hint passed to the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Low,
    #[default]
    Medium,
    High,
    Turbo,
}

impl PriorityLevel {
    /// Parse a level name, rejecting anything outside the four tiers
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(PriorityLevel::Low),
            "medium" => Some(PriorityLevel::Medium),
            "high" => Some(PriorityLevel::High),
            "turbo" => Some(PriorityLevel::Turbo),
            _ => None,
        }
    }
}

impl std::fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriorityLevel::Low => write!(f, "low"),
            PriorityLevel::Medium => write!(f, "medium"),
            PriorityLevel::High => write!(f, "high"),
            PriorityLevel::Turbo => write!(f, "turbo"),
        }
    }
}

/// One token position inside a wallet record, keyed by mint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHolding {
    /// Mint address
    pub mint: String,

    /// UI-denominated balance
    #[serde(with = "decimal_string")]
    pub balance: f64,

    /// DEX the holding was last traded on
    #[serde(default)]
    pub dex: String,

    /// Pool the holding was last traded through
    #[serde(default)]
    pub pool: String,
}

/// A partial token update carried by trade reconciliation.
///
/// `dex`/`pool` are optional: a merge that omits them keeps whatever the
/// existing entry already has.
#[derive(Debug, Clone)]
pub struct TokenUpdate {
    pub mint: String,
    pub balance: f64,
    pub dex: Option<String>,
    pub pool: Option<String>,
}

impl TokenUpdate {
    pub fn balance_only(mint: impl Into<String>, balance: f64) -> Self {
        Self {
            mint: mint.into(),
            balance,
            dex: None,
            pool: None,
        }
    }

    pub fn full(
        mint: impl Into<String>,
        balance: f64,
        dex: impl Into<String>,
        pool: impl Into<String>,
    ) -> Self {
        Self {
            mint: mint.into(),
            balance,
            dex: Some(dex.into()),
            pool: Some(pool.into()),
        }
    }
}

/// Durable per-user wallet record
///
/// Balances are persisted as decimal strings to survive serialization
/// round-trips without drift, and handled as f64 in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Chat id, the primary key
    pub uid: i64,

    /// Base58 wallet address
    pub pubkey: String,

    /// Base58-encoded 64-byte secret key
    pub privkey: String,

    /// Cached SOL balance; refreshed on demand, never ground truth
    #[serde(with = "decimal_string")]
    pub balance: f64,

    /// Token positions, unique per mint
    #[serde(default)]
    pub tokens: Vec<TokenHolding>,

    /// Fee-tier hint for the router
    #[serde(default)]
    pub priority_level: PriorityLevel,

    /// Buy-side slippage tolerance in percent
    #[serde(with = "decimal_string")]
    pub buy_slip: f64,

    /// Sell-side slippage tolerance in percent
    #[serde(with = "decimal_string")]
    pub sell_slip: f64,

    /// External payout address; empty blocks withdrawals
    #[serde(default)]
    pub withdraw_to: String,

    /// When the wallet was created
    pub created_at: DateTime<Utc>,
}

impl WalletRecord {
    /// Look up a token holding by mint
    pub fn token(&self, mint: &str) -> Option<&TokenHolding> {
        self.tokens.iter().find(|t| t.mint == mint)
    }

    /// Check whether the wallet holds the given mint
    pub fn holds(&self, mint: &str) -> bool {
        self.token(mint).is_some()
    }
}

/// Identity record cached on first contact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub uid: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Serde bridge persisting an f64 as a decimal string
mod decimal_string {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<f64>().map_err(serde::de::Error::custom)
    }
}
