//! Router capability - pool discovery and swap execution
//!
//! The discovery/construction engine is an external collaborator; this
//! module owns only its contract plus the client that speaks it.

pub mod client;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use solana_sdk::signature::Keypair;

use crate::error::Result;

pub use client::{keypair_from_base58, keypair_to_base58, RouterClient};

/// Wrapped-SOL mint, used for native balance and SOL withdrawals
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapAction {
    Buy,
    Sell,
}

impl SwapAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapAction::Buy => "buy",
            SwapAction::Sell => "sell",
        }
    }
}

/// Size of a trade: SOL in for buys, percent of holdings for sells
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SwapAmount {
    SolIn(f64),
    SellPct(u8),
}

/// Outcome of a swap submission.
///
/// `Replay` is the router's signal that the chosen pool failed at
/// execution time and the trade should be rebuilt against another pool.
/// It is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Confirmed { signature: String },
    Replay,
    Failed { signature: String, reason: String },
}

/// Display-only token metadata; lookup failures are non-fatal
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    pub program: String,
    pub name: String,
    pub symbol: String,
    pub supply: String,
    pub decimals: u8,
}

/// A discovered trading venue for a mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Venue {
    pub dex: String,
    pub pool: String,
}

/// External router contract
#[async_trait]
pub trait Router: Send + Sync {
    /// Find the best venue for a mint, skipping blacklisted pools
    async fn detect(&self, mint: &str, exclude_pools: &[String]) -> Result<Option<Venue>>;

    /// Submit a swap built against a specific venue
    #[allow(clippy::too_many_arguments)]
    async fn swap(
        &self,
        action: SwapAction,
        mint: &str,
        pool: &str,
        amount: SwapAmount,
        slippage_pct: f64,
        priority_level: &str,
        dex: &str,
        keypair: &Keypair,
    ) -> Result<SwapOutcome>;

    /// UI-denominated balance of `mint` held by `pubkey`; WSOL means
    /// the native SOL balance
    async fn get_balance(&self, mint: &str, pubkey: &str) -> Result<f64>;

    /// Balances for several mints at once
    async fn get_multiple_balances(
        &self,
        mints: &[String],
        pubkey: &str,
    ) -> Result<HashMap<String, f64>>;

    /// Spot price of a mint on a specific venue, in SOL
    async fn get_price(&self, mint: &str, pool: &str, dex: &str) -> Result<Option<f64>>;

    async fn get_decimals(&self, mint: &str) -> Result<Option<u8>>;

    async fn get_token_info(&self, mint: &str) -> Result<Option<TokenInfo>>;

    /// Transfer SOL or a token to an external address
    async fn send_transfer(
        &self,
        keypair: &Keypair,
        mint: &str,
        amount: f64,
        to: &str,
        priority_level: &str,
    ) -> Result<String>;

    /// Burn `amount_raw` base units (0 = everything) and close the
    /// token account when fully drained
    async fn close_token_account(
        &self,
        keypair: &Keypair,
        mint: &str,
        amount_raw: u64,
        decimals: u8,
    ) -> Result<String>;
}
