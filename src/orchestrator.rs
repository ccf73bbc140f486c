//! Swap orchestrator - detect, validate, execute, retry
//!
//! Runs the full trade protocol for buys, sells, withdrawals, and
//! burns. The replay-and-exclude loop reacts to venues that fail at
//! execution time: the router answers with the replay sentinel, the
//! pool joins the process-wide blacklist, and the whole sequence
//! (balance refresh included) re-runs against the next candidate, up
//! to a hard ceiling.
//!
//! All methods assume the caller holds the uid's session lock, so one
//! user's trades never interleave with each other while different
//! users run in parallel. No store lock is held across a router call.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::router::{
    keypair_from_base58, Router, SwapAction, SwapAmount, SwapOutcome, WSOL_MINT,
};
use crate::router::client::lamports_to_sol;
use crate::session::SessionRegistry;
use crate::store::types::TokenUpdate;
use crate::store::WalletStore;

/// Tailored diagnostics extracted from router failure text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDiag {
    PriorityFeeTooHigh,
    SimulationFailed(String),
    Other(String),
}

impl FailureDiag {
    fn from_reason(reason: &str) -> Self {
        if reason.contains("Priority fee is too high") {
            FailureDiag::PriorityFeeTooHigh
        } else if reason.contains("Simulation failed") {
            FailureDiag::SimulationFailed(reason.to_string())
        } else {
            FailureDiag::Other(reason.to_string())
        }
    }
}

/// Definitive result of a trade attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeOutcome {
    Confirmed {
        signature: String,
    },
    Failed {
        signature: String,
        diag: FailureDiag,
    },
}

pub struct SwapOrchestrator {
    store: Arc<WalletStore>,
    router: Arc<dyn Router>,
    registry: Arc<SessionRegistry>,
    rent_exempt_lamports: u64,
    max_replay_retries: u32,
}

impl SwapOrchestrator {
    pub fn new(
        store: Arc<WalletStore>,
        router: Arc<dyn Router>,
        registry: Arc<SessionRegistry>,
        rent_exempt_lamports: u64,
        max_replay_retries: u32,
    ) -> Self {
        Self {
            store,
            router,
            registry,
            rent_exempt_lamports,
            max_replay_retries,
        }
    }

    fn rent_exempt_sol(&self) -> f64 {
        lamports_to_sol(self.rent_exempt_lamports)
    }

    /// Re-pull the SOL balance from chain and cache it
    pub async fn refresh_sol_balance(&self, uid: i64) -> Result<f64> {
        let wallet = self
            .store
            .get(uid)
            .await?
            .ok_or(Error::WalletMissing(uid))?;

        let balance = self.router.get_balance(WSOL_MINT, &wallet.pubkey).await?;
        self.store.update_balance(uid, balance).await?;
        Ok(balance)
    }

    /// Re-pull every held token's balance and merge it by mint
    pub async fn refresh_token_balances(&self, uid: i64) -> Result<()> {
        let wallet = self
            .store
            .get(uid)
            .await?
            .ok_or(Error::WalletMissing(uid))?;

        if wallet.tokens.is_empty() {
            return Ok(());
        }

        let mints: Vec<String> = wallet.tokens.iter().map(|t| t.mint.clone()).collect();
        let balances = self
            .router
            .get_multiple_balances(&mints, &wallet.pubkey)
            .await?;

        let updates: Vec<TokenUpdate> = balances
            .into_iter()
            .map(|(mint, balance)| TokenUpdate::balance_only(mint, balance))
            .collect();
        if !updates.is_empty() {
            self.store.update_tokens(uid, &updates).await?;
        }
        Ok(())
    }

    /// Buy: `<mint> <sol_amount>`
    pub async fn process_buy(&self, uid: i64, raw: &str) -> Result<TradeOutcome> {
        let (mint, amount) = parse_buy(raw)?;
        self.run_trade(uid, &mint, SwapAction::Buy, SwapAmount::SolIn(amount))
            .await
    }

    /// Sell: `<mint> <percent 0-100>`
    pub async fn process_sell(&self, uid: i64, raw: &str) -> Result<TradeOutcome> {
        let (mint, pct) = parse_sell(raw)?;
        self.run_trade(uid, &mint, SwapAction::Sell, SwapAmount::SellPct(pct))
            .await
    }

    /// The detect → validate → execute → retry loop shared by buy/sell
    async fn run_trade(
        &self,
        uid: i64,
        mint: &str,
        action: SwapAction,
        amount: SwapAmount,
    ) -> Result<TradeOutcome> {
        let mut attempts = 0u32;

        let (outcome, venue) = loop {
            // Step 1 re-runs on every retry: preconditions must never be
            // validated against a stale balance.
            let balance = self.refresh_sol_balance(uid).await?;

            let venue = self
                .router
                .detect(mint, &self.registry.excluded_pools())
                .await?
                .ok_or_else(|| Error::PoolNotFound(mint.to_string()))?;

            let wallet = self
                .store
                .get(uid)
                .await?
                .ok_or(Error::WalletMissing(uid))?;

            if let SwapAmount::SolIn(sol_in) = amount {
                // Two fresh token accounts may need rent reservations
                let required = sol_in + 2.0 * self.rent_exempt_sol();
                if balance < required {
                    return Err(Error::InsufficientBalance {
                        available: balance,
                        required,
                    });
                }
            }

            let slippage = match action {
                SwapAction::Buy => wallet.buy_slip,
                SwapAction::Sell => wallet.sell_slip,
            };
            let keypair = keypair_from_base58(&wallet.privkey)?;

            let outcome = self
                .router
                .swap(
                    action,
                    mint,
                    &venue.pool,
                    amount,
                    slippage,
                    &wallet.priority_level.to_string(),
                    &venue.dex,
                    &keypair,
                )
                .await?;

            match outcome {
                SwapOutcome::Replay => {
                    attempts += 1;
                    self.registry.exclude_pool(&venue.pool);
                    info!(
                        "Replay requested on pool {}, {} excluded so far",
                        venue.pool,
                        self.registry.excluded_pools().len()
                    );
                    if attempts >= self.max_replay_retries {
                        warn!("Replay ceiling reached for {}", mint);
                        return Err(Error::PoolNotFound(mint.to_string()));
                    }
                }
                SwapOutcome::Confirmed { signature } => {
                    break (TradeOutcome::Confirmed { signature }, venue)
                }
                SwapOutcome::Failed { signature, reason } => {
                    break (
                        TradeOutcome::Failed {
                            signature,
                            diag: FailureDiag::from_reason(&reason),
                        },
                        venue,
                    )
                }
            }
        };

        // Post-trade reconciliation runs after any definitive outcome,
        // success or not: the on-chain token balance is the truth.
        let wallet = self
            .store
            .get(uid)
            .await?
            .ok_or(Error::WalletMissing(uid))?;
        let token_balance = self.router.get_balance(mint, &wallet.pubkey).await?;

        if token_balance == 0.0 && action == SwapAction::Sell {
            self.store.remove_token(uid, mint).await?;
        } else if token_balance > 0.0 {
            self.store
                .update_tokens(
                    uid,
                    &[TokenUpdate::full(mint, token_balance, venue.dex, venue.pool)],
                )
                .await?;
        }

        Ok(outcome)
    }

    /// Withdraw SOL to the configured payout address
    pub async fn process_withdraw_sol(&self, uid: i64, raw: &str) -> Result<String> {
        let amount = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|a| *a > 0.0)
            .ok_or_else(|| Error::InvalidInput("Enter a positive SOL amount".into()))?;

        let balance = self.refresh_sol_balance(uid).await?;
        let wallet = self
            .store
            .get(uid)
            .await?
            .ok_or(Error::WalletMissing(uid))?;

        if wallet.withdraw_to.is_empty() {
            return Err(Error::WithdrawAddressUnset);
        }

        let required = amount + self.rent_exempt_sol();
        if balance < required {
            return Err(Error::InsufficientBalance {
                available: balance,
                required,
            });
        }

        let keypair = keypair_from_base58(&wallet.privkey)?;
        let signature = self
            .router
            .send_transfer(
                &keypair,
                WSOL_MINT,
                amount,
                &wallet.withdraw_to,
                &wallet.priority_level.to_string(),
            )
            .await?;

        info!("Withdrew {} SOL for {} (sig: {})", amount, uid, signature);
        Ok(signature)
    }

    /// Withdraw tokens: `<mint> <amount>`
    pub async fn process_withdraw_tokens(&self, uid: i64, raw: &str) -> Result<String> {
        let (mint, amount) = parse_mint_amount(raw)?;

        let balance = self.refresh_sol_balance(uid).await?;
        let wallet = self
            .store
            .get(uid)
            .await?
            .ok_or(Error::WalletMissing(uid))?;

        if wallet.withdraw_to.is_empty() {
            return Err(Error::WithdrawAddressUnset);
        }

        // Gas floor: the fee plus rent must stay covered
        if balance <= self.rent_exempt_sol() {
            return Err(Error::InsufficientBalance {
                available: balance,
                required: self.rent_exempt_sol(),
            });
        }

        let token_balance = self.router.get_balance(&mint, &wallet.pubkey).await?;
        if token_balance == 0.0 {
            return Err(Error::TokenNotHeld(mint));
        }
        if token_balance < amount {
            return Err(Error::InsufficientTokenBalance {
                mint,
                available: token_balance,
                required: amount,
            });
        }

        let keypair = keypair_from_base58(&wallet.privkey)?;
        let signature = self
            .router
            .send_transfer(
                &keypair,
                &mint,
                amount,
                &wallet.withdraw_to,
                &wallet.priority_level.to_string(),
            )
            .await?;

        // Full drains drop the entry, partial drains decrement it
        if token_balance == amount {
            self.store.remove_token(uid, &mint).await?;
        } else {
            self.store
                .update_tokens(
                    uid,
                    &[TokenUpdate::balance_only(&mint, token_balance - amount)],
                )
                .await?;
        }

        info!("Withdrew {} of {} for {} (sig: {})", amount, mint, uid, signature);
        Ok(signature)
    }

    /// Burn tokens: mint is the first 44 characters, optional trailing
    /// amount (0 or absent = burn the whole account)
    pub async fn process_burn_tokens(&self, uid: i64, raw: &str) -> Result<String> {
        let (mint, amount) = parse_burn(raw)?;

        let wallet = self
            .store
            .get(uid)
            .await?
            .ok_or(Error::WalletMissing(uid))?;

        if !wallet.holds(&mint) {
            return Err(Error::TokenNotHeld(mint));
        }

        let (amount_raw, decimals) = if amount > 0.0 {
            let decimals = self
                .router
                .get_decimals(&mint)
                .await?
                .ok_or_else(|| Error::Upstream(format!("No decimals for {}", mint)))?;
            (
                (amount * 10f64.powi(decimals as i32)) as u64,
                decimals,
            )
        } else {
            (0, 0)
        };

        let keypair = keypair_from_base58(&wallet.privkey)?;
        match self
            .router
            .close_token_account(&keypair, &mint, amount_raw, decimals)
            .await
        {
            Ok(signature) => {
                if amount_raw == 0 {
                    self.store.remove_token(uid, &mint).await?;
                }
                info!("Burned {} for {} (sig: {})", mint, uid, signature);
                Ok(signature)
            }
            Err(e) if e.to_string().contains("account does not exist") => {
                // The record was stale; prune it as a repair action
                warn!("Pruning phantom token {} for {}", mint, uid);
                self.store.remove_token(uid, &mint).await?;
                Err(Error::TokenNotHeld(mint))
            }
            Err(e) => Err(e),
        }
    }
}

// ============ Input grammars ============

fn parse_buy(raw: &str) -> Result<(String, f64)> {
    let (mint, amount) = parse_mint_amount(raw)?;
    if amount <= 0.0 {
        return Err(Error::InvalidInput("SOL amount must be positive".into()));
    }
    Ok((mint, amount))
}

fn parse_sell(raw: &str) -> Result<(String, u8)> {
    let mut parts = raw.split_whitespace();
    let mint = parts
        .next()
        .ok_or_else(|| Error::InvalidInput("Expected: <mint> <percent>".into()))?;
    let pct_text = parts
        .next()
        .ok_or_else(|| Error::InvalidInput("Expected: <mint> <percent>".into()))?
        .trim_end_matches('%');

    let pct = pct_text
        .parse::<u8>()
        .ok()
        .filter(|p| (1..=100).contains(p))
        .ok_or_else(|| Error::InvalidInput("Percent must be between 1 and 100".into()))?;

    Ok((mint.to_string(), pct))
}

fn parse_mint_amount(raw: &str) -> Result<(String, f64)> {
    let mut parts = raw.split_whitespace();
    let mint = parts
        .next()
        .ok_or_else(|| Error::InvalidInput("Expected: <mint> <amount>".into()))?;
    let amount = parts
        .next()
        .and_then(|a| a.parse::<f64>().ok())
        .filter(|a| *a > 0.0)
        .ok_or_else(|| Error::InvalidInput("Expected a positive amount".into()))?;
    Ok((mint.to_string(), amount))
}

fn parse_burn(raw: &str) -> Result<(String, f64)> {
    let raw = raw.trim();
    if raw.len() < 44 {
        return Err(Error::InvalidInput("Enter a valid mint address".into()));
    }
    let (mint, rest) = raw.split_at(44);
    let rest = rest.trim();
    let amount = if rest.is_empty() {
        0.0
    } else {
        rest.parse::<f64>()
            .ok()
            .filter(|a| *a >= 0.0)
            .ok_or_else(|| Error::InvalidInput("Burn amount must be a number".into()))?
    };
    Ok((mint.to_string(), amount))
}
