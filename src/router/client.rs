//! Router client
//!
//! Pool discovery, swap construction, and price/metadata lookups go to
//! the external router service over HTTP. Balances, transfers, and
//! burn/close run natively against the RPC node, so the desk never
//! depends on the router service for moving funds out.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    system_instruction,
    transaction::Transaction,
};
use tracing::{debug, info, warn};

use crate::config::{RouterConfig, RpcConfig};
use crate::error::{Error, Result};

use super::{Router, SwapAction, SwapAmount, SwapOutcome, TokenInfo, Venue, WSOL_MINT};

/// Router signature sentinel asking for a rebuild against another pool
const REPLAY_SENTINEL: &str = "replay";

/// Decode a base58-encoded 64-byte secret key
pub fn keypair_from_base58(s: &str) -> Result<Keypair> {
    let bytes = bs58::decode(s)
        .into_vec()
        .map_err(|e| Error::InvalidKeypair(e.to_string()))?;
    Keypair::from_bytes(&bytes).map_err(|e| Error::InvalidKeypair(e.to_string()))
}

/// Encode a keypair's secret as base58
pub fn keypair_to_base58(keypair: &Keypair) -> String {
    bs58::encode(keypair.to_bytes()).into_string()
}

/// Convert SOL to lamports
pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * 1_000_000_000.0) as u64
}

/// Convert lamports to SOL
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / 1_000_000_000.0
}

/// Classify an upstream failure for the retry loop
fn retry_class(e: Error) -> backoff::Error<Error> {
    if e.is_retryable() {
        backoff::Error::transient(e)
    } else {
        backoff::Error::permanent(e)
    }
}

/// Decide what a burn does given the on-chain account state.
///
/// Returns `(burn_raw, close)`. A missing account is an explicit error
/// no matter the requested amount, so callers can repair stale records.
fn burn_plan(held_raw: Option<u64>, amount_raw: u64) -> Result<(u64, bool)> {
    let held =
        held_raw.ok_or_else(|| Error::Upstream("token account does not exist".into()))?;
    if amount_raw > held {
        return Err(Error::Upstream(format!(
            "burn amount {} exceeds held {}",
            amount_raw, held
        )));
    }
    let burn_raw = if amount_raw == 0 { held } else { amount_raw };
    Ok((burn_raw, burn_raw == held))
}

/// Compute-unit price in micro-lamports for a fee tier
fn priority_cu_price(level: &str) -> u64 {
    match level {
        "low" => 10_000,
        "medium" => 100_000,
        "high" => 500_000,
        "turbo" => 1_000_000,
        _ => 100_000,
    }
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    mint: &'a str,
    exclude_pools: &'a [String],
}

#[derive(Deserialize)]
struct DetectResponse {
    dex: Option<String>,
    pool: Option<String>,
}

#[derive(Serialize)]
struct SwapRequest<'a> {
    action: &'a str,
    mint: &'a str,
    pool: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sol_amount_in: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sell_pct: Option<u8>,
    slippage_pct: f64,
    priority_level: &'a str,
    dex: &'a str,
    signer: String,
}

#[derive(Deserialize)]
struct SwapResponse {
    signature: String,
    ok: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct PriceResponse {
    price: Option<f64>,
}

#[derive(Deserialize)]
struct DecimalsResponse {
    decimals: Option<u8>,
}

/// HTTP + RPC implementation of the router contract
pub struct RouterClient {
    http: reqwest::Client,
    endpoint: String,
    rpc: Arc<RpcClient>,
    retry_max_elapsed: Duration,
}

impl RouterClient {
    pub fn new(router: &RouterConfig, rpc: &RpcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(router.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        let rpc = Arc::new(RpcClient::new_with_timeout(
            rpc.endpoint.clone(),
            Duration::from_millis(rpc.timeout_ms),
        ));

        Ok(Self {
            http,
            endpoint: router.endpoint.trim_end_matches('/').to_string(),
            rpc,
            retry_max_elapsed: Duration::from_millis(router.retry_max_elapsed_ms),
        })
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..Default::default()
        }
    }

    fn parse_pubkey(address: &str) -> Result<Pubkey> {
        Pubkey::from_str(address)
            .map_err(|e| Error::InvalidInput(format!("Bad address {}: {}", address, e)))
    }

    /// Raw token balance and decimals of the owner's associated account.
    /// `None` means the account does not exist on chain.
    async fn token_account_state(
        &self,
        mint: &Pubkey,
        owner: &Pubkey,
    ) -> Result<Option<(u64, u8)>> {
        let ata = spl_associated_token_account::get_associated_token_address(owner, mint);
        match self.rpc.get_token_account_balance(&ata).await {
            Ok(ui) => {
                let raw = ui
                    .amount
                    .parse::<u64>()
                    .map_err(|e| Error::Rpc(format!("Bad token amount: {}", e)))?;
                Ok(Some((raw, ui.decimals)))
            }
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("could not find account") || msg.contains("Invalid param") {
                    Ok(None)
                } else {
                    Err(Error::Rpc(format!("Token balance fetch failed: {}", msg)))
                }
            }
        }
    }

    /// Sign and submit a transaction with a priority-fee instruction
    async fn send_instructions(
        &self,
        keypair: &Keypair,
        mut instructions: Vec<Instruction>,
        priority_level: &str,
    ) -> Result<String> {
        instructions.insert(
            0,
            ComputeBudgetInstruction::set_compute_unit_price(priority_cu_price(priority_level)),
        );

        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| Error::Rpc(format!("Failed to get blockhash: {}", e)))?;

        let transaction = Transaction::new_signed_with_payer(
            &instructions,
            Some(&keypair.pubkey()),
            &[keypair],
            blockhash,
        );

        let signature = self
            .rpc
            .send_and_confirm_transaction(&transaction)
            .await
            .map_err(|e| Error::TransactionSend(e.to_string()))?;

        Ok(signature.to_string())
    }
}

#[async_trait]
impl Router for RouterClient {
    async fn detect(&self, mint: &str, exclude_pools: &[String]) -> Result<Option<Venue>> {
        let url = format!("{}/detect", self.endpoint);
        let body = DetectRequest {
            mint,
            exclude_pools,
        };

        // Discovery is read-only, safe to retry on transient failures
        let response: DetectResponse = backoff::future::retry(self.backoff(), || async {
            let resp = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| retry_class(Error::from(e)))?;
            resp.error_for_status()
                .map_err(|e| retry_class(Error::from(e)))?
                .json::<DetectResponse>()
                .await
                .map_err(|e| retry_class(Error::from(e)))
        })
        .await?;

        match (response.dex, response.pool) {
            (Some(dex), Some(pool)) => {
                debug!("Detected venue for {}: {} / {}", mint, dex, pool);
                Ok(Some(Venue { dex, pool }))
            }
            _ => Ok(None),
        }
    }

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
    ) -> Result<SwapOutcome> {
        let (sol_amount_in, sell_pct) = match amount {
            SwapAmount::SolIn(sol) => (Some(sol), None),
            SwapAmount::SellPct(pct) => (None, Some(pct)),
        };

        let request = SwapRequest {
            action: action.as_str(),
            mint,
            pool,
            sol_amount_in,
            sell_pct,
            slippage_pct,
            priority_level,
            dex,
            signer: keypair_to_base58(keypair),
        };

        // Never retried here: submission is not idempotent
        let response: SwapResponse = self
            .http
            .post(format!("{}/swap", self.endpoint))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.ok {
            info!("Swap confirmed: {}", response.signature);
            Ok(SwapOutcome::Confirmed {
                signature: response.signature,
            })
        } else if response.signature == REPLAY_SENTINEL {
            Ok(SwapOutcome::Replay)
        } else {
            warn!("Swap failed ({}): {}", response.signature, response.reason);
            Ok(SwapOutcome::Failed {
                signature: response.signature,
                reason: response.reason,
            })
        }
    }

    async fn get_balance(&self, mint: &str, pubkey: &str) -> Result<f64> {
        let owner = Self::parse_pubkey(pubkey)?;

        if mint == WSOL_MINT {
            let lamports = self
                .rpc
                .get_balance(&owner)
                .await
                .map_err(|e| Error::Rpc(format!("Failed to get balance: {}", e)))?;
            return Ok(lamports_to_sol(lamports));
        }

        let mint_key = Self::parse_pubkey(mint)?;
        match self.token_account_state(&mint_key, &owner).await? {
            Some((raw, decimals)) => Ok(raw as f64 / 10f64.powi(decimals as i32)),
            None => Ok(0.0),
        }
    }

    async fn get_multiple_balances(
        &self,
        mints: &[String],
        pubkey: &str,
    ) -> Result<HashMap<String, f64>> {
        let mut balances = HashMap::with_capacity(mints.len());
        for mint in mints {
            match self.get_balance(mint, pubkey).await {
                Ok(balance) => {
                    balances.insert(mint.clone(), balance);
                }
                Err(e) => warn!("Balance fetch failed for {}: {}", mint, e),
            }
        }
        Ok(balances)
    }

    async fn get_price(&self, mint: &str, pool: &str, dex: &str) -> Result<Option<f64>> {
        let url = format!("{}/price", self.endpoint);
        let response: PriceResponse = backoff::future::retry(self.backoff(), || async {
            let resp = self
                .http
                .get(&url)
                .query(&[("mint", mint), ("pool", pool), ("dex", dex)])
                .send()
                .await
                .map_err(|e| retry_class(Error::from(e)))?;
            resp.error_for_status()
                .map_err(|e| retry_class(Error::from(e)))?
                .json::<PriceResponse>()
                .await
                .map_err(|e| retry_class(Error::from(e)))
        })
        .await?;

        Ok(response.price)
    }

    async fn get_decimals(&self, mint: &str) -> Result<Option<u8>> {
        let response: DecimalsResponse = self
            .http
            .get(format!("{}/decimals", self.endpoint))
            .query(&[("mint", mint)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.decimals)
    }

    async fn get_token_info(&self, mint: &str) -> Result<Option<TokenInfo>> {
        let resp = self
            .http
            .get(format!("{}/token-info", self.endpoint))
            .query(&[("mint", mint)])
            .send()
            .await?;

        // Metadata is display-only; a missing or failing lookup is not an error
        if !resp.status().is_success() {
            return Ok(None);
        }
        Ok(resp.json::<TokenInfo>().await.ok())
    }

    async fn send_transfer(
        &self,
        keypair: &Keypair,
        mint: &str,
        amount: f64,
        to: &str,
        priority_level: &str,
    ) -> Result<String> {
        let destination = Self::parse_pubkey(to)?;

        if mint == WSOL_MINT {
            let lamports = sol_to_lamports(amount);
            debug!(
                "Transferring {} lamports from {} to {}",
                lamports,
                keypair.pubkey(),
                destination
            );
            let instruction =
                system_instruction::transfer(&keypair.pubkey(), &destination, lamports);
            let signature = self
                .send_instructions(keypair, vec![instruction], priority_level)
                .await?;
            info!("SOL transfer complete: {} lamports (sig: {})", lamports, signature);
            return Ok(signature);
        }

        let mint_key = Self::parse_pubkey(mint)?;
        let owner = keypair.pubkey();
        let (_, decimals) = self
            .token_account_state(&mint_key, &owner)
            .await?
            .ok_or_else(|| Error::Upstream("token account does not exist".into()))?;
        let amount_raw = (amount * 10f64.powi(decimals as i32)) as u64;

        let source = spl_associated_token_account::get_associated_token_address(&owner, &mint_key);
        let dest_ata =
            spl_associated_token_account::get_associated_token_address(&destination, &mint_key);

        let instructions = vec![
            spl_associated_token_account::instruction::create_associated_token_account_idempotent(
                &owner,
                &destination,
                &mint_key,
                &spl_token::id(),
            ),
            spl_token::instruction::transfer(
                &spl_token::id(),
                &source,
                &dest_ata,
                &owner,
                &[],
                amount_raw,
            )
            .map_err(|e| Error::TransactionSend(format!("Transfer build failed: {}", e)))?,
        ];

        let signature = self
            .send_instructions(keypair, instructions, priority_level)
            .await?;
        info!(
            "Token transfer complete: {} {} to {} (sig: {})",
            amount, mint, to, signature
        );
        Ok(signature)
    }

    async fn close_token_account(
        &self,
        keypair: &Keypair,
        mint: &str,
        amount_raw: u64,
        _decimals: u8,
    ) -> Result<String> {
        let mint_key = Self::parse_pubkey(mint)?;
        let owner = keypair.pubkey();
        let ata = spl_associated_token_account::get_associated_token_address(&owner, &mint_key);

        let held = self.token_account_state(&mint_key, &owner).await?;
        let (burn_raw, close) = burn_plan(held.map(|(raw, _)| raw), amount_raw)?;

        let mut instructions = Vec::new();
        if burn_raw > 0 {
            instructions.push(
                spl_token::instruction::burn(
                    &spl_token::id(),
                    &ata,
                    &mint_key,
                    &owner,
                    &[],
                    burn_raw,
                )
                .map_err(|e| Error::TransactionSend(format!("Burn build failed: {}", e)))?,
            );
        }

        // Fully drained accounts are closed to reclaim rent
        if close {
            instructions.push(
                spl_token::instruction::close_account(&spl_token::id(), &ata, &owner, &owner, &[])
                    .map_err(|e| Error::TransactionSend(format!("Close build failed: {}", e)))?,
            );
        }

        let signature = self
            .send_instructions(keypair, instructions, "medium")
            .await?;
        info!("Burned {} raw of {} (sig: {})", burn_raw, mint, signature);
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sol_lamports_conversion() {
        assert_eq!(sol_to_lamports(1.0), 1_000_000_000);
        assert_eq!(sol_to_lamports(0.001), 1_000_000);
        assert_eq!(lamports_to_sol(1_000_000_000), 1.0);
        assert_eq!(lamports_to_sol(500_000_000), 0.5);
    }

    #[test]
    fn test_keypair_base58_round_trip() {
        let keypair = Keypair::new();
        let encoded = keypair_to_base58(&keypair);
        let decoded = keypair_from_base58(&encoded).unwrap();
        assert_eq!(keypair.pubkey(), decoded.pubkey());
    }

    #[test]
    fn test_keypair_from_garbage_fails() {
        assert!(keypair_from_base58("not base58 0OIl").is_err());
        assert!(keypair_from_base58("abc").is_err());
    }

    #[test]
    fn test_priority_cu_price_tiers() {
        assert!(priority_cu_price("low") < priority_cu_price("medium"));
        assert!(priority_cu_price("medium") < priority_cu_price("high"));
        assert!(priority_cu_price("high") < priority_cu_price("turbo"));
        // unknown tiers fall back to medium
        assert_eq!(priority_cu_price("???"), priority_cu_price("medium"));
    }

    #[test]
    fn test_burn_plan() {
        // missing account is an error regardless of requested amount
        let err = burn_plan(None, 0).unwrap_err();
        assert!(err.to_string().contains("account does not exist"));
        let err = burn_plan(None, 5).unwrap_err();
        assert!(err.to_string().contains("account does not exist"));

        // zero means burn everything and close
        assert_eq!(burn_plan(Some(100), 0).unwrap(), (100, true));
        // partial burn leaves the account open
        assert_eq!(burn_plan(Some(100), 40).unwrap(), (40, false));
        // exact burn closes too
        assert_eq!(burn_plan(Some(100), 100).unwrap(), (100, true));
        // empty account still closes to reclaim rent
        assert_eq!(burn_plan(Some(0), 0).unwrap(), (0, true));

        assert!(burn_plan(Some(10), 11).is_err());
    }

    #[test]
    fn test_retry_classification() {
        assert!(matches!(
            retry_class(Error::Upstream("503".into())),
            backoff::Error::Transient { .. }
        ));
        assert!(matches!(
            retry_class(Error::Rpc("timeout".into())),
            backoff::Error::Transient { .. }
        ));
        // a malformed body will not get better on retry
        assert!(matches!(
            retry_class(Error::Serialization("bad json".into())),
            backoff::Error::Permanent(_)
        ));
        assert!(matches!(
            retry_class(Error::InvalidInput("x".into())),
            backoff::Error::Permanent(_)
        ));
    }
}
