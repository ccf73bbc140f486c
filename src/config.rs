//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub rpc: RpcConfig,
    pub router: RouterConfig,
    pub limits: LimitsConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub grinder: GrinderConfig,
    #[serde(default)]
    pub defaults: WalletDefaultsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token; usually supplied via MINTDESK__TELEGRAM__BOT_TOKEN
    #[serde(default = "default_bot_token")]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Long-poll timeout for getUpdates
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Chat ids the bot never replies to (noisy group relays etc.)
    #[serde(default)]
    pub denylist_chat_ids: Vec<i64>,
    /// Banner image sent above the menu; skipped when missing
    #[serde(default = "default_banner_path")]
    pub banner_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Base URL of the pool-discovery / swap-construction service
    #[serde(default = "default_router_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Max elapsed time for retried read-only calls (detect, price)
    #[serde(default = "default_retry_max_elapsed_ms")]
    pub retry_max_elapsed_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Sliding rate window length in seconds
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    /// Actions allowed per window per user
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    /// Rent-exempt reserve for a token account, in lamports
    #[serde(default = "default_rent_exempt_lamports")]
    pub rent_exempt_lamports: u64,
    /// Ceiling on replay-and-exclude attempts per trade
    #[serde(default = "default_max_replay_retries")]
    pub max_replay_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the per-user JSON wallet records
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrinderConfig {
    /// Search timeout in seconds
    #[serde(default = "default_grind_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GrinderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_grind_timeout_secs(),
        }
    }
}

/// Settings a freshly created wallet starts with
#[derive(Debug, Clone, Deserialize)]
pub struct WalletDefaultsConfig {
    #[serde(default = "default_priority_level")]
    pub priority_level: String,
    #[serde(default = "default_slippage_pct")]
    pub buy_slip_pct: f64,
    #[serde(default = "default_slippage_pct")]
    pub sell_slip_pct: f64,
}

impl Default for WalletDefaultsConfig {
    fn default() -> Self {
        Self {
            priority_level: default_priority_level(),
            buy_slip_pct: default_slippage_pct(),
            sell_slip_pct: default_slippage_pct(),
        }
    }
}

// Default value functions
fn default_bot_token() -> String {
    std::env::var("BOT_TOKEN").unwrap_or_default()
}

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_banner_path() -> String {
    "imgs/banner.png".into()
}

fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_router_endpoint() -> String {
    std::env::var("ROUTER_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:8787".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_retry_max_elapsed_ms() -> u64 {
    10000
}

fn default_rate_window_secs() -> u64 {
    10
}

fn default_rate_limit() -> u32 {
    5
}

fn default_rent_exempt_lamports() -> u64 {
    2_039_280
}

fn default_max_replay_retries() -> u32 {
    5
}

fn default_data_dir() -> String {
    "data".into()
}

fn default_grind_timeout_secs() -> u64 {
    60
}

fn default_priority_level() -> String {
    "medium".into()
}

fn default_slippage_pct() -> f64 {
    10.0
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("router.endpoint", default_router_endpoint())?
            .set_default("telegram.bot_token", default_bot_token())?
            .set_default("store.data_dir", default_data_dir())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix MINTDESK_)
            .add_source(
                config::Environment::with_prefix("MINTDESK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.limits.rate_limit == 0 {
            anyhow::bail!("rate_limit must be at least 1");
        }

        if self.limits.rate_window_secs == 0 {
            anyhow::bail!("rate_window_secs must be at least 1");
        }

        if self.limits.max_replay_retries == 0 {
            anyhow::bail!("max_replay_retries must be at least 1");
        }

        if self.defaults.buy_slip_pct < 0.0 || self.defaults.buy_slip_pct > 100.0 {
            anyhow::bail!("buy_slip_pct must be between 0 and 100");
        }

        if self.defaults.sell_slip_pct < 0.0 || self.defaults.sell_slip_pct > 100.0 {
            anyhow::bail!("sell_slip_pct must be between 0 and 100");
        }

        if !matches!(
            self.defaults.priority_level.as_str(),
            "low" | "medium" | "high" | "turbo"
        ) {
            anyhow::bail!(
                "priority_level must be one of low/medium/high/turbo, got {}",
                self.defaults.priority_level
            );
        }

        if self.store.data_dir.is_empty() {
            anyhow::bail!("store.data_dir must not be empty");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Telegram:
    api_base: {}
    bot_token: {}
    poll_timeout: {}s
    denylisted_chats: {}
  RPC:
    endpoint: {}
    timeout: {}ms
  Router:
    endpoint: {}
    timeout: {}ms
  Limits:
    rate: {} per {}s
    rent_exempt: {} lamports
    max_replay_retries: {}
  Store:
    data_dir: {}
"#,
            self.telegram.api_base,
            if self.telegram.bot_token.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.telegram.poll_timeout_secs,
            self.telegram.denylist_chat_ids.len(),
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            mask_url(&self.router.endpoint),
            self.router.timeout_ms,
            self.limits.rate_limit,
            self.limits.rate_window_secs,
            self.limits.rent_exempt_lamports,
            self.limits.max_replay_retries,
            self.store.data_dir,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig {
                bot_token: String::new(),
                api_base: default_api_base(),
                poll_timeout_secs: default_poll_timeout_secs(),
                denylist_chat_ids: vec![],
                banner_path: default_banner_path(),
            },
            rpc: RpcConfig {
                endpoint: default_rpc_endpoint(),
                timeout_ms: default_timeout_ms(),
            },
            router: RouterConfig {
                endpoint: default_router_endpoint(),
                timeout_ms: default_timeout_ms(),
                retry_max_elapsed_ms: default_retry_max_elapsed_ms(),
            },
            limits: LimitsConfig {
                rate_window_secs: default_rate_window_secs(),
                rate_limit: default_rate_limit(),
                rent_exempt_lamports: default_rent_exempt_lamports(),
                max_replay_retries: default_max_replay_retries(),
            },
            store: StoreConfig {
                data_dir: default_data_dir(),
            },
            grinder: GrinderConfig::default(),
            defaults: WalletDefaultsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.limits.rate_limit, 5);
        assert_eq!(config.limits.rate_window_secs, 10);
        assert_eq!(config.limits.rent_exempt_lamports, 2_039_280);
        assert_eq!(config.defaults.buy_slip_pct, 10.0);
    }

    #[test]
    fn test_validate_rejects_bad_priority() {
        let mut config = Config::default();
        config.defaults.priority_level = "ludicrous".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(
            mask_url("https://api.example.com"),
            "https://api.example.com"
        );
    }
}
