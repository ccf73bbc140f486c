//! Error types for the trading desk

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the trading desk
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // Wallet / trade preconditions
    #[error("No wallet found for user {0}")]
    WalletMissing(i64),

    #[error("No pool found for mint {0}")]
    PoolNotFound(String),

    #[error("Insufficient balance: {available} SOL available, {required} SOL required")]
    InsufficientBalance { available: f64, required: f64 },

    #[error("Insufficient token balance for {mint}: {available} held, {required} required")]
    InsufficientTokenBalance {
        mint: String,
        available: f64,
        required: f64,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Token not held: {0}")]
    TokenNotHeld(String),

    #[error("No withdrawal address set")]
    WithdrawAddressUnset,

    // Upstream errors
    #[error("Router error: {0}")]
    Upstream(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    // Chat transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    // Vanity grinder errors
    #[error("Grinder timed out after {0}s")]
    GrindTimeout(u64),

    #[error("Invalid base58 fragment: {0}")]
    InvalidFragment(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should be reported to the user verbatim
    /// (actionable, terminal for the current action) rather than mapped
    /// to the generic support message.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::WalletMissing(_)
                | Error::PoolNotFound(_)
                | Error::InsufficientBalance { .. }
                | Error::InsufficientTokenBalance { .. }
                | Error::InvalidInput(_)
                | Error::TokenNotHeld(_)
                | Error::WithdrawAddressUnset
        )
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_) | Error::Upstream(_) | Error::TransactionSend(_) | Error::Transport(_)
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from reqwest errors. Malformed response bodies are not
// transient, so decode failures land on the non-retryable side.
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::Serialization(e.to_string())
        } else {
            Error::Upstream(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
