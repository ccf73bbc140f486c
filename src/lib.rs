//! Mintdesk Library
//!
//! Chat-driven custodial trading desk for Solana DEX swaps.

pub mod config;
pub mod controller;
pub mod error;
pub mod grinder;
pub mod guard;
pub mod orchestrator;
pub mod router;
pub mod session;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
