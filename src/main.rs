//! Mintdesk - chat-driven custodial trading desk for Solana DEX swaps
//!
//! # WARNING
//! - This service custodies real keys and trades real money.
//! - Run it only against infrastructure you control.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use mintdesk::config::Config;
use mintdesk::controller::ConversationController;
use mintdesk::grinder;
use mintdesk::guard::{AdmissionGuard, OpenMembership};
use mintdesk::orchestrator::SwapOrchestrator;
use mintdesk::router::RouterClient;
use mintdesk::session::SessionRegistry;
use mintdesk::store::backend::JsonFileBackend;
use mintdesk::store::WalletStore;
use mintdesk::transport::telegram::{TelegramTransport, UpdatePoller};

/// Mintdesk - custodial trading desk controlled from chat
#[derive(Parser)]
#[command(name = "mintdesk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat service
    Start,

    /// Grind a keypair, optionally with a vanity fragment
    Grind {
        /// Base58 fragment the address must start or end with
        fragment: Option<String>,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mintdesk=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start => start(&config).await,
        Commands::Grind { fragment } => grind(&config, fragment.as_deref()),
        Commands::Config => {
            println!("{}", config.masked_display());
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Wire everything up and run the long-poll loop
async fn start(config: &Config) -> Result<()> {
    info!("Starting mintdesk");

    let backend = JsonFileBackend::new(&config.store.data_dir)
        .await
        .context("Failed to open wallet store")?;
    let store = Arc::new(WalletStore::new(
        Arc::new(backend),
        config.defaults.clone(),
    ));

    let router = Arc::new(
        RouterClient::new(&config.router, &config.rpc).context("Failed to build router client")?,
    );

    let registry = Arc::new(SessionRegistry::new());

    let orchestrator = Arc::new(SwapOrchestrator::new(
        store.clone(),
        router.clone(),
        registry.clone(),
        config.limits.rent_exempt_lamports,
        config.limits.max_replay_retries,
    ));

    let guard = Arc::new(AdmissionGuard::new(
        Duration::from_secs(config.limits.rate_window_secs),
        config.limits.rate_limit,
        &config.telegram.denylist_chat_ids,
        Arc::new(OpenMembership),
    ));

    let transport = Arc::new(
        TelegramTransport::new(&config.telegram).context("Failed to build chat transport")?,
    );

    let controller = Arc::new(ConversationController::new(
        transport,
        store,
        orchestrator,
        router,
        guard,
        registry,
        config.telegram.banner_path.clone(),
    ));

    let mut poller =
        UpdatePoller::new(&config.telegram).context("Failed to build update poller")?;

    info!("Listening for updates");
    loop {
        let events = match poller.poll().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Poll failed, retrying: {}", e);
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        for event in events {
            // Per-user ordering comes from the session lock, not from
            // task ordering, so every event can be its own task.
            let controller = controller.clone();
            tokio::spawn(async move {
                controller.handle_event(event).await;
            });
        }
    }
}

fn grind(config: &Config, fragment: Option<&str>) -> Result<()> {
    let (pubkey, secret) = match fragment {
        Some(fragment) => grinder::grind_custom(
            fragment,
            Duration::from_secs(config.grinder.timeout_secs),
        )?,
        None => grinder::grind(),
    };

    println!("Address: {}", pubkey);
    println!("Secret (base58): {}", secret);
    Ok(())
}
