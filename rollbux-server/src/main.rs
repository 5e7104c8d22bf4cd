mod auth;
mod commands;
mod config;
mod error;
mod protocol;
mod server;
mod session;

use auth::CredentialStore;
use clap::{Parser, Subcommand};
use config::ServerConfig;
use rollbux_core::{AccountStore, LedgerError, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rollbux")]
#[command(about = "Rollbux - coinflip wagers over a shared balance ledger")]
#[command(version)]
struct Cli {
    /// Data directory for the account database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the wager server
    Serve {
        /// Listen port (overrides PORT and the config file)
        #[arg(short, long)]
        port: Option<u16>,
        /// Listen host
        #[arg(long)]
        host: Option<String>,
    },
    /// List all accounts. Run while the server is stopped.
    Accounts,
    /// Show the ledger journal of an account
    History {
        /// Username
        username: String,
        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Register an account (prompts for a password)
    Register {
        /// Username
        username: String,
    },
    /// Credit an account outside of any wager. Run while the server is stopped.
    Adjust {
        /// Username
        username: String,
        /// Amount to credit
        amount: u64,
        /// Debit instead of credit
        #[arg(long)]
        debit: bool,
    },
    /// Lift the freeze placed on an account after a failed payout. Run while the server is stopped.
    Unfreeze {
        /// Username
        username: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Show the total currency held across all accounts
    Supply,
}

async fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path).await?,
        None => ServerConfig::default(),
    };

    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    config = config.with_port_env(std::env::var("PORT").ok().as_deref())?;

    if let Commands::Serve { port, host } = &cli.command {
        if let Some(port) = port {
            config.port = *port;
        }
        if let Some(host) = host {
            config.host = host.clone();
        }
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "rollbux={},rollbux_core={},rollbux_coinflip={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&cli).await?;

    // Ensure data directory exists
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let storage = Arc::new(Storage::new(&config.db_path()).await?);
    let accounts = Arc::new(AccountStore::open(storage.clone()).await?);

    // Execute command
    let result = match cli.command {
        Commands::Serve { .. } => commands::serve(&config, storage, accounts).await,
        Commands::Accounts => commands::list_accounts(&accounts).await,
        Commands::History { username, limit } => {
            commands::show_history(&accounts, &username, limit).await
        }
        Commands::Register { username } => {
            let credentials = CredentialStore::new(storage).await?;
            commands::register_account(
                &accounts,
                &credentials,
                &username,
                config.engine.starting_balance,
            )
            .await
        }
        Commands::Adjust {
            username,
            amount,
            debit,
        } => commands::adjust_balance(&accounts, &username, amount, debit).await,
        Commands::Unfreeze { username, force } => {
            commands::unfreeze_account(&accounts, &username, force).await
        }
        Commands::Supply => commands::show_supply(&accounts).await,
    };

    if let Err(e) = result {
        match e.downcast_ref::<LedgerError>() {
            Some(LedgerError::AccountNotFound { identity }) => {
                eprintln!("Error: Account '{}' not found", identity);
                eprintln!("Use 'rollbux accounts' to see registered accounts");
            }
            Some(LedgerError::InsufficientFunds { need, available }) => {
                eprintln!("Error: Insufficient funds");
                eprintln!("Need: {}, Available: {}", need, available);
            }
            Some(LedgerError::Frozen { identity }) => {
                eprintln!("Error: Account '{}' is frozen", identity);
                eprintln!("Use 'rollbux unfreeze {}' once it is reconciled", identity);
            }
            _ => {
                eprintln!("Error: {:#}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
