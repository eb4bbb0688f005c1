use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coop_ledger::anchor::ethereum::{AnchorConfig, EthereumAnchor};
use coop_ledger::anchor::watcher::WatcherConfig;
use coop_ledger::anchor::AnchorClient;
use coop_ledger::chain::Ledger;
use coop_ledger::error::{LedgerError, Result};
use coop_ledger::server::{self, AppState};
use coop_ledger::state::Database;

#[derive(Parser)]
#[command(name = "coop-ledger")]
#[command(about = "Tamper-evident block ledger for cooperative banking transactions")]
#[command(version)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// External ledger JSON-RPC endpoint
    #[arg(long, env = "SEPOLIA_RPC_URL", global = true)]
    rpc_url: Option<String>,

    /// Address of the ledger contract
    #[arg(long, env = "CONTRACT_ADDRESS", global = true)]
    contract_address: Option<String>,

    /// Hex signing key for anchor submissions
    #[arg(long, env = "PRIVATE_KEY", global = true, hide_env_values = true)]
    private_key: Option<String>,

    /// Expected external chain id
    #[arg(long, env = "CHAIN_ID", global = true)]
    chain_id: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen: String,
    },
    /// Run migrations and create the genesis block
    Init,
    /// Append a block for a committed transaction
    Append {
        transaction_id: String,
    },
    /// Verify one block or the whole chain
    Verify {
        #[arg(long)]
        block: Option<u64>,
    },
    /// Print ledger info as JSON
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "coop-ledger failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let database_url = cli
        .database_url
        .clone()
        .ok_or(LedgerError::ConfigurationMissing("DATABASE_URL"))?;
    let db = Database::connect(&database_url).await?;

    if let Commands::Init = cli.command {
        db.migrate().await?;
        let ledger = Ledger::new(Arc::new(db), AnchorClient::disabled(), WatcherConfig::default());
        if ledger.builder().ensure_genesis().await? {
            info!("Ledger initialized");
        } else {
            info!("Ledger already initialized");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let anchor = connect_anchor(&cli).await;
    let ledger = Arc::new(Ledger::new(Arc::new(db.clone()), anchor, WatcherConfig::default()));

    let code = match cli.command {
        Commands::Serve { listen } => {
            db.migrate().await?;
            ledger.builder().ensure_genesis().await?;

            let state = AppState {
                ledger: Arc::clone(&ledger),
            };
            server::serve(state, &listen, shutdown_signal()).await?;
            ExitCode::SUCCESS
        }
        Commands::Append { transaction_id } => {
            let block = ledger
                .builder()
                .create_block_for_transaction(&transaction_id)
                .await?;
            println!("{}", to_json(&block)?);
            if block.anchor_tx_hash.is_some() {
                info!(block = block.number, "Waiting for anchor receipt");
                ledger.drain().await;
            }
            ExitCode::SUCCESS
        }
        Commands::Verify { block } => verify(&ledger, block).await?,
        Commands::Info => {
            println!("{}", to_json(&ledger.info().await?)?);
            ExitCode::SUCCESS
        }
        Commands::Init => ExitCode::SUCCESS,
    };

    ledger.shutdown().await;
    Ok(code)
}

/// Anchoring degrades to disabled when unconfigured or unreachable.
async fn connect_anchor(cli: &Cli) -> AnchorClient {
    let config = match AnchorConfig::from_parts(
        cli.rpc_url.clone(),
        cli.contract_address.clone(),
        cli.private_key.clone(),
        cli.chain_id,
    ) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "External anchoring disabled");
            return AnchorClient::disabled();
        }
    };

    match EthereumAnchor::connect(config).await {
        Ok(anchor) => {
            info!(
                chain_id = anchor.chain_id(),
                contract = %anchor.contract_address(),
                "External anchoring enabled"
            );
            AnchorClient::enabled(Arc::new(anchor))
        }
        Err(e) => {
            warn!(error = %e, "External ledger unreachable, anchoring disabled");
            AnchorClient::disabled()
        }
    }
}

async fn verify(ledger: &Ledger, block: Option<u64>) -> Result<ExitCode> {
    let outcome = match block {
        Some(number) => ledger.verifier().verify_block(number).await.map(|()| {
            println!("Block #{number} is valid");
        }),
        None => ledger.verifier().verify_chain().await.map(|report| {
            println!(
                "Chain is valid: {} blocks, {} anchors confirmed, {} inconclusive",
                report.blocks_checked, report.anchors_confirmed, report.anchors_inconclusive
            );
        }),
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) if e.is_verification_failure() => {
            eprintln!("Verification failed: {e}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| LedgerError::Serialization(e.to_string()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
