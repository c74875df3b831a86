//! tx-executor - submit a contract call or deployment and wait for its outcome
//!
//! Prints the outcome as JSON on stdout and exits 0 only on success.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use ethers::types::U256;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use tx_executor::backend;
use tx_executor::contract::parse_amount;
use tx_executor::tx::NonceManager;
use tx_executor::{
    CallRequest, ContractArtifact, ContractTarget, ExecutorError, ExecutorResult, Settings,
    TransactionExecutor, TransactionOutcome, TxState,
};

#[derive(Parser)]
#[command(
    name = "tx-executor",
    version,
    about = "Submit contract calls and deployments, then wait for the receipt",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file path
    #[arg(short, long, global = true, env = "TX_EXECUTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Invoke a contract method
    Call {
        /// Contract address
        #[arg(long)]
        address: String,

        /// ABI file (plain array or artifact with an `abi` key)
        #[arg(long)]
        abi: PathBuf,

        /// Method name
        #[arg(long)]
        method: String,

        /// Method argument, repeated in order
        #[arg(long = "arg")]
        args: Vec<String>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Deploy a contract from a compiled artifact
    Deploy {
        /// Artifact JSON with `abi` and `bytecode`
        #[arg(long)]
        artifact: PathBuf,

        /// Constructor argument, repeated in order
        #[arg(long = "arg")]
        args: Vec<String>,

        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Args)]
struct Overrides {
    /// Value to send, e.g. `1000`, `0.5ether`, `20gwei`
    #[arg(long)]
    value: Option<String>,

    /// Gas limit for this request only
    #[arg(long)]
    gas_limit: Option<u64>,

    /// Gas price in wei for this request only
    #[arg(long)]
    gas_price: Option<String>,
}

impl Overrides {
    fn apply(&self, mut request: CallRequest) -> ExecutorResult<CallRequest> {
        if let Some(value) = &self.value {
            request = request.with_value(parse_amount(value)?);
        }
        if let Some(limit) = self.gas_limit {
            request = request.with_gas_limit(U256::from(limit));
        }
        if let Some(price) = &self.gas_price {
            request = request.with_gas_price(parse_amount(price)?);
        }
        Ok(request)
    }
}

/// What gets printed on stdout
#[derive(Serialize)]
struct Report<'a> {
    command: &'static str,
    state: TxState,
    completed_at: DateTime<Utc>,
    #[serde(flatten)]
    outcome: &'a TransactionOutcome,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.json_logs);

    info!("Starting tx-executor v{}", env!("CARGO_PKG_VERSION"));

    let command = match cli.command {
        Command::Call { .. } => "call",
        Command::Deploy { .. } => "deploy",
    };

    let (outcome, settings) = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => (run(cli.command, &settings).await, Some(settings)),
        Err(e) => (
            TransactionOutcome::from(ExecutorError::InvalidConfiguration(format!("{:#}", e))),
            None,
        ),
    };

    let report = Report {
        command,
        state: outcome.state(),
        completed_at: Utc::now(),
        outcome: &outcome,
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("Failed to serialize outcome: {}", e),
    }
    if !outcome.is_success() {
        eprintln!("tx-executor: {}", outcome);
    }

    if let Some(path) = settings.as_ref().and_then(|s| s.metrics.textfile_path.as_ref()) {
        if let Err(e) = tx_executor::metrics::write_textfile(path) {
            warn!("Failed to write metrics to {:?}: {}", path, e);
        }
    }

    std::process::exit(outcome.exit_code());
}

async fn run(command: Command, settings: &Settings) -> TransactionOutcome {
    execute(command, settings)
        .await
        .unwrap_or_else(TransactionOutcome::from)
}

async fn execute(command: Command, settings: &Settings) -> ExecutorResult<TransactionOutcome> {
    // Rejects an unknown provider_type before any connection is made
    let backend = backend::connect(settings, Arc::new(NonceManager::new())).await?;
    let executor = TransactionExecutor::from_config(&settings.executor);

    let (cancel_tx, cancel) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, abandoning wait");
        let _ = cancel_tx.send(true);
    });

    let outcome = match command {
        Command::Call {
            address,
            abi,
            method,
            args,
            overrides,
        } => {
            let target = ContractTarget::load(&address, &abi)?;
            let request = overrides.apply(CallRequest::new(method, args))?;
            executor
                .execute(&target, &request, backend.as_ref(), &cancel)
                .await
        }
        Command::Deploy {
            artifact,
            args,
            overrides,
        } => {
            let artifact = ContractArtifact::load(&artifact)?;
            let request = overrides.apply(CallRequest::constructor(args))?;
            executor
                .deploy(&artifact, &request, backend.as_ref(), &cancel)
                .await
        }
    };

    Ok(outcome)
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tx_executor=debug,hyper=warn,reqwest=warn"));

    // stdout carries the outcome report only
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_target(true).with_writer(std::io::stderr)))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
