//! Sole node — command-line entry point.
//!
//! Wires together the chain store, mempool, P2P host, optional mining
//! loop, and optional HTTP gateway behind a `clap`-derived CLI. Every
//! subcommand here is a thin external collaborator: it only reaches the
//! core through the contracts the library crates expose.

mod config;
mod wallet;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use thiserror::Error;

use sole_chain::{Chain, ChainError, UtxoIndex};
use sole_core::Transaction;
use sole_mempool::Mempool;
use sole_mining::MiningLoop;
use sole_network::Host;

use config::NodeConfig;
use wallet::Wallet;

#[derive(Debug, Error)]
enum NodeError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Wallet(#[from] wallet::WalletError),

    #[error(transparent)]
    Network(#[from] sole_network::NetworkError),

    #[error(transparent)]
    Tx(#[from] sole_core::TxError),

    #[error("address is malformed or has an invalid checksum: {0}")]
    InvalidAddress(String),

    #[error("request to the local gateway failed: {0}")]
    Gateway(#[from] reqwest::Error),

    #[error("timed out after {0:?} waiting for the local gateway")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A permissioned proof-of-authority UTXO ledger node.
#[derive(Parser)]
#[clap(name = "sole")]
#[clap(about = "Sole — a permissioned proof-of-authority UTXO ledger node")]
struct Cli {
    /// Path to a TOML configuration file; missing is not an error.
    #[clap(long, default_value = "sole.toml")]
    config: PathBuf,

    /// Overrides the configured data directory.
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// Verbosity level (0 = errors only, 4 = trace).
    #[clap(short, long, default_value = "2")]
    verbosity: u8,

    /// Base URL of the local node's HTTP gateway, used by read/send
    /// subcommands that talk to a running node instead of the store
    /// directly.
    #[clap(long, default_value = "http://127.0.0.1:8545")]
    api: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Creates a fresh chain store and appends the genesis block.
    Init,
    /// Runs the node: P2P host, optional mining loop, optional HTTP gateway.
    Start {
        /// Address of an authorized validator whose key is in the local
        /// wallet; activates the mining loop when present.
        #[clap(long)]
        validator: Option<String>,
        /// Disables the HTTP gateway.
        #[clap(long)]
        no_api: bool,
    },
    /// Wallet key management.
    Wallet {
        #[clap(subcommand)]
        action: WalletCommand,
    },
    /// Builds, signs, and submits a transfer through the local gateway.
    Send {
        from: String,
        to: String,
        amount: i64,
    },
    /// Lists peers known to the running node.
    Peers,
    /// Lists the compile-time authorized validator set.
    Validators,
}

#[derive(Subcommand)]
enum WalletCommand {
    /// Generates a new keypair and prints its address.
    New {
        #[clap(long, default_value = "default")]
        label: String,
    },
    /// Reports the balance of an address via the local gateway.
    Balance { address: String },
}

fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbosity);

    let runtime = tokio::runtime::Runtime::new().expect("failed to start the async runtime");
    let result = runtime.block_on(run(cli));

    if let Err(e) = result {
        eprintln!("[sole] error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), NodeError> {
    let mut node_config = NodeConfig::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        node_config.data_dir = data_dir;
    }
    node_config.network.identity_path = node_config.identity_path();

    match cli.command {
        Commands::Init => cmd_init(&node_config),
        Commands::Start { validator, no_api } => cmd_start(node_config, validator, no_api).await,
        Commands::Wallet { action } => match action {
            WalletCommand::New { label } => cmd_wallet_new(&node_config, &label),
            WalletCommand::Balance { address } => cmd_wallet_balance(&cli.api, &address).await,
        },
        Commands::Send { from, to, amount } => {
            cmd_send(&cli.api, &node_config.wallet_path(), &from, &to, amount).await
        }
        Commands::Peers => cmd_peers(&cli.api).await,
        Commands::Validators => cmd_validators(&node_config),
    }
}

fn cmd_init(node_config: &NodeConfig) -> Result<(), NodeError> {
    let chain = Chain::init(node_config.chain_dir(), node_config.consensus.clone())?;
    let genesis = chain.get_block(&chain.block_hashes()?.last().copied().unwrap())?;
    info!(
        "initialized chain store at {}: genesis hash {}, height {}",
        node_config.chain_dir().display(),
        hex::encode(genesis.hash),
        chain.tip_height()?
    );
    println!("genesis hash: {}", hex::encode(genesis.hash));
    Ok(())
}

fn cmd_wallet_new(node_config: &NodeConfig, label: &str) -> Result<(), NodeError> {
    let path = node_config.wallet_path();
    let mut w = Wallet::load_or_default(&path)?;
    let address = w.new_entry(label);
    w.save(&path)?;
    println!("{}", address.encode());
    Ok(())
}

async fn cmd_wallet_balance(api: &str, address: &str) -> Result<(), NodeError> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
    let url = format!("{}/balance/{}", api.trim_end_matches('/'), address);
    let body: serde_json::Value = client.get(url).send().await?.json().await?;
    println!("{}", body.get("balance").cloned().unwrap_or_default());
    Ok(())
}

async fn cmd_peers(api: &str) -> Result<(), NodeError> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
    let url = format!("{}/peers", api.trim_end_matches('/'));
    let peers: Vec<String> = client.get(url).send().await?.json().await?;
    for peer in peers {
        println!("{peer}");
    }
    Ok(())
}

fn cmd_validators(node_config: &NodeConfig) -> Result<(), NodeError> {
    for validator in &node_config.consensus.authorized_validators {
        println!("{validator}");
    }
    Ok(())
}

/// Builds a transfer from `from` to `to`, signs it with the wallet entry
/// controlling `from`, and submits it to the local gateway. End-to-end
/// timeout of 10 seconds, per the node's cancellation policy.
async fn cmd_send(api: &str, wallet_path: &std::path::Path, from: &str, to: &str, amount: i64) -> Result<(), NodeError> {
    tokio::time::timeout(Duration::from_secs(10), send_inner(api, wallet_path, from, to, amount))
        .await
        .map_err(|_| NodeError::Timeout(Duration::from_secs(10)))?
}

async fn send_inner(api: &str, wallet_path: &std::path::Path, from: &str, to: &str, amount: i64) -> Result<(), NodeError> {
    let to_address =
        sole_crypto::Address::decode(to).map_err(|_| NodeError::InvalidAddress(to.to_string()))?;
    let wallet = Wallet::load_or_default(wallet_path)?;
    let (signing_key, from_pubkey) = wallet.signing_key_for(from)?;
    let from_address =
        sole_crypto::Address::decode(from).map_err(|_| NodeError::InvalidAddress(from.to_string()))?;

    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
    let base = api.trim_end_matches('/');

    #[derive(serde::Deserialize)]
    struct UtxoView {
        tx_id: String,
        vout: i32,
        value: i64,
    }
    let utxos: Vec<UtxoView> = client
        .get(format!("{base}/utxos/{from}"))
        .send()
        .await?
        .json()
        .await?;

    let spendable: Vec<([u8; 32], i32, i64)> = utxos
        .iter()
        .filter_map(|u| {
            let bytes = hex::decode(&u.tx_id).ok()?;
            let mut id = [0u8; 32];
            if bytes.len() != 32 {
                return None;
            }
            id.copy_from_slice(&bytes);
            Some((id, u.vout, u.value))
        })
        .collect();

    let mut tx = Transaction::new_transfer(&from_pubkey, from_address.0, to_address.0, amount, &spendable)?;

    let mut prev_txs = std::collections::HashMap::new();
    for input in &tx.vin {
        if prev_txs.contains_key(&input.prev_tx_id) {
            continue;
        }
        let prev: sole_core::Transaction = client
            .get(format!("{base}/tx/id/{}", hex::encode(input.prev_tx_id)))
            .send()
            .await?
            .json()
            .await?;
        prev_txs.insert(input.prev_tx_id, prev);
    }
    tx.sign(&signing_key, &prev_txs)?;

    let raw_tx = hex::encode(tx.serialize()?);
    let response: serde_json::Value = client
        .post(format!("{base}/tx"))
        .json(&serde_json::json!({ "raw_tx": raw_tx }))
        .send()
        .await?
        .json()
        .await?;
    println!("submitted {}: {}", hex::encode(tx.id), response);
    Ok(())
}

async fn cmd_start(node_config: NodeConfig, validator: Option<String>, no_api: bool) -> Result<(), NodeError> {
    let chain = Arc::new(Chain::open(node_config.chain_dir(), node_config.consensus.clone())?);
    let mempool = Arc::new(Mempool::new());

    UtxoIndex::new(&chain).reindex()?;

    let host = Host::new(node_config.network.clone(), chain.clone(), mempool.clone())?;
    info!("node identity: {}", host.peer_id());

    let mut tasks = tokio::task::JoinSet::new();

    {
        let host = host.clone();
        tasks.spawn(async move {
            if let Err(e) = host.serve().await {
                error!("network host exited: {e}");
            }
        });
    }
    {
        let host = host.clone();
        tasks.spawn(async move {
            if let Err(e) = host.run_discovery().await {
                warn!("mDNS discovery exited: {e}");
            }
        });
    }
    host.dial_bootstrap_peers().await;

    if !no_api {
        let api_config = node_config.api.clone();
        let chain = chain.clone();
        let mempool = mempool.clone();
        let host = host.clone();
        tasks.spawn(async move {
            if let Err(e) = sole_api::serve(api_config, chain, mempool, host).await {
                error!("HTTP gateway exited: {e}");
            }
        });
    }

    if let Some(validator_address) = validator {
        let wallet = Wallet::load_or_default(&node_config.wallet_path())?;
        let (signing_key, pubkey) = wallet.signing_key_for(&validator_address)?;
        if !node_config.consensus.is_authorized(&pubkey) {
            warn!("{validator_address} is not in the authorized validator set; mining loop not started");
        } else {
            let validator_hash = sole_crypto::Address::decode(&validator_address)
                .map_err(|_| NodeError::InvalidAddress(validator_address.clone()))?
                .0;
            let mining_loop = MiningLoop::new(
                node_config.mining.clone(),
                validator_hash,
                signing_key,
                chain.clone(),
                mempool.clone(),
                host.clone(),
            );
            tasks.spawn(async move {
                mining_loop.run().await;
            });
            info!("mining loop started for validator {validator_address}");
        }
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping services");
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
