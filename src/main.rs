use clap::Parser;
use std::sync::Arc;
use timed::block::genesis::genesis_block;
use timed::committer::AtomicCommitter;
use timed::config::{Config, LoggingConfig};
use timed::crypto::OperatorKeypair;
use timed::finality::aggregator::FinalityAggregator;
use timed::finality::enforcement::FinalityEnforcer;
use timed::masternode_registry::MasternodeRegistry;
use timed::network::{Broadcaster, NullBroadcaster};
use timed::network_type::NetworkType;
use timed::rpc::{RpcHandler, RpcServer};
use timed::scheduler::{self, ProductionGuard};
use timed::settlement::SettlementEngine;
use timed::shutdown::ShutdownManager;
use timed::slashing::SlashingRecorder;
use timed::storage::Stores;
use timed::sync_gate::{is_synced, SyncInputs};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "timed")]
#[command(about = "Node daemon for the proof-of-service consensus engine", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(long)]
    listen_addr: Option<String>,

    /// Operator key (hex-encoded secp256k1 scalar) overriding the config file.
    #[arg(long)]
    operator_key: Option<String>,

    #[arg(long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,

    /// Force rebuilding settlement state from the chain at startup, even if
    /// the all-committed marker agrees across every store.
    #[arg(long)]
    rebuild_from_chain: bool,
}

fn setup_logging(config: &LoggingConfig, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "trace" } else { &config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match config.format.as_str() {
        "json" => {
            fmt().json().with_env_filter(filter).with_thread_ids(false).init();
        }
        _ => {
            fmt().with_env_filter(filter).compact().init();
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let network_type = Config::load_from_file(&args.config)
        .map(|cfg| cfg.node.network_type())
        .unwrap_or(NetworkType::Testnet);

    if args.generate_config {
        let config = Config::default();
        match config.save_to_file(&args.config) {
            Ok(_) => {
                println!("generated default config at {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("failed to generate config: {e}");
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_create(&args.config, &network_type) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };
    if let Some(addr) = &args.listen_addr {
        config.network.listen_address = addr.clone();
    }
    if let Some(key) = &args.operator_key {
        config.node.operator_key_hex = Some(key.clone());
    }
    if args.rebuild_from_chain {
        config.settlement.force_rebuild_from_chain = true;
    }

    setup_logging(&config.logging, args.verbose);

    let network_type = config.node.network_type();
    let params = network_type.params();

    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    info!(version, git_hash, network = %network_type, "starting node");

    let mut shutdown_manager = ShutdownManager::new();
    let _shutdown_token = shutdown_manager.token();

    let operator_keypair = config
        .node
        .operator_key_hex
        .as_deref()
        .and_then(|hex_str| hex::decode(hex_str).ok())
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .and_then(|bytes| OperatorKeypair::from_bytes(&bytes).ok());
    let local_mn_ids: Vec<[u8; 32]> = Vec::new();
    if operator_keypair.is_none() {
        warn!("no operator key configured; running in observer-only mode");
    }

    let data_dir = if config.storage.data_dir.is_empty() {
        ".".to_string()
    } else {
        config.storage.data_dir.clone()
    };
    let db_path = format!("{data_dir}/db");
    if let Err(e) = std::fs::create_dir_all(&db_path) {
        error!(error = %e, "failed to create data directory");
        std::process::exit(1);
    }

    let stores = match Stores::open(&db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to open stores");
            std::process::exit(1);
        }
    };

    match stores.detect_torn_commit() {
        Ok(true) if !config.settlement.force_rebuild_from_chain => {
            error!("torn commit detected at startup; rerun with --rebuild-from-chain");
            std::process::exit(1);
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "failed to check for torn commit");
            std::process::exit(1);
        }
    }

    let registry = match MasternodeRegistry::open(stores.db.clone()) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!(error = %e, "failed to open masternode registry");
            std::process::exit(1);
        }
    };

    let settlement_engine = SettlementEngine::new(
        stores.settlement.clone(),
        stores.htlc.clone(),
        params.min_fee_rate,
        params.legacy_htlc_cutoff_height,
    );
    let committer = Arc::new(AtomicCommitter::new(stores.clone(), settlement_engine));

    let slashing = Arc::new(SlashingRecorder::new());
    let aggregator = Arc::new(FinalityAggregator::new(
        stores.finality.clone(),
        registry.clone(),
        slashing.clone(),
        params.quorum_threshold,
    ));
    let enforcer = Arc::new(FinalityEnforcer::hydrate(&stores.finality, params.quorum_threshold));
    if let Some(height) = enforcer.last_finalized_height() {
        info!(height, "resumed with prior finalized height");
    }

    let broadcaster: Arc<dyn Broadcaster> = Arc::new(NullBroadcaster);

    let rpc_addr = format!(
        "{}:{}",
        config.network.listen_address.split(':').next().unwrap_or("127.0.0.1"),
        network_type.default_rpc_port()
    );
    let rpc_handler = Arc::new(RpcHandler::new(
        registry.clone(),
        stores.clone(),
        aggregator.clone(),
        enforcer.clone(),
    ));
    match RpcServer::bind(&rpc_addr, rpc_handler).await {
        Ok(server) => {
            let handle = tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!(error = %e, "rpc server exited");
                }
            });
            shutdown_manager.register_task(handle);
        }
        Err(e) => {
            error!(error = %e, addr = %rpc_addr, "failed to bind rpc server");
        }
    }

    let genesis = genesis_block(&network_type.to_string(), 0);
    if committer
        .crash_recovery_required()
        .unwrap_or(false)
    {
        warn!("crash recovery required; settlement state will be rebuilt from chain on next block application");
    }
    info!(hash = %hex::encode(genesis.hash()), "genesis block computed");

    let production_guard = Arc::new(ProductionGuard::new());
    let scheduler_params = *params;
    let scheduler_registry = registry.clone();
    let scheduler_token = shutdown_manager.token();
    let scheduler_handle = tokio::spawn(async move {
        let mut prev_header = timed::block::types::BlockHeader {
            height: 0,
            timestamp: 0,
            ..Default::default()
        };
        let prev_hash = [0u8; 32];
        loop {
            if scheduler_token.is_cancelled() {
                break;
            }
            let now = chrono::Utc::now().timestamp();
            match scheduler::decide(
                &prev_header,
                &prev_hash,
                now,
                &scheduler_registry,
                &local_mn_ids,
                &scheduler_params,
            ) {
                Ok(decision) if decision.is_local_producer => {
                    match production_guard.try_claim(prev_header.height + 1) {
                        Ok(()) => info!(slot = decision.slot, "claimed production slot"),
                        Err(e) => warn!(error = %e, "production slot already claimed"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "not yet time to produce");
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            prev_header.timestamp = now;
        }
    });
    shutdown_manager.register_task(scheduler_handle);

    let sync_params = *params;
    let sync_token = shutdown_manager.token();
    let sync_handle = tokio::spawn(async move {
        loop {
            if sync_token.is_cancelled() {
                break;
            }
            let inputs = SyncInputs {
                local_height: 0,
                local_tip_timestamp: chrono::Utc::now().timestamp(),
                best_peer_header_height: None,
                downloading: false,
                last_finalized_height: None,
                now: chrono::Utc::now().timestamp(),
            };
            match is_synced(&inputs, &sync_params) {
                Ok(synced) => tracing::trace!(synced, "sync gate evaluated"),
                Err(e) => warn!(error = %e, "sync gate reports node is behind"),
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    });
    shutdown_manager.register_task(sync_handle);

    broadcaster.broadcast(timed::network::NetworkMessage::GetChainTip);

    info!("node startup complete");
    shutdown_manager.wait_for_shutdown().await;
    info!("node shut down");
}
