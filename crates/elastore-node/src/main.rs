//! Elastore storage node

use clap::Parser;
use elastore_core::StorageService;
use elastore_node::{load_config, run_node, ConfigOverrides};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "elastore-node")]
#[command(about = "Elastic object storage node")]
#[command(version)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "ELASTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Metadata service address (host:port)
    #[arg(short, long)]
    metadata_service_address: Option<String>,

    /// Address to bind to
    #[arg(short = 'H', long)]
    listen_address: Option<String>,

    /// Hostname advertised to other nodes
    #[arg(long)]
    hostname: Option<String>,

    /// RPC port
    #[arg(short, long)]
    port: Option<u16>,

    /// Diagnostics HTTP port
    #[arg(long)]
    port_http_server: Option<u16>,

    /// Directory for spilled objects
    #[arg(long)]
    local_storage_path: Option<PathBuf>,

    /// Relocation block size in bytes
    #[arg(long)]
    cache_block_size: Option<usize>,

    /// Local disk budget in bytes
    #[arg(long)]
    available_local_storage: Option<u64>,

    /// Local memory budget in bytes
    #[arg(long)]
    available_local_memory: Option<u64>,

    /// Keep local copies of objects read back from the object store
    #[arg(long)]
    cache_objects_from_s3: bool,

    /// Relocate all sealed local objects before shutting down
    #[arg(long)]
    force_relocation_when_stopping: bool,

    /// Enable subscriptions and change notifications
    #[arg(long)]
    pub_sub: bool,

    /// Enable debug logging
    #[arg(short, long, env = "ELASTORE_DEBUG")]
    debug: bool,

    /// Log as JSON lines
    #[arg(long, env = "ELASTORE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            metadata_service_address: self.metadata_service_address.clone(),
            listen_address: self.listen_address.clone(),
            hostname: self.hostname.clone(),
            port: self.port,
            port_http_server: self.port_http_server,
            local_storage_path: self.local_storage_path.clone(),
            cache_block_size: self.cache_block_size,
            available_local_storage: self.available_local_storage,
            available_local_memory: self.available_local_memory,
            cache_objects_from_s3: self.cache_objects_from_s3,
            force_relocation_when_stopping: self.force_relocation_when_stopping,
            pub_sub_enabled: self.pub_sub,
        }
    }
}

fn init_logging(debug: bool, json: bool) {
    let log_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "elastore_node={log_level},elastore_core={log_level},elastore_blockstore={log_level},tower_http={log_level}"
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(args.debug, args.log_json);

    let config = args.overrides().apply(load_config(args.config.as_deref())?);
    tracing::info!(
        "Starting elastore node {} (metadata service {})",
        config.advertised_address(),
        config.metadata_service_address
    );
    if config.force_relocation_when_stopping {
        tracing::info!("Sealed local objects will be relocated on shutdown");
    }

    run_node(StorageService::new(config), shutdown_signal()).await
}
