//! SDS Control Plane
//!
//! Starts the driver manager, the inventory refresh loop and the REST
//! surface, then runs until interrupted.

use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sds_controlplane::drivers::manager::SetupPolicy;
use sds_controlplane::store::open_store;
use sds_controlplane::{
    ApiServer, ApiServerConfig, Config, ConfigOverrides, Controller, DriverManager,
    DriverRegistry, Metrics,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// SDS Control Plane - volume lifecycle and replication across storage backends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file
    #[arg(long, short = 'c', env = "SDS_CONFIG")]
    config: Option<PathBuf>,

    /// host:port the API listens on
    #[arg(long, env = "SDS_API_ENDPOINT")]
    api_endpoint: Option<String>,

    /// Metadata store backend (memory, file)
    #[arg(long, env = "SDS_DB_DRIVER")]
    db_driver: Option<String>,

    /// Metadata store location
    #[arg(long, env = "SDS_DB_ENDPOINT")]
    db_endpoint: Option<String>,

    /// noauth or keystone
    #[arg(long, env = "OPENSDS_AUTH_STRATEGY")]
    auth_strategy: Option<String>,

    /// Comma-separated backends to start
    #[arg(long, env = "SDS_ENABLED_BACKENDS")]
    enabled_backends: Option<String>,

    /// Node the docks run on
    #[arg(long, env = "SDS_NODE_ID")]
    node_id: Option<String>,

    /// Budget for one driver call, in seconds
    #[arg(long, env = "SDS_DRIVER_TIMEOUT")]
    driver_timeout_secs: Option<u64>,

    /// Seconds between pool re-listings (0 disables)
    #[arg(long, env = "SDS_INVENTORY_REFRESH")]
    inventory_refresh_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_endpoint: self.api_endpoint.clone(),
            db_driver: self.db_driver.clone(),
            db_endpoint: self.db_endpoint.clone(),
            auth_strategy: self.auth_strategy.clone(),
            enabled_backends: self.enabled_backends.clone(),
            node_id: self.node_id.clone(),
            driver_timeout_secs: self.driver_timeout_secs,
            inventory_refresh_secs: self.inventory_refresh_secs,
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = Config::load(args.config.as_deref(), args.overrides())
        .context("invalid configuration")?;
    let config = Arc::new(config);

    info!("Starting SDS control plane");
    info!("  Version: {}", sds_controlplane::VERSION);
    info!("  API endpoint: {}", config.api_endpoint);
    info!("  Metadata store: {}", config.db.driver);
    info!("  Auth strategy: {:?}", config.auth_strategy);
    info!("  Backends: {}", config.backends.enabled);

    let store = open_store(&config.db)
        .await
        .context("metadata store unreachable")?;
    let registry = DriverRegistry::with_builtin();
    let manager = Arc::new(
        DriverManager::new(config.clone(), &registry, store)
            .context("cannot build driver manager")?
            .with_setup_policy(SetupPolicy::from_config(&config)),
    );
    let metrics = Arc::new(Metrics::new().context("cannot register metrics")?);
    let controller = Arc::new(Controller::new(config.clone(), manager.clone(), metrics));

    // Setup runs alongside the request path; readiness gates each backend
    let setup_tasks = manager.start().await.context("cannot start drivers")?;
    info!("Driver setup started for {} backends", setup_tasks.len());

    let (shutdown_tx, _) = broadcast::channel(1);
    let refresh = config.inventory_refresh().map(|interval| {
        controller
            .inventory()
            .spawn_refresh(interval, shutdown_tx.subscribe())
    });

    let api_config =
        ApiServerConfig::from_endpoint(&config.api_endpoint).context("invalid api_endpoint")?;
    let api_server = Arc::new(ApiServer::new(api_config, controller.clone()));

    let server = api_server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
        }
        server.shutdown();
    });

    api_server.run().await.context("API server failed")?;

    let _ = shutdown_tx.send(());
    if let Some(refresh) = refresh {
        if let Err(e) = refresh.await {
            warn!("Inventory refresh ended abnormally: {}", e);
        }
    }
    for task in setup_tasks {
        task.abort();
    }
    manager.shutdown().await;

    info!("Control plane shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
