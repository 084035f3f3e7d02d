//! Warden API Server
//!
//! Entry point of the REST server. It loads the access-control configuration,
//! connects the entity store and serves the administrative API behind the
//! route authorization middleware.
//!
//! # Usage
//!
//! ```bash
//! # Start with a configuration file
//! warden-server --config config/warden.toml
//!
//! # Start on custom host and port
//! warden-server --config config/warden.toml --host 127.0.0.1 --port 9090
//!
//! # Enable debug logging
//! RUST_LOG=debug warden-server --config config/warden.toml
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Logging filter (trace, debug, info, warn, error)
//! - `WARDEN_CONFIG`: Configuration file (TOML, or JSON by extension)
//! - `WARDEN_HOST`: Server host (default: 0.0.0.0)
//! - `WARDEN_PORT`: Server port (default: 8080)
//! - `WARDEN_JSON_LOGS`: Force JSON log output

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_api_server::{AppState, Server, ServerConfig};
use warden_authz::logging::init_logging;
use warden_authz::store::{InMemoryEntityStore, PostgresEntityStore};
use warden_authz::{verifier_from_config, AccessConfig, AccessControl, EntityStore, LoggingMode};

/// Warden access control API server
#[derive(Parser, Debug)]
#[command(
    name = "warden-server",
    version,
    about = "REST API server for access groups and permissions",
    long_about = None
)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, env = "WARDEN_CONFIG")]
    config: PathBuf,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "WARDEN_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value = "8080", env = "WARDEN_PORT")]
    port: u16,

    /// Force JSON logging regardless of the configured mode
    #[arg(long, env = "WARDEN_JSON_LOGS")]
    json_logs: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Apply pending database migrations before serving
    #[arg(long)]
    migrate: bool,

    /// User IDs to register when running without a database
    #[arg(long, value_delimiter = ',')]
    users: Vec<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AccessConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let logging = if args.json_logs {
        LoggingMode::Json
    } else {
        config.logging
    };
    init_logging(logging, &default_filter(&args.log_level))?;

    info!("Starting Warden API Server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store = build_store(&config, &args).await?;
    let verifier = verifier_from_config(&config)?;
    let access = AccessControl::new(config, store, verifier)
        .await
        .context("Failed to initialize access control")?;
    let state = Arc::new(AppState::new(access));

    let config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
    };
    let server = Server::bind(&config, state).await?;

    if let Err(e) = server.run().await {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn build_store(config: &AccessConfig, args: &Args) -> Result<Arc<dyn EntityStore>> {
    let Some(database) = &config.database else {
        warn!("No [database] section, using the in-memory store; data is lost on shutdown");
        let store = InMemoryEntityStore::new();
        store.register_users(args.users.iter().copied()).await;
        return Ok(Arc::new(store));
    };

    let store = PostgresEntityStore::new(&database.url, database.max_connections)
        .await?
        .with_users_table(&database.users_table, &database.users_id_column)?;
    if args.migrate {
        store.run_migrations().await?;
        info!("Database migrations applied");
    }
    Ok(Arc::new(store))
}

fn default_filter(level: &str) -> String {
    let level = level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    format!(
        "warden_api_server={level},warden_authz={level},tower_http={},axum=info",
        // More verbose levels compare greater
        if level >= tracing::Level::DEBUG { "debug" } else { "info" },
        level = level.to_string().to_lowercase()
    )
}
