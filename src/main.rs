//! API security shield.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌───────────────────────────────────────────────┐
//!                          │                  API SHIELD                    │
//!                          │                                                │
//!     Client Request       │  ┌──────────┐   ┌────────────┐   ┌──────────┐  │
//!     ─────────────────────┼─▶│  http    │──▶│  security  │──▶│ forward  │──┼──▶ Data
//!                          │  │  server  │   │ middleware │   │ handler  │  │    Backend
//!                          │  └──────────┘   └─────┬──────┘   └──────────┘  │
//!     Client Response      │                       │                        │
//!     ◀────────────────────┼── JSON error ◀────────┘ (rejected)             │
//!                          │                                                │
//!                          │  config (watcher) · observability · admin API  │
//!                          └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use api_shield::admin::{setup_admin_router, AdminState};
use api_shield::config::loader::apply_env_overrides;
use api_shield::config::validation::validate_config;
use api_shield::config::{load_config, ConfigError, ConfigWatcher, ShieldConfig};
use api_shield::http::HttpServer;
use api_shield::lifecycle::{signals, Shutdown};
use api_shield::observability::{logging, metrics};
use api_shield::security::TracingAuditSink;

#[derive(Parser)]
#[command(name = "api-shield")]
#[command(about = "Request security validation in front of a data backend", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn default_config() -> Result<ShieldConfig, ConfigError> {
    let mut config = ShieldConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => default_config()?,
    };

    logging::init(&config.observability);

    tracing::info!("api-shield v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        environment = ?config.policy.environment,
        rate_limit_enabled = config.rate_limit.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher stops when dropped, so it lives as long as main.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), Some(updates)),
                Err(e) => {
                    tracing::error!(error = %e, "Config watcher failed to start; hot reload disabled");
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    let shutdown = Arc::new(Shutdown::new());
    let server = HttpServer::new(config.clone(), Arc::new(TracingAuditSink));

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");

        let router = setup_admin_router(AdminState::new(
            server.state().clone(),
            &config.admin.api_key,
        ));
        let mut stop = shutdown.subscribe();
        Some(tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API failed");
            }
        }))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let stop = shutdown.subscribe();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { signals::wait_for_shutdown(&shutdown).await });
    }

    server.run(listener, config_updates, stop).await?;

    if let Some(task) = admin_task {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
