//! Search proxy (v1)
//!
//! An admission-controlling reverse proxy for a search backend, built with
//! Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                 SEARCH PROXY                  │
//!                    │                                               │
//!   Client Request   │  ┌────────┐   ┌───────────┐   ┌───────────┐ │
//!   ─────────────────┼─▶│  http  │──▶│ admission │──▶│ forwarder │─┼──▶ Search
//!                    │  │ server │   │  engine   │   │  (hyper)  │ │    Backend
//!                    │  └────────┘   └─────┬─────┘   └─────┬─────┘ │
//!                    │                     │               │        │
//!   Client Response  │  ┌──────────────┐   │               │        │
//!   ◀────────────────┼──│ metered relay│◀──┴───────────────┘        │
//!                    │  └──────────────┘                            │
//!                    │                                               │
//!                    │  ┌─────────────────────────────────────────┐ │
//!                    │  │          Cross-Cutting Concerns          │ │
//!                    │  │  config   observability   admin   lifecycle │
//!                    │  └─────────────────────────────────────────┘ │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;

use search_proxy::admin::{setup_admin_router, AdminState};
use search_proxy::admission::AdmissionEngine;
use search_proxy::config::{loader, ProxyConfig};
use search_proxy::http::HttpServer;
use search_proxy::lifecycle::{signals, Shutdown};
use search_proxy::observability;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional config path as the single positional argument.
    let config = match std::env::args().nth(1) {
        Some(path) => loader::load_config(Path::new(&path))?,
        None => ProxyConfig::default(),
    };

    observability::logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        upstream = %format!("{}:{}", config.upstream.host, config.upstream.port),
        search_max_rps = config.limits.search_max_rps,
        "search-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let engine = Arc::new(AdmissionEngine::new(
        config.limits.clone(),
        config.pacing.clone(),
    ));

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    // Admin API on its own listener.
    if config.admin.enabled {
        let admin_state = AdminState {
            engine: engine.clone(),
            config: Arc::new(config.clone()),
            started: std::time::Instant::now(),
        };
        let admin_router = setup_admin_router(admin_state);
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let mut admin_shutdown = shutdown.subscribe();
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");
        tokio::spawn(async move {
            let result = axum::serve(admin_listener, admin_router)
                .with_graceful_shutdown(async move {
                    let _ = admin_shutdown.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API server failed");
            }
        });
    }

    tokio::spawn(signals::shutdown_on_signal(shutdown));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config, engine);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
