#![forbid(unsafe_code)]

//! Daemon entry point: load configuration, install the tracing subscriber,
//! spawn the admin API and run the dimming proxy.

use std::net::SocketAddr;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use umbra_core::UmbraConfig;
use umbra_daemon::{api, build_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "umbra.toml".to_string());
    let config = UmbraConfig::from_file(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        backend = %format!("{}:{}", config.proxying.backend_host, config.proxying.backend_port),
        "starting umbra"
    );

    let server = build_server(&config).context("building server from configuration")?;

    let admin_addr = SocketAddr::from(([0, 0, 0, 0], config.admin.port));
    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("binding admin API on {admin_addr}"))?;
    info!(addr = %admin_addr, "admin API listening");
    let admin_router = api::router(server.clone());
    tokio::spawn(async move {
        if let Err(err) = axum::serve(admin_listener, admin_router).await {
            tracing::error!(%err, "admin API server failed");
        }
    });

    let frontend_addr = SocketAddr::from(([0, 0, 0, 0], config.proxying.frontend_port));
    server
        .listen_and_serve(frontend_addr)
        .await
        .context("serving the dimming proxy")?;

    Ok(())
}
