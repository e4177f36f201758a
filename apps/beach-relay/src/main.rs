use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use beach_relay::{build_router, config::Config, spawn_sweeper, RelayState};

#[derive(Parser, Debug)]
#[command(name = "beach-relay")]
#[command(about = "Rendezvous mailbox relay for beach-tunnel handshakes")]
struct Cli {
    /// Port to listen on (overrides BEACH_RELAY_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    info!(
        port = config.port,
        pull_timeout_secs = config.pull_timeout.as_secs(),
        mailbox_capacity = config.mailbox_capacity,
        "starting beach relay"
    );

    let state = RelayState::new(&config);
    let sweeper = spawn_sweeper(state.store.clone(), config.idle_ttl);
    let app = build_router(state);

    let addr = format!("{}:{}", cli.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("beach relay listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("relay server failed")?;
    sweeper.abort();
    Ok(())
}
