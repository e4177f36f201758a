use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use beach_tunnel::signaling::HttpRelay;
use beach_tunnel::telemetry::{self, LogConfig, LogLevel};
use beach_tunnel::transport::webrtc::WebRtcConnector;
use beach_tunnel::{Dialer, Listener, RendezvousKey, TunnelConfig};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    telemetry::init_logging(&log_config).context("failed to configure logging")?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let mut config = TunnelConfig::from_env();
    if let Some(relay_url) = cli.relay_url {
        config = config.with_relay_url(relay_url);
    }

    match cli.command {
        Command::Newkey => {
            println!("{}", RendezvousKey::generate());
            Ok(())
        }
        Command::Server(args) => handle_server(config, args).await,
        Command::Client(args) => handle_client(config, args).await,
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "beach-tunnel",
    about = "Tunnel a TCP service between two hosts over a peer-to-peer data channel",
    author,
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "BEACH_TUNNEL_RELAY",
        help = "Base URL of the rendezvous relay"
    )]
    relay_url: Option<String>,

    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "BEACH_TUNNEL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "BEACH_TUNNEL_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh random rendezvous key
    Newkey,
    /// Wait for dialers on a key and forward each tunnel to a local service
    Server(ServerArgs),
    /// Accept local connections and tunnel each one to the server
    Client(ClientArgs),
}

#[derive(Args, Debug)]
struct ServerArgs {
    #[arg(long, default_value = "sample", help = "Rendezvous key shared with clients")]
    key: String,

    #[arg(
        long,
        value_name = "HOST:PORT",
        default_value = "127.0.0.1:22",
        help = "Local service each tunnel is forwarded to"
    )]
    dial: String,
}

#[derive(Args, Debug)]
struct ClientArgs {
    #[arg(long, default_value = "sample", help = "Rendezvous key of the server")]
    key: String,

    #[arg(
        long,
        value_name = "HOST:PORT",
        default_value = "127.0.0.1:2222",
        help = "Local address to accept connections on"
    )]
    listen: String,
}

fn shutdown_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, closing sessions");
            trigger.cancel();
        }
    });
    token
}

async fn handle_server(config: TunnelConfig, args: ServerArgs) -> anyhow::Result<()> {
    let relay = HttpRelay::new(&config.relay_url).context("invalid relay url")?;
    let connector = WebRtcConnector::new(&config).context("failed to set up WebRTC")?;
    let listener = Listener::new(
        config,
        RendezvousKey::new(args.key),
        Arc::new(relay),
        Arc::new(connector),
        args.dial,
        shutdown_on_interrupt(),
    );
    listener.run().await?;
    Ok(())
}

async fn handle_client(config: TunnelConfig, args: ClientArgs) -> anyhow::Result<()> {
    let relay = HttpRelay::new(&config.relay_url).context("invalid relay url")?;
    let connector = WebRtcConnector::new(&config).context("failed to set up WebRTC")?;
    let socket = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to listen on {}", args.listen))?;
    let dialer = Dialer::new(
        config,
        RendezvousKey::new(args.key),
        Arc::new(relay),
        Arc::new(connector),
        shutdown_on_interrupt(),
    );
    dialer.serve(socket).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let cli = Cli::try_parse_from(["beach-tunnel", "server"]).expect("parse");
        match cli.command {
            Command::Server(args) => {
                assert_eq!(args.key, "sample");
                assert_eq!(args.dial, "127.0.0.1:22");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.logging.level, LogLevel::Warn);
    }

    #[test]
    fn client_flags_and_global_relay() {
        let cli = Cli::try_parse_from([
            "beach-tunnel",
            "client",
            "--key",
            "room1",
            "--listen",
            "127.0.0.1:9000",
            "--relay-url",
            "http://relay.example:8080",
        ])
        .expect("parse");
        assert_eq!(cli.relay_url.as_deref(), Some("http://relay.example:8080"));
        match cli.command {
            Command::Client(args) => {
                assert_eq!(args.key, "room1");
                assert_eq!(args.listen, "127.0.0.1:9000");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
