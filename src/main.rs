//! Relay Hub Server
//!
//! WebSocket broadcast hub. Accepts client connections and relays every message
//! to all connected clients.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use relay_hub::config::Settings;
use relay_hub::hub::Hub;
use relay_hub::server::WebSocketServer;

/// Relay Hub Server
///
/// WebSocket broadcast hub
#[derive(Parser, Debug)]
#[command(name = "relay-hub")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on [default: 8080]
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address [default: 127.0.0.1]
    #[arg(long)]
    bind: Option<String>,

    /// WebSocket endpoint path [default: /ws]
    #[arg(long)]
    path: Option<String>,

    /// TOML settings file; command line flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broadcast queue capacity (0 = unbounded)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Per-read deadline in milliseconds (0 = none)
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// Per-write deadline in milliseconds (0 = none)
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            bind: self.bind.clone(),
            port: self.port,
            path: self.path.clone(),
            queue_capacity: self.queue_capacity,
            read_timeout_ms: self.read_timeout_ms,
            write_timeout_ms: self.write_timeout_ms,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Relay Hub v{}", env!("CARGO_PKG_VERSION"));

    let file_settings = match &args.config {
        Some(path) => {
            info!("Loading settings from {}", path.display());
            Settings::load(path)?
        }
        None => Settings::default(),
    };
    let settings = file_settings.merge(args.settings());
    let server_config = settings.server_config()?;
    let hub_config = settings.hub_config();

    match hub_config.queue_capacity {
        Some(capacity) => info!("Broadcast queue bounded at {} payloads", capacity),
        None => info!("Broadcast queue unbounded"),
    }

    let (hub, dispatcher) = Hub::new(&hub_config);
    tokio::spawn(dispatcher.run());

    let server = WebSocketServer::bind(server_config, Arc::new(hub)).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), exiting");
        }
    }

    Ok(())
}
