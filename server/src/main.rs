use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use shared::{ProtocolMode, DEFAULT_BROADCAST_PORT, DEFAULT_REQUEST_PORT};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to bind both channels on
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Request/response port
    #[arg(short, long, default_value_t = DEFAULT_REQUEST_PORT)]
    port: u16,

    /// Publish/subscribe port (broadcast mode)
    #[arg(short, long, default_value_t = DEFAULT_BROADCAST_PORT)]
    broadcast_port: u16,

    /// Protocol variant: polling or broadcast
    #[arg(short, long, default_value_t = ProtocolMode::Polling)]
    mode: ProtocolMode,

    /// Broadcast ticks per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Maximum simultaneous sessions
    #[arg(long, default_value = "32")]
    max_clients: usize,

    /// Seconds of silence before a session is evicted (0 disables eviction)
    #[arg(long, default_value = "10")]
    stale_timeout: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            request_addr: format!("{}:{}", self.host, self.port),
            broadcast_addr: format!("{}:{}", self.host, self.broadcast_port),
            mode: self.mode,
            tick_interval: Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1))),
            max_clients: self.max_clients,
            stale_timeout: (self.stale_timeout > 0).then(|| Duration::from_secs(self.stale_timeout)),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    info!("Starting server with {:?}", args);

    let mut server = Server::new(args.into_config());
    if let Err(e) = server.start() {
        error!("Failed to start server: {}", e);
        return Err(e.into());
    }

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    server.stop();

    Ok(())
}
