use clap::Parser;
use client::config::ClientConfig;
use client::game::GameWorld;
use client::input::BotInput;
use client::manager::NetworkManager;
use log::{debug, info};
use shared::{ProtocolMode, DEFAULT_BROADCAST_PORT, DEFAULT_REQUEST_PORT};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Server request/response port
    #[arg(short, long, default_value_t = DEFAULT_REQUEST_PORT)]
    port: u16,

    /// Server publish/subscribe port (broadcast mode)
    #[arg(short, long, default_value_t = DEFAULT_BROADCAST_PORT)]
    broadcast_port: u16,

    /// Protocol variant: polling or broadcast
    #[arg(short, long, default_value_t = ProtocolMode::Polling)]
    mode: ProtocolMode,

    /// Network and game ticks per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let tick = Duration::from_secs_f64(1.0 / f64::from(args.tick_rate.max(1)));

    info!("Starting headless client...");
    info!("Connecting to: {} ({} mode)", args.server, args.mode);

    let mut network = NetworkManager::new(ClientConfig {
        tick_interval: tick,
        ..ClientConfig::for_ports(args.mode, args.port, args.broadcast_port)
    });
    if !network.connect(&args.server) {
        return Err(format!("could not connect to {}", args.server).into());
    }

    let mut world = GameWorld::new();
    let (spawn_x, spawn_y) = network.client().spawn_position().unwrap_or((0.0, 0.0));
    let player = world.spawn_player(spawn_x, spawn_y);
    network.set_local_entity(player);

    let mut bot = BotInput::new();
    let mut frames = interval(tick);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received Ctrl+C, disconnecting...");
                break;
            }
            _ = frames.tick() => {
                let input = bot.poll(tick);
                world.apply_input(player, &input, tick.as_secs_f32());

                let report = network.sync(&mut world);
                if !report.is_empty() {
                    debug!(
                        "Peers created {:?}, moved {:?}, removed {:?}",
                        report.created, report.updated, report.removed
                    );
                }

                if !network.is_connected() {
                    info!("Connection closed");
                    break;
                }
            }
        }
    }

    network.disconnect(&mut world);
    Ok(())
}
