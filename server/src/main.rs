use clap::Parser;
use log::info;
use server::config::{ExpiryPolicy, ServerConfig};
use server::http::Server;
use shared::{
    COLLISION_RADIUS, COMBAT_TIMEOUT_MS, IDLE_TIMEOUT_SECS, LOCK_TIMEOUT_MS, REAP_INTERVAL_MS,
    SYNC_TOLERANCE,
};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum server-side distance between two players for a lock
    #[arg(long, default_value_t = COLLISION_RADIUS)]
    collision_radius: f32,

    /// Maximum gap between client-claimed and server-held distance
    #[arg(long, default_value_t = SYNC_TOLERANCE)]
    sync_tolerance: f32,

    /// How long a lock may wait for confirmation before it expires
    #[arg(
        long,
        default_value_t = LOCK_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    lock_timeout_ms: u64,

    /// How long a confirmed combat may last without being finalized
    #[arg(
        long,
        default_value_t = COMBAT_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    combat_timeout_ms: u64,

    /// Remove players that have not called for this long
    #[arg(
        long,
        default_value_t = IDLE_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    idle_timeout_secs: u64,

    /// Period of the idle player sweep
    #[arg(
        long,
        default_value_t = REAP_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    reap_interval_ms: u64,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            collision_radius: self.collision_radius,
            sync_tolerance: self.sync_tolerance,
            expiry: ExpiryPolicy {
                lock_timeout: Duration::from_millis(self.lock_timeout_ms),
                combat_timeout: Duration::from_millis(self.combat_timeout_ms),
            },
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            reap_interval: Duration::from_millis(self.reap_interval_ms),
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
    let config = args.config();
    info!(
        "Collision radius {:.0}, sync tolerance {:.0}, lock timeout {:?}",
        config.collision_radius, config.sync_tolerance, config.expiry.lock_timeout
    );

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::new(&address, config).await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
