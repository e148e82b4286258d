use clap::Parser;
use client::collision::{CombatEvent, EndReason};
use client::session::{Session, SessionConfig};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{PlayerId, Position, POWERS_PER_COMBAT, WORLD_HEIGHT, WORLD_WIDTH};
use std::time::Duration;
use tokio::time::{interval, sleep};

const CHARACTERS: [&str; 8] = [
    "sinji", "kiira", "kimo", "vera", "narobi", "nutso", "limbre", "iroki",
];
const POWERS: [&str; 4] = ["FUEGO", "AGUA", "TIERRA", "AIRE"];
const MOVE_TICK: Duration = Duration::from_millis(16);
const POWERS_POLL_ATTEMPTS: u32 = 40;
const POWERS_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Character to play; picked at random when omitted
    #[arg(short = 'c', long)]
    character: Option<String>,

    /// Wander speed in pixels per second
    #[arg(long, default_value = "120")]
    speed: f32,

    /// Position report period in milliseconds
    #[arg(
        long,
        default_value_t = shared::POSITION_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    position_interval_ms: u64,

    /// Proximity scan period in milliseconds
    #[arg(
        long,
        default_value_t = shared::SCAN_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    scan_interval_ms: u64,

    /// Per-request timeout in milliseconds
    #[arg(
        long,
        default_value_t = shared::REQUEST_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    request_timeout_ms: u64,
}

/// Random walk that bounces off the world edges
struct Wanderer {
    position: Position,
    heading: f32,
    speed: f32,
}

impl Wanderer {
    fn new(speed: f32) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            position: Position::new(
                rng.gen_range(0.0..WORLD_WIDTH),
                rng.gen_range(0.0..WORLD_HEIGHT),
            ),
            heading: rng.gen_range(0.0..std::f32::consts::TAU),
            speed,
        }
    }

    fn step(&mut self, dt: f32) -> Position {
        let mut rng = rand::thread_rng();
        self.heading += rng.gen_range(-0.3..0.3);

        let mut x = self.position.x + self.heading.cos() * self.speed * dt;
        let mut y = self.position.y + self.heading.sin() * self.speed * dt;
        if !(0.0..=WORLD_WIDTH).contains(&x) {
            self.heading = std::f32::consts::PI - self.heading;
            x = x.clamp(0.0, WORLD_WIDTH);
        }
        if !(0.0..=WORLD_HEIGHT).contains(&y) {
            self.heading = -self.heading;
            y = y.clamp(0.0, WORLD_HEIGHT);
        }

        self.position = Position::new(x, y);
        self.position
    }

    fn turn_around(&mut self) {
        self.heading += std::f32::consts::PI;
    }
}

fn random_powers() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..POWERS_PER_COMBAT)
        .filter_map(|_| POWERS.choose(&mut rng).map(|power| power.to_string()))
        .collect()
}

/// Exchanges power sequences with the opponent, then finalizes
async fn fight(session: &Session, peer: &PlayerId) {
    let powers = random_powers();
    if let Err(e) = session.api().submit_powers(session.id(), powers.clone()).await {
        warn!("Could not submit powers: {}", e);
    }

    let mut enemy = Vec::new();
    for _ in 0..POWERS_POLL_ATTEMPTS {
        match session.api().fetch_powers(peer).await {
            Ok(found) if found.len() == POWERS_PER_COMBAT => {
                enemy = found;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Could not fetch powers of {}: {}", peer, e);
                break;
            }
        }
        sleep(POWERS_POLL_INTERVAL).await;
    }

    info!("Own powers:   {}", powers.join(" "));
    if enemy.is_empty() {
        info!("Enemy {} never submitted powers", peer);
    } else {
        info!("Enemy powers: {}", enemy.join(" "));
    }

    if let Err(e) = session.finalize().await {
        warn!("Finalize failed, will retry on next report: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let character = match args.character {
        Some(character) => character,
        None => CHARACTERS
            .choose(&mut rand::thread_rng())
            .map(|name| name.to_string())
            .unwrap_or_else(|| CHARACTERS[0].to_string()),
    };

    let config = SessionConfig {
        server: args.server.clone(),
        position_interval: Duration::from_millis(args.position_interval_ms),
        scan_interval: Duration::from_millis(args.scan_interval_ms),
        request_timeout: Duration::from_millis(args.request_timeout_ms),
        ..SessionConfig::default()
    };

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let mut wanderer = Wanderer::new(args.speed);
    let (mut session, mut events) = Session::join(config, &character, wanderer.position).await?;
    session.start();

    let mut move_interval = interval(MOVE_TICK);
    let dt = MOVE_TICK.as_secs_f32();
    let mut fighting = false;

    loop {
        tokio::select! {
            _ = move_interval.tick() => {
                if !fighting {
                    session.set_position(wanderer.step(dt));
                }
            }

            event = events.recv() => {
                match event {
                    Some(CombatEvent::Started { peer, character, initiated_locally }) => {
                        info!(
                            "Combat started with {} ({}), {}",
                            peer,
                            character.as_deref().unwrap_or("unknown"),
                            if initiated_locally { "we collided" } else { "they collided" }
                        );
                        fighting = true;
                        fight(&session, &peer).await;
                    }
                    Some(CombatEvent::Ended { peer, reason }) => {
                        match reason {
                            EndReason::Finalized => info!("Combat with {} finished", peer),
                            EndReason::ServerReleased => info!("Server ended combat with {}", peer),
                        }
                        fighting = false;
                        wanderer.turn_around();
                    }
                    None => break,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    session.leave().await?;
    Ok(())
}
