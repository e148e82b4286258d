use shared::{
    COLLISION_RADIUS, COMBAT_TIMEOUT_MS, IDLE_TIMEOUT_SECS, LOCK_TIMEOUT_MS, REAP_INTERVAL_MS,
    SYNC_TOLERANCE,
};
use std::time::Duration;

/// How long a non-FREE record may sit in its state before lazy expiry
/// unwinds it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpiryPolicy {
    pub lock_timeout: Duration,
    pub combat_timeout: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(LOCK_TIMEOUT_MS),
            combat_timeout: Duration::from_millis(COMBAT_TIMEOUT_MS),
        }
    }
}

/// Tunables for the arbitration server, filled from command line flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerConfig {
    pub collision_radius: f32,
    pub sync_tolerance: f32,
    pub expiry: ExpiryPolicy,
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            collision_radius: COLLISION_RADIUS,
            sync_tolerance: SYNC_TOLERANCE,
            expiry: ExpiryPolicy::default(),
            idle_timeout: Duration::from_secs(IDLE_TIMEOUT_SECS),
            reap_interval: Duration::from_millis(REAP_INTERVAL_MS),
        }
    }
}
