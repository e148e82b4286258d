//! Bilateral collision arbitration
//!
//! The arbiter is the only writer of pairing state. Each operation takes the
//! registry write lock once and performs its whole validate-then-commit
//! sequence under it, so no concurrent request can observe a half-written
//! pairing.

use crate::config::ServerConfig;
use crate::error::RegistryError;
use crate::registry::{PlayerRegistry, SharedRegistry};
use log::{debug, info};
use shared::{
    AckResponse, CollisionRequest, CollisionResponse, CombatState, MetricsResponse, PlayerId,
    RejectReason,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct CollisionArbiter {
    registry: SharedRegistry,
    collision_radius: f32,
    sync_tolerance: f32,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl CollisionArbiter {
    pub fn new(registry: SharedRegistry, config: &ServerConfig) -> Self {
        Self {
            registry,
            collision_radius: config.collision_radius,
            sync_tolerance: config.sync_tolerance,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Attempts to lock `initiator` and the request's target into combat
    ///
    /// Returns `Err` only when one of the ids is unknown. Every business
    /// rejection comes back as `Ok` with `success: false`, and leaves both
    /// records exactly as they were.
    pub async fn request_collision(
        &self,
        initiator: &PlayerId,
        request: &CollisionRequest,
    ) -> Result<CollisionResponse, RegistryError> {
        let now = Instant::now();
        let response = {
            let mut registry = self.registry.write().await;
            self.arbitrate(&mut registry, initiator, request, now)?
        };

        if response.success {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        Ok(response)
    }

    /// Decision core of [`Self::request_collision`] against a locked registry
    pub fn arbitrate(
        &self,
        registry: &mut PlayerRegistry,
        initiator: &PlayerId,
        request: &CollisionRequest,
        now: Instant,
    ) -> Result<CollisionResponse, RegistryError> {
        let target = &request.target_id;
        for id in [initiator, target] {
            if !registry.contains(id) {
                return Err(RegistryError::NotFound(id.clone()));
            }
        }

        if initiator == target {
            debug!("Rejected collision from {}: self target", initiator);
            return Ok(CollisionResponse::rejected(RejectReason::SelfTarget));
        }

        registry.reap_expired(initiator, now);
        registry.reap_expired(target, now);

        let (me, them) = match (registry.peek(initiator), registry.peek(target)) {
            (Some(me), Some(them)) => (me, them),
            (None, _) => return Err(RegistryError::NotFound(initiator.clone())),
            (_, None) => return Err(RegistryError::NotFound(target.clone())),
        };
        let reject = |reason: RejectReason| {
            debug!(
                "Rejected collision {} -> {}: {} ({} / {})",
                initiator, target, reason, me.combat_state, them.combat_state
            );
            CollisionResponse::rejected(reason).with_states(me.combat_state, them.combat_state)
        };

        if me.character.is_none() || them.character.is_none() {
            return Ok(reject(RejectReason::NoCharacter));
        }
        if !me.combat_state.is_free() || !them.combat_state.is_free() {
            return Ok(reject(RejectReason::Busy));
        }

        let (own_position, target_position) = match (me.position, them.position) {
            (Some(own), Some(other)) => (own, other),
            _ => return Ok(reject(RejectReason::NoPosition)),
        };

        // Client coordinates only feed the desync check; the decision uses ours.
        let distance = own_position.distance_to(&target_position);
        if distance > self.collision_radius {
            return Ok(reject(RejectReason::OutOfRange).with_distance(distance));
        }
        let claimed = request.claimed_distance();
        if !claimed.is_finite() || (distance - claimed).abs() > self.sync_tolerance {
            return Ok(reject(RejectReason::Desynced).with_distance(distance));
        }

        registry.transition_pair(initiator, target, CombatState::Free, CombatState::Locking, now)?;
        registry.touch(initiator, now)?;

        let me = registry.get(initiator, now)?.summary();
        let them = registry.get(target, now)?.summary();
        info!(
            "Locked {} and {} into combat at distance {:.1}",
            initiator, target, distance
        );
        Ok(CollisionResponse::accepted(me, them, distance))
    }

    /// Acknowledges that `id` entered its combat UI
    ///
    /// Moves only the caller from LOCKING to IN_COMBAT. A repeated confirm
    /// from a player already IN_COMBAT succeeds again; a FREE player (never
    /// locked, or expired) gets `success: false`.
    pub async fn confirm_combat(&self, id: &PlayerId) -> Result<AckResponse, RegistryError> {
        let now = Instant::now();
        let mut registry = self.registry.write().await;
        registry.touch(id, now)?;

        let state = registry.get(id, now)?.combat_state;
        match state {
            CombatState::Locking => {
                registry.transition(id, CombatState::Locking, CombatState::InCombat, now)?;
                info!("Player {} confirmed combat", id);
                Ok(AckResponse::ok())
            }
            CombatState::InCombat => Ok(AckResponse::ok()),
            CombatState::Free => {
                debug!("Confirm from {} ignored: not locked", id);
                Ok(AckResponse::failed())
            }
        }
    }

    /// Ends the combat of `id`, returning both sides to FREE
    ///
    /// Safe to call repeatedly and from both sides.
    pub async fn finalize_combat(&self, id: &PlayerId) -> Result<AckResponse, RegistryError> {
        let now = Instant::now();
        let mut registry = self.registry.write().await;
        if let Some(peer) = registry.release(id, now)? {
            info!("Finalized combat between {} and {}", id, peer);
        }
        Ok(AckResponse::ok())
    }

    /// Snapshot of per-state counts and time in state
    ///
    /// Lazy expiry runs over every player first, so an abandoned lock is
    /// never counted as live.
    pub async fn metrics(&self) -> MetricsResponse {
        let now = Instant::now();
        let mut registry = self.registry.write().await;
        registry.reap_all_expired(now);
        MetricsResponse {
            counts: registry.state_counts(),
            players: registry.time_in_state(now),
            collisions_accepted: self.accepted.load(Ordering::Relaxed),
            collisions_rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
