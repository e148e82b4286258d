//! Authoritative in-memory store of connected players and their combat state
//!
//! This module owns every `PlayerRecord` on the server and is the only place
//! where combat state is written. It provides:
//! - Player lifecycle (join, leave, idle reaping)
//! - Position and character bookkeeping for peer snapshots
//! - Single-sided and paired state transitions checked against the
//!   `CombatState` transition table
//! - Lazy expiry of abandoned locks and stale combats
//!
//! The registry itself is a plain data structure. Callers share it as
//! [`SharedRegistry`] and hold the write lock for the whole of any
//! check-and-commit sequence, which keeps the pairing symmetric for every
//! later reader.

use crate::config::ExpiryPolicy;
use crate::error::RegistryError;
use log::info;
use shared::{CombatState, PartySummary, PeerSnapshot, PlayerId, PlayerMetrics, Position};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub type SharedRegistry = Arc<RwLock<PlayerRegistry>>;

/// Server-side state of one connected client
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub id: PlayerId,
    /// Absent until character selection; untargetable while absent
    pub character: Option<String>,
    /// Absent until the first position report
    pub position: Option<Position>,
    pub combat_state: CombatState,
    /// Set exactly when `combat_state` is not FREE
    pub combat_peer: Option<PlayerId>,
    /// Stamped on entering LOCKING and again on entering IN_COMBAT
    pub lock_timestamp: Option<Instant>,
    /// When the current `combat_state` was entered, for metrics
    pub state_entered: Instant,
    /// Last call made by this player; drives idle reaping
    pub last_activity: Instant,
    /// Power sequence submitted for the current combat
    pub powers: Vec<String>,
}

impl PlayerRecord {
    pub fn new(id: PlayerId, now: Instant) -> Self {
        Self {
            id,
            character: None,
            position: None,
            combat_state: CombatState::Free,
            combat_peer: None,
            lock_timestamp: None,
            state_entered: now,
            last_activity: now,
            powers: Vec::new(),
        }
    }

    /// A player can show up in peer lists once it has both a character and a position.
    pub fn is_eligible(&self) -> bool {
        self.character.is_some() && self.position.is_some()
    }

    pub fn summary(&self) -> PartySummary {
        PartySummary {
            id: self.id.clone(),
            character: self.character.clone(),
            combat_state: self.combat_state,
        }
    }

    pub fn snapshot(&self) -> Option<PeerSnapshot> {
        let position = self.position?;
        Some(PeerSnapshot {
            id: self.id.clone(),
            character: self.character.clone(),
            x: position.x,
            y: position.y,
            combat_state: self.combat_state,
            combat_peer: self.combat_peer.clone(),
        })
    }

    fn is_expired(&self, policy: &ExpiryPolicy, now: Instant) -> bool {
        let limit = match self.combat_state {
            CombatState::Free => return false,
            CombatState::Locking => policy.lock_timeout,
            CombatState::InCombat => policy.combat_timeout,
        };
        match self.lock_timestamp {
            Some(stamp) => now.saturating_duration_since(stamp) > limit,
            None => true,
        }
    }

    fn enter(&mut self, state: CombatState, peer: Option<PlayerId>, now: Instant) {
        self.combat_state = state;
        self.state_entered = now;
        if state.is_free() {
            self.combat_peer = None;
            self.lock_timestamp = None;
        } else {
            self.combat_peer = peer;
            self.lock_timestamp = Some(now);
        }
    }
}

/// Owns all player records and enforces the pairing invariants
pub struct PlayerRegistry {
    players: HashMap<PlayerId, PlayerRecord>,
    policy: ExpiryPolicy,
}

impl PlayerRegistry {
    pub fn new(policy: ExpiryPolicy) -> Self {
        Self {
            players: HashMap::new(),
            policy,
        }
    }

    /// Wraps the registry for sharing between request handlers
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Creates a FREE record under a fresh random token and returns the token
    pub fn join(&mut self, now: Instant) -> PlayerId {
        let mut id = PlayerId::generate();
        while self.players.contains_key(&id) {
            id = PlayerId::generate();
        }
        self.players.insert(id.clone(), PlayerRecord::new(id.clone(), now));
        info!("Player {} joined ({} connected)", id, self.players.len());
        id
    }

    /// Removes a player, unwinding its peer in the same step
    pub fn remove(&mut self, id: &PlayerId, now: Instant) -> Result<PlayerRecord, RegistryError> {
        if !self.players.contains_key(id) {
            return Err(RegistryError::NotFound(id.clone()));
        }
        self.unwind_pair(id, now);
        let record = self
            .players
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        info!("Player {} left ({} connected)", id, self.players.len());
        Ok(record)
    }

    /// Looks up a record after applying lazy expiry to it
    ///
    /// Any decision about a player must go through this accessor so that an
    /// abandoned lock is never mistaken for a live one.
    pub fn get(&mut self, id: &PlayerId, now: Instant) -> Result<&PlayerRecord, RegistryError> {
        self.reap_expired(id, now);
        self.players
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Reads a record as stored, without expiry
    pub fn peek(&self, id: &PlayerId) -> Option<&PlayerRecord> {
        self.players.get(id)
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.players.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Records activity for `id` without changing anything else
    pub fn touch(&mut self, id: &PlayerId, now: Instant) -> Result<(), RegistryError> {
        let record = self.record_mut(id)?;
        record.last_activity = now;
        Ok(())
    }

    pub fn set_character(
        &mut self,
        id: &PlayerId,
        character: String,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let record = self.record_mut(id)?;
        info!("Player {} selected character {}", id, character);
        record.character = Some(character);
        record.last_activity = now;
        Ok(())
    }

    pub fn set_powers(
        &mut self,
        id: &PlayerId,
        powers: Vec<String>,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let record = self.record_mut(id)?;
        record.powers = powers;
        record.last_activity = now;
        Ok(())
    }

    pub fn powers(&self, id: &PlayerId) -> Result<Vec<String>, RegistryError> {
        self.players
            .get(id)
            .map(|record| record.powers.clone())
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    pub fn upsert_position(
        &mut self,
        id: &PlayerId,
        x: f32,
        y: f32,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let record = self.record_mut(id)?;
        record.position = Some(Position::new(x, y));
        record.last_activity = now;
        Ok(())
    }

    /// Players with a character and a position, excluding `excluding`
    pub fn list_eligible(&self, excluding: &PlayerId) -> Vec<&PlayerRecord> {
        let mut eligible: Vec<&PlayerRecord> = self
            .players
            .values()
            .filter(|record| &record.id != excluding && record.is_eligible())
            .collect();
        eligible.sort_by(|a, b| a.id.cmp(&b.id));
        eligible
    }

    /// Applies a single-sided transition that keeps the current pairing
    ///
    /// Only moves between two non-FREE states are accepted here (LOCKING to
    /// IN_COMBAT). Anything that creates or dissolves a pairing touches two
    /// records and must go through [`Self::transition_pair`] or
    /// [`Self::release`].
    pub fn transition(
        &mut self,
        id: &PlayerId,
        from: CombatState,
        to: CombatState,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let record = self.record_mut(id)?;
        let invalid = RegistryError::InvalidTransition {
            id: id.clone(),
            from: record.combat_state,
            to,
        };

        if record.combat_state != from
            || !from.can_transition_to(to)
            || from.is_free()
            || to.is_free()
        {
            return Err(invalid);
        }

        let peer = record.combat_peer.clone();
        record.enter(to, peer, now);
        Ok(())
    }

    /// Moves two players through the same transition as one step
    ///
    /// Both records are validated before either is written, so a failure
    /// leaves the registry untouched. Entering a non-FREE state pairs the two
    /// players with each other; leaving a pairing requires that they are
    /// currently paired with each other.
    pub fn transition_pair(
        &mut self,
        a: &PlayerId,
        b: &PlayerId,
        from: CombatState,
        to: CombatState,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let (first, second) = match (self.players.get(a), self.players.get(b)) {
            (Some(first), Some(second)) => (first, second),
            (None, _) => return Err(RegistryError::NotFound(a.clone())),
            (_, None) => return Err(RegistryError::NotFound(b.clone())),
        };

        for record in [first, second] {
            if a == b || record.combat_state != from || !from.can_transition_to(to) {
                return Err(RegistryError::InvalidTransition {
                    id: record.id.clone(),
                    from: record.combat_state,
                    to,
                });
            }
        }

        if !from.is_free()
            && (first.combat_peer.as_ref() != Some(b) || second.combat_peer.as_ref() != Some(a))
        {
            return Err(RegistryError::NoPeer(a.clone()));
        }

        if let Some(record) = self.players.get_mut(a) {
            record.enter(to, Some(b.clone()), now);
            if from.is_free() {
                record.powers.clear();
            }
        }
        if let Some(record) = self.players.get_mut(b) {
            record.enter(to, Some(a.clone()), now);
            if from.is_free() {
                record.powers.clear();
            }
        }
        Ok(())
    }

    /// Returns `id` and its peer to FREE regardless of their sub-state
    ///
    /// Idempotent: releasing a FREE player, or one whose peer already
    /// released or expired, succeeds and changes nothing further. Returns the
    /// peer that was unwound, if any.
    pub fn release(
        &mut self,
        id: &PlayerId,
        now: Instant,
    ) -> Result<Option<PlayerId>, RegistryError> {
        let record = self.record_mut(id)?;
        record.last_activity = now;
        if record.combat_state.is_free() {
            return Ok(None);
        }
        Ok(self.unwind_pair(id, now))
    }

    /// Lazily unwinds `id` and its peer if their pairing has gone stale
    ///
    /// A pairing is stale when either side has outlived the timeout for its
    /// state, or when the peer no longer points back at `id` (or is gone).
    /// Returns true if anything was unwound.
    pub fn reap_expired(&mut self, id: &PlayerId, now: Instant) -> bool {
        let Some(record) = self.players.get(id) else {
            return false;
        };
        if record.combat_state.is_free() {
            return false;
        }

        let self_expired = record.is_expired(&self.policy, now);
        let peer_stale = match record
            .combat_peer
            .as_ref()
            .and_then(|peer_id| self.players.get(peer_id))
        {
            Some(peer) => {
                peer.combat_peer.as_ref() != Some(id) || peer.is_expired(&self.policy, now)
            }
            None => true,
        };

        if !self_expired && !peer_stale {
            return false;
        }

        let state = record.combat_state;
        let peer = self.unwind_pair(id, now);
        info!(
            "Expired {} pairing of {} (peer {:?}), both returned to FREE",
            state, id, peer
        );
        true
    }

    /// Runs lazy expiry over every player, returning how many pairings were unwound
    pub fn reap_all_expired(&mut self, now: Instant) -> usize {
        let ids: Vec<PlayerId> = self
            .players
            .values()
            .filter(|record| !record.combat_state.is_free())
            .map(|record| record.id.clone())
            .collect();

        ids.iter().filter(|id| self.reap_expired(id, now)).count()
    }

    /// Removes players idle for longer than `idle_timeout`
    ///
    /// Returns the removed ids. Peers of removed players are unwound to FREE.
    pub fn reap_idle(&mut self, idle_timeout: Duration, now: Instant) -> Vec<PlayerId> {
        let idle: Vec<PlayerId> = self
            .players
            .values()
            .filter(|record| now.saturating_duration_since(record.last_activity) > idle_timeout)
            .map(|record| record.id.clone())
            .collect();

        for id in &idle {
            self.unwind_pair(id, now);
            self.players.remove(id);
            info!("Reaped idle player {}", id);
        }

        idle
    }

    /// Number of players in each combat state
    pub fn state_counts(&self) -> HashMap<CombatState, usize> {
        let mut counts: HashMap<CombatState, usize> =
            CombatState::ALL.iter().map(|state| (*state, 0)).collect();
        for record in self.players.values() {
            *counts.entry(record.combat_state).or_insert(0) += 1;
        }
        counts
    }

    /// Per-player time spent in the current state
    pub fn time_in_state(&self, now: Instant) -> Vec<PlayerMetrics> {
        let mut metrics: Vec<PlayerMetrics> = self
            .players
            .values()
            .map(|record| PlayerMetrics {
                id: record.id.clone(),
                combat_state: record.combat_state,
                time_in_state_ms: now
                    .saturating_duration_since(record.state_entered)
                    .as_millis() as u64,
            })
            .collect();
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        metrics
    }

    fn record_mut(&mut self, id: &PlayerId) -> Result<&mut PlayerRecord, RegistryError> {
        self.players
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Sets `id` FREE, and its peer too if the peer still points back at it
    fn unwind_pair(&mut self, id: &PlayerId, now: Instant) -> Option<PlayerId> {
        let peer_id = self.players.get_mut(id).and_then(|record| {
            let peer = record.combat_peer.take();
            record.enter(CombatState::Free, None, now);
            peer
        })?;

        if let Some(peer) = self.players.get_mut(&peer_id) {
            if peer.combat_peer.as_ref() == Some(id) {
                peer.enter(CombatState::Free, None, now);
            }
        }
        Some(peer_id)
    }
}
