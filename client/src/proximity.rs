//! Per-frame search for a collision candidate among the cached peers.
//!
//! Filters run cheapest first: state, debounce, squared distance, exact
//! distance, then a bounding-box overlap with inward margins and a minimum
//! overlap area so that two players grazing corners never trigger a request.

use shared::{
    PeerSnapshot, PlayerId, Position, COLLISION_MARGIN, DEBOUNCE_MS, DETECTION_RADIUS,
    MIN_OVERLAP_AREA, PLAYER_SIZE,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub detection_radius: f32,
    pub player_size: f32,
    pub margin: f32,
    pub min_overlap_area: f32,
    pub debounce: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detection_radius: DETECTION_RADIUS,
            player_size: PLAYER_SIZE,
            margin: COLLISION_MARGIN,
            min_overlap_area: MIN_OVERLAP_AREA,
            debounce: Duration::from_millis(DEBOUNCE_MS),
        }
    }
}

/// Axis-aligned box around a player, shrunk by the margin on every side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Bounds {
    pub fn around(center: Position, size: f32, margin: f32) -> Self {
        let half = size / 2.0;
        Self {
            left: center.x - half + margin,
            top: center.y - half + margin,
            right: center.x + half - margin,
            bottom: center.y + half - margin,
        }
    }

    pub fn overlaps(&self, other: &Bounds) -> bool {
        self.left < other.right
            && self.right > other.left
            && self.top < other.bottom
            && self.bottom > other.top
    }

    pub fn overlap_area(&self, other: &Bounds) -> f32 {
        if !self.overlaps(other) {
            return 0.0;
        }
        let width = self.right.min(other.right) - self.left.max(other.left);
        let height = self.bottom.min(other.bottom) - self.top.max(other.top);
        width * height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub peer: PeerSnapshot,
    pub distance: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub ticks: u64,
    pub peers_scanned: u64,
    pub candidates: u64,
}

pub struct ProximityDetector {
    config: DetectorConfig,
    last_checked: HashMap<PlayerId, Instant>,
    stats: ScanStats,
}

impl ProximityDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            last_checked: HashMap::new(),
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Returns the nearest peer passing every filter, if any
    ///
    /// Every peer that reaches the geometric checks is stamped, whatever the
    /// outcome, and is skipped until the debounce window has passed.
    pub fn scan(
        &mut self,
        own_id: &PlayerId,
        own: Position,
        peers: &[PeerSnapshot],
        now: Instant,
    ) -> Option<Candidate> {
        let debounce = self.config.debounce;
        self.last_checked
            .retain(|_, checked_at| now.duration_since(*checked_at) < debounce);
        self.stats.ticks += 1;

        let radius_squared = self.config.detection_radius * self.config.detection_radius;
        let own_bounds = Bounds::around(own, self.config.player_size, self.config.margin);
        let mut best: Option<Candidate> = None;

        for peer in peers {
            if &peer.id == own_id || !peer.combat_state.is_free() {
                continue;
            }
            if self.last_checked.contains_key(&peer.id) {
                continue;
            }
            self.last_checked.insert(peer.id.clone(), now);
            self.stats.peers_scanned += 1;

            let target = peer.position();
            if !target.is_finite() || own.distance_squared_to(&target) > radius_squared {
                continue;
            }
            let distance = own.distance_to(&target);

            let peer_bounds = Bounds::around(target, self.config.player_size, self.config.margin);
            if own_bounds.overlap_area(&peer_bounds) < self.config.min_overlap_area {
                continue;
            }

            if best.as_ref().map_or(true, |current| distance < current.distance) {
                best = Some(Candidate {
                    peer: peer.clone(),
                    distance,
                });
            }
        }

        if best.is_some() {
            self.stats.candidates += 1;
        }
        best
    }

    /// Clears debounce stamps so the next scan considers every peer again
    pub fn reset(&mut self) {
        self.last_checked.clear();
    }
}
