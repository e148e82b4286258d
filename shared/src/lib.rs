use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Maximum authoritative distance between two players for a lock to be granted.
pub const COLLISION_RADIUS: f32 = 90.0;
/// Largest allowed gap between the client-claimed and server-held distance.
pub const SYNC_TOLERANCE: f32 = 50.0;
pub const LOCK_TIMEOUT_MS: u64 = 3_000;
pub const COMBAT_TIMEOUT_MS: u64 = 120_000;
pub const IDLE_TIMEOUT_SECS: u64 = 30;
pub const REAP_INTERVAL_MS: u64 = 1_000;

/// Client-side detection radius; kept below `COLLISION_RADIUS` so that
/// candidates found locally survive the server's range check.
pub const DETECTION_RADIUS: f32 = 85.0;
pub const PLAYER_SIZE: f32 = 80.0;
pub const COLLISION_MARGIN: f32 = 10.0;
pub const MIN_OVERLAP_AREA: f32 = 400.0;
pub const DEBOUNCE_MS: u64 = 300;
pub const REQUEST_TIMEOUT_MS: u64 = 2_500;
pub const COOLDOWN_MS: u64 = 800;
pub const POSITION_INTERVAL_MS: u64 = 50;
pub const SCAN_INTERVAL_MS: u64 = 16;

pub const POWERS_PER_COMBAT: usize = 6;
pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;

/// Opaque per-session player token issued by the server on join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Generates a fresh random token.
    pub fn generate() -> Self {
        let token: u64 = rand::thread_rng().gen();
        Self(format!("{:016x}", token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PlayerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side combat state of a single player.
///
/// Transitions are closed: anything not listed in
/// [`CombatState::can_transition_to`] is rejected by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombatState {
    #[default]
    Free,
    Locking,
    InCombat,
}

impl CombatState {
    pub const ALL: [CombatState; 3] = [
        CombatState::Free,
        CombatState::Locking,
        CombatState::InCombat,
    ];

    pub fn can_transition_to(self, next: CombatState) -> bool {
        matches!(
            (self, next),
            (CombatState::Free, CombatState::Locking)
                | (CombatState::Locking, CombatState::InCombat)
                | (CombatState::Locking, CombatState::Free)
                | (CombatState::InCombat, CombatState::Free)
        )
    }

    pub fn is_free(self) -> bool {
        self == CombatState::Free
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CombatState::Free => "FREE",
            CombatState::Locking => "LOCKING",
            CombatState::InCombat => "IN_COMBAT",
        }
    }
}

impl fmt::Display for CombatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Centre of a player in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_squared_to(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        self.distance_squared_to(other).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub id: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSelection {
    pub character: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionReport {
    pub x: f32,
    pub y: f32,
}

/// A peer as seen in a position report response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub id: PlayerId,
    pub character: Option<String>,
    pub x: f32,
    pub y: f32,
    pub combat_state: CombatState,
    pub combat_peer: Option<PlayerId>,
}

impl PeerSnapshot {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    /// True when this peer is locked into combat with `id`.
    pub fn is_paired_with(&self, id: &PlayerId) -> bool {
        !self.combat_state.is_free() && self.combat_peer.as_ref() == Some(id)
    }
}

/// Reply to a position push. Doubles as the reconciliation channel: `own_state`
/// is the caller's authoritative combat state at the time of the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub peers: Vec<PeerSnapshot>,
    pub own_state: CombatState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub own_peer: Option<PlayerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollisionRequest {
    pub target_id: PlayerId,
    pub self_x: f32,
    pub self_y: f32,
    pub target_x: f32,
    pub target_y: f32,
}

impl CollisionRequest {
    pub fn new(target_id: PlayerId, own: Position, target: Position) -> Self {
        Self {
            target_id,
            self_x: own.x,
            self_y: own.y,
            target_x: target.x,
            target_y: target.y,
        }
    }

    /// Distance between the two positions as the requesting client saw them.
    pub fn claimed_distance(&self) -> f32 {
        let own = Position::new(self.self_x, self.self_y);
        own.distance_to(&Position::new(self.target_x, self.target_y))
    }
}

/// Why the arbiter refused a collision request. These are business outcomes
/// and travel in a successful response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    Busy,
    NoCharacter,
    NoPosition,
    OutOfRange,
    Desynced,
    SelfTarget,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::Busy => "Busy",
            RejectReason::NoCharacter => "NoCharacter",
            RejectReason::NoPosition => "NoPosition",
            RejectReason::OutOfRange => "OutOfRange",
            RejectReason::Desynced => "Desynced",
            RejectReason::SelfTarget => "SelfTarget",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySummary {
    pub id: PlayerId,
    pub character: Option<String>,
    pub combat_state: CombatState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollisionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_state: Option<CombatState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_state: Option<CombatState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_party: Option<PartySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PartySummary>,
}

impl CollisionResponse {
    pub fn accepted(self_party: PartySummary, peer: PartySummary, distance: f32) -> Self {
        Self {
            success: true,
            reason: None,
            self_state: Some(self_party.combat_state),
            peer_state: Some(peer.combat_state),
            distance: Some(distance),
            self_party: Some(self_party),
            peer: Some(peer),
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            self_state: None,
            peer_state: None,
            distance: None,
            self_party: None,
            peer: None,
        }
    }

    pub fn with_states(mut self, self_state: CombatState, peer_state: CombatState) -> Self {
        self.self_state = Some(self_state);
        self.peer_state = Some(peer_state);
        self
    }

    pub fn with_distance(mut self, distance: f32) -> Self {
        self.distance = Some(distance);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }

    pub fn failed() -> Self {
        Self { success: false }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowersSubmission {
    pub powers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowersResponse {
    pub powers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMetrics {
    pub id: PlayerId,
    pub combat_state: CombatState,
    pub time_in_state_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub counts: HashMap<CombatState, usize>,
    pub players: Vec<PlayerMetrics>,
    pub collisions_accepted: u64,
    pub collisions_rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_transition_table() {
        use CombatState::*;

        assert!(Free.can_transition_to(Locking));
        assert!(Locking.can_transition_to(InCombat));
        assert!(Locking.can_transition_to(Free));
        assert!(InCombat.can_transition_to(Free));

        assert!(!Free.can_transition_to(InCombat));
        assert!(!Free.can_transition_to(Free));
        assert!(!InCombat.can_transition_to(Locking));
        assert!(!Locking.can_transition_to(Locking));
    }

    #[test]
    fn test_combat_state_wire_names() {
        for state in CombatState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = PlayerId::generate();
        let b = PlayerId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn test_position_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(10.0, 10.0);
        assert_approx_eq!(a.distance_squared_to(&b), 200.0, 0.001);
        assert_approx_eq!(a.distance_to(&b), 14.142, 0.001);
        assert!(!Position::new(f32::NAN, 0.0).is_finite());
    }

    #[test]
    fn test_collision_request_field_names() {
        let request = CollisionRequest::new(
            PlayerId::from("p2"),
            Position::new(0.0, 0.0),
            Position::new(30.0, 40.0),
        );
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["targetId"], "p2");
        assert_eq!(value["selfX"], 0.0);
        assert_eq!(value["targetY"], 40.0);
        assert_approx_eq!(request.claimed_distance(), 50.0, 0.001);
    }

    #[test]
    fn test_rejected_response_shape() {
        let response = CollisionResponse::rejected(RejectReason::Busy)
            .with_states(CombatState::Free, CombatState::Locking);
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["reason"], "Busy");
        assert_eq!(value["peerState"], "LOCKING");
        assert!(value.get("self").is_none());
    }

    #[test]
    fn test_accepted_response_uses_self_key() {
        let me = PartySummary {
            id: PlayerId::from("a"),
            character: Some("kiira".to_string()),
            combat_state: CombatState::Locking,
        };
        let them = PartySummary {
            id: PlayerId::from("b"),
            character: Some("kimo".to_string()),
            combat_state: CombatState::Locking,
        };
        let value = serde_json::to_value(CollisionResponse::accepted(me, them, 12.0)).unwrap();

        assert_eq!(value["success"], true);
        assert_eq!(value["self"]["id"], "a");
        assert_eq!(value["peer"]["character"], "kimo");
        assert!(value.get("reason").is_none());
    }

    #[test]
    fn test_position_response_parses_without_own_peer() {
        let json = r#"{
            "peers": [{"id": "x", "character": "vera", "x": 1.0, "y": 2.0,
                       "combatState": "LOCKING", "combatPeer": "me"}],
            "ownState": "LOCKING"
        }"#;
        let response: PositionResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.own_state, CombatState::Locking);
        assert!(response.own_peer.is_none());
        assert!(response.peers[0].is_paired_with(&PlayerId::from("me")));
        assert!(!response.peers[0].is_paired_with(&PlayerId::from("other")));
    }

    #[test]
    fn test_metrics_counts_keyed_by_state_name() {
        let mut metrics = MetricsResponse::default();
        metrics.counts.insert(CombatState::InCombat, 2);
        let value = serde_json::to_value(&metrics).unwrap();
        assert_eq!(value["counts"]["IN_COMBAT"], 2);
    }
}
