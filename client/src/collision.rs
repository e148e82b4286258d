//! Client side of the combat handshake.
//!
//! The local state machine runs `Idle -> Requesting -> InCombat -> Idle`, with
//! a `Cooldown` after any failed attempt. The server's view of this player,
//! delivered in every position report, always wins: a lock taken by a peer's
//! request is adopted straight into combat, and a release observed on the
//! server ends the local combat.

use crate::error::ClientError;
use crate::network::ApiClient;
use crate::proximity::{ProximityDetector, ScanStats};
use log::{debug, info, warn};
use shared::{CollisionRequest, CombatState, PeerSnapshot, PlayerId, Position, PositionResponse};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, PartialEq)]
pub enum LocalState {
    Idle,
    Requesting { target: PlayerId },
    InCombat { peer: PlayerId },
    Cooldown { until: Instant },
}

impl LocalState {
    pub fn combat_peer(&self) -> Option<&PlayerId> {
        match self {
            LocalState::InCombat { peer } => Some(peer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// This client called finalize
    Finalized,
    /// The server reported this player FREE while the client was in combat
    ServerReleased,
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum CombatEvent {
    Started {
        peer: PlayerId,
        character: Option<String>,
        initiated_locally: bool,
    },
    Ended {
        peer: PlayerId,
        reason: EndReason,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeStats {
    pub requests: u64,
    pub rejections: u64,
    pub confirmed: u64,
    pub remote_adoptions: u64,
    pub server_releases: u64,
}

/// What a position report asks the local state machine to do
#[derive(Debug, Clone, PartialEq)]
pub enum Reconcile {
    Keep,
    Adopt { peer: PlayerId, confirm: bool },
    Release,
    RetryFinalize,
}

/// Decides how the server-reported state of `own_id` applies locally
///
/// `pending_finalize` names a peer whose finalize call failed; while the
/// server still pairs us with that peer, the finalize is retried instead of
/// re-entering a combat the player already finished.
pub fn reconcile(
    local: &LocalState,
    pending_finalize: Option<&PlayerId>,
    own_id: &PlayerId,
    response: &PositionResponse,
) -> Reconcile {
    if response.own_state.is_free() {
        return match local {
            LocalState::InCombat { .. } => Reconcile::Release,
            _ => Reconcile::Keep,
        };
    }

    let server_peer = response
        .peers
        .iter()
        .find(|peer| peer.is_paired_with(own_id))
        .map(|peer| peer.id.clone())
        .or_else(|| response.own_peer.clone());
    let Some(peer) = server_peer else {
        return Reconcile::Keep;
    };

    if pending_finalize == Some(&peer) {
        return Reconcile::RetryFinalize;
    }

    let confirm = response.own_state == CombatState::Locking;
    match local {
        LocalState::Requesting { .. } => Reconcile::Keep,
        LocalState::InCombat { peer: current } if *current == peer => {
            if confirm {
                Reconcile::Adopt { peer, confirm }
            } else {
                Reconcile::Keep
            }
        }
        LocalState::InCombat { .. } => Reconcile::Release,
        LocalState::Idle | LocalState::Cooldown { .. } => Reconcile::Adopt { peer, confirm },
    }
}

pub struct CollisionClient {
    id: PlayerId,
    api: ApiClient,
    detector: ProximityDetector,
    state: LocalState,
    cooldown: Duration,
    peers: Vec<PeerSnapshot>,
    server_state: CombatState,
    generation: u64,
    pending_finalize: Option<PlayerId>,
    events: UnboundedSender<CombatEvent>,
    stats: HandshakeStats,
}

impl CollisionClient {
    pub fn new(
        id: PlayerId,
        api: ApiClient,
        detector: ProximityDetector,
        cooldown: Duration,
        events: UnboundedSender<CombatEvent>,
    ) -> Self {
        Self {
            id,
            api,
            detector,
            state: LocalState::Idle,
            cooldown,
            peers: Vec::new(),
            server_state: CombatState::Free,
            generation: 0,
            pending_finalize: None,
            events,
            stats: HandshakeStats::default(),
        }
    }

    pub fn id(&self) -> &PlayerId {
        &self.id
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    pub fn peers(&self) -> &[PeerSnapshot] {
        &self.peers
    }

    /// Own combat state as last reported by the server
    pub fn server_state(&self) -> CombatState {
        self.server_state
    }

    /// Bumped on every local state change
    ///
    /// A position report carries the generation it was sent under; if the
    /// state changed while it was in flight its own-state is stale and only
    /// its peer list is used.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> HandshakeStats {
        self.stats
    }

    pub fn scan_stats(&self) -> ScanStats {
        self.detector.stats()
    }

    fn set_state(&mut self, state: LocalState) {
        self.state = state;
        self.generation += 1;
    }

    fn emit(&self, event: CombatEvent) {
        if self.events.send(event).is_err() {
            debug!("Combat event dropped, no listener");
        }
    }

    fn enter_cooldown(&mut self, now: Instant) {
        self.set_state(LocalState::Cooldown {
            until: now + self.cooldown,
        });
    }

    fn enter_combat(&mut self, peer: PlayerId, initiated_locally: bool) {
        let character = self
            .peers
            .iter()
            .find(|snapshot| snapshot.id == peer)
            .and_then(|snapshot| snapshot.character.clone());

        info!("{} entered combat with {}", self.id, peer);
        self.stats.confirmed += 1;
        self.server_state = CombatState::InCombat;
        self.set_state(LocalState::InCombat { peer: peer.clone() });
        self.emit(CombatEvent::Started {
            peer,
            character,
            initiated_locally,
        });
    }

    /// One scan tick: looks for a candidate and, if found, runs the handshake
    ///
    /// Scans only while idle locally and FREE on the server; a lock the server
    /// reported but this client could not confirm yet is left to the next
    /// position report.
    pub async fn tick(&mut self, own: Position, now: Instant) {
        if let LocalState::Cooldown { until } = self.state {
            if now < until {
                return;
            }
            self.set_state(LocalState::Idle);
        }
        if self.state != LocalState::Idle || !self.server_state.is_free() {
            return;
        }

        let Some(candidate) = self.detector.scan(&self.id, own, &self.peers, now) else {
            return;
        };
        let target = candidate.peer.id.clone();
        debug!(
            "{} found candidate {} at {:.1}",
            self.id, target, candidate.distance
        );

        self.set_state(LocalState::Requesting {
            target: target.clone(),
        });
        self.stats.requests += 1;

        let request = CollisionRequest::new(target.clone(), own, candidate.peer.position());
        match self.api.request_collision(&self.id, &request).await {
            Ok(response) if response.success => match self.api.confirm_combat(&self.id).await {
                Ok(true) => self.enter_combat(target, true),
                Ok(false) => {
                    warn!("{} lock with {} expired before confirm", self.id, target);
                    self.enter_cooldown(Instant::now());
                }
                Err(e) => {
                    warn!("{} failed to confirm combat: {}", self.id, e);
                    self.enter_cooldown(Instant::now());
                }
            },
            Ok(response) => {
                self.stats.rejections += 1;
                if let Some(state) = response.self_state {
                    self.server_state = state;
                }
                debug!(
                    "{} collision with {} rejected: {:?}",
                    self.id, target, response.reason
                );
                self.enter_cooldown(Instant::now());
            }
            Err(e) => {
                self.stats.rejections += 1;
                warn!("{} collision request failed: {}", self.id, e);
                self.enter_cooldown(Instant::now());
            }
        }
    }

    /// Applies a position report sent while the generation was `sent_generation`
    pub async fn apply_server_state(&mut self, response: PositionResponse, sent_generation: u64) {
        if response.own_state.is_free() {
            self.pending_finalize = None;
        }

        let decision = reconcile(
            &self.state,
            self.pending_finalize.as_ref(),
            &self.id,
            &response,
        );
        self.server_state = response.own_state;
        self.peers = response.peers;

        if sent_generation != self.generation {
            debug!("{} ignoring stale own state", self.id);
            return;
        }

        match decision {
            Reconcile::Keep => {}
            Reconcile::Release => {
                if let LocalState::InCombat { peer } = self.state.clone() {
                    info!("{} released by server from combat with {}", self.id, peer);
                    self.stats.server_releases += 1;
                    self.set_state(LocalState::Idle);
                    self.emit(CombatEvent::Ended {
                        peer,
                        reason: EndReason::ServerReleased,
                    });
                }
            }
            Reconcile::RetryFinalize => match self.api.finalize_combat(&self.id).await {
                Ok(_) => {
                    self.pending_finalize = None;
                    self.server_state = CombatState::Free;
                }
                Err(e) => warn!("{} finalize retry failed: {}", self.id, e),
            },
            Reconcile::Adopt { peer, confirm } => {
                if confirm {
                    match self.api.confirm_combat(&self.id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!("{} lock with {} gone before confirm", self.id, peer);
                            return;
                        }
                        Err(e) => {
                            warn!("{} failed to confirm remote lock: {}", self.id, e);
                            return;
                        }
                    }
                }
                if self.state.combat_peer() != Some(&peer) {
                    info!("{} adopting combat started by {}", self.id, peer);
                    self.stats.remote_adoptions += 1;
                    self.enter_combat(peer, false);
                }
            }
        }
    }

    /// Ends the local combat
    ///
    /// Local state resets even when the server call fails; the finalize is then
    /// retried from the next position report.
    pub async fn finalize(&mut self) -> Result<(), ClientError> {
        let peer = self.state.combat_peer().cloned();
        self.set_state(LocalState::Idle);
        self.detector.reset();

        if let Some(peer) = &peer {
            info!("{} finalizing combat with {}", self.id, peer);
            self.emit(CombatEvent::Ended {
                peer: peer.clone(),
                reason: EndReason::Finalized,
            });
        }

        match self.api.finalize_combat(&self.id).await {
            Ok(_) => {
                self.pending_finalize = None;
                self.server_state = CombatState::Free;
                Ok(())
            }
            Err(e) => {
                warn!("{} finalize failed: {}", self.id, e);
                self.pending_finalize = peer;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proximity::DetectorConfig;
    use tokio::sync::mpsc;

    fn snapshot(id: &str, state: CombatState, peer: Option<&str>) -> PeerSnapshot {
        PeerSnapshot {
            id: PlayerId::from(id),
            character: Some("vera".to_string()),
            x: 10.0,
            y: 10.0,
            combat_state: state,
            combat_peer: peer.map(PlayerId::from),
        }
    }

    fn response(own_state: CombatState, peers: Vec<PeerSnapshot>) -> PositionResponse {
        PositionResponse {
            peers,
            own_state,
            own_peer: None,
        }
    }

    fn offline_client() -> (CollisionClient, mpsc::UnboundedReceiver<CombatEvent>) {
        client_for("127.0.0.1:9", Duration::from_millis(100))
    }

    fn client_for(
        server: &str,
        request_timeout: Duration,
    ) -> (CollisionClient, mpsc::UnboundedReceiver<CombatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let api = ApiClient::new(server, request_timeout).unwrap();
        let client = CollisionClient::new(
            PlayerId::from("me"),
            api,
            ProximityDetector::new(DetectorConfig::default()),
            Duration::from_millis(800),
            tx,
        );
        (client, rx)
    }

    #[test]
    fn test_remote_lock_is_adopted_with_confirm() {
        let me = PlayerId::from("me");
        let report = response(
            CombatState::Locking,
            vec![snapshot("p1", CombatState::Locking, Some("me"))],
        );

        assert_eq!(
            reconcile(&LocalState::Idle, None, &me, &report),
            Reconcile::Adopt {
                peer: PlayerId::from("p1"),
                confirm: true
            }
        );
    }

    #[test]
    fn test_remote_combat_adopted_from_cooldown_without_confirm() {
        let me = PlayerId::from("me");
        let report = response(
            CombatState::InCombat,
            vec![snapshot("p1", CombatState::InCombat, Some("me"))],
        );
        let cooling = LocalState::Cooldown {
            until: Instant::now() + Duration::from_secs(1),
        };

        assert_eq!(
            reconcile(&cooling, None, &me, &report),
            Reconcile::Adopt {
                peer: PlayerId::from("p1"),
                confirm: false
            }
        );
    }

    #[test]
    fn test_peer_falls_back_to_own_peer_field() {
        let me = PlayerId::from("me");
        let mut report = response(CombatState::Locking, Vec::new());
        assert_eq!(reconcile(&LocalState::Idle, None, &me, &report), Reconcile::Keep);

        report.own_peer = Some(PlayerId::from("p1"));
        assert!(matches!(
            reconcile(&LocalState::Idle, None, &me, &report),
            Reconcile::Adopt { .. }
        ));
    }

    #[test]
    fn test_free_report_releases_local_combat() {
        let me = PlayerId::from("me");
        let in_combat = LocalState::InCombat {
            peer: PlayerId::from("p1"),
        };
        let report = response(CombatState::Free, Vec::new());

        assert_eq!(reconcile(&in_combat, None, &me, &report), Reconcile::Release);
        assert_eq!(reconcile(&LocalState::Idle, None, &me, &report), Reconcile::Keep);
    }

    #[test]
    fn test_pairing_with_a_different_peer_releases_first() {
        let me = PlayerId::from("me");
        let in_combat = LocalState::InCombat {
            peer: PlayerId::from("old"),
        };
        let report = response(
            CombatState::InCombat,
            vec![snapshot("new", CombatState::InCombat, Some("me"))],
        );

        assert_eq!(reconcile(&in_combat, None, &me, &report), Reconcile::Release);
    }

    #[test]
    fn test_requesting_is_left_to_the_handshake() {
        let me = PlayerId::from("me");
        let requesting = LocalState::Requesting {
            target: PlayerId::from("p2"),
        };
        let report = response(
            CombatState::Locking,
            vec![snapshot("p1", CombatState::Locking, Some("me"))],
        );

        assert_eq!(reconcile(&requesting, None, &me, &report), Reconcile::Keep);
    }

    #[test]
    fn test_pending_finalize_is_retried_instead_of_adopted() {
        let me = PlayerId::from("me");
        let finished = PlayerId::from("p1");
        let report = response(
            CombatState::InCombat,
            vec![snapshot("p1", CombatState::InCombat, Some("me"))],
        );

        assert_eq!(
            reconcile(&LocalState::Idle, Some(&finished), &me, &report),
            Reconcile::RetryFinalize
        );
    }

    #[tokio::test]
    async fn test_stale_report_only_refreshes_peers() {
        let (mut client, mut events) = offline_client();
        let stale = client.generation();
        client.set_state(LocalState::Cooldown {
            until: Instant::now() + Duration::from_secs(1),
        });

        let report = response(
            CombatState::InCombat,
            vec![snapshot("p1", CombatState::InCombat, Some("me"))],
        );
        client.apply_server_state(report, stale).await;

        assert!(matches!(client.state(), LocalState::Cooldown { .. }));
        assert_eq!(client.peers().len(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_release_emits_ended() {
        let (mut client, mut events) = offline_client();
        client.set_state(LocalState::InCombat {
            peer: PlayerId::from("p1"),
        });

        let generation = client.generation();
        client
            .apply_server_state(response(CombatState::Free, Vec::new()), generation)
            .await;

        assert_eq!(client.state(), &LocalState::Idle);
        assert_eq!(client.stats().server_releases, 1);
        assert_eq!(
            events.try_recv().unwrap(),
            CombatEvent::Ended {
                peer: PlayerId::from("p1"),
                reason: EndReason::ServerReleased
            }
        );
    }

    #[tokio::test]
    async fn test_adopting_in_combat_needs_no_server_call() {
        let (mut client, mut events) = offline_client();
        let generation = client.generation();
        let report = response(
            CombatState::InCombat,
            vec![snapshot("p1", CombatState::InCombat, Some("me"))],
        );

        client.apply_server_state(report, generation).await;

        assert_eq!(
            client.state(),
            &LocalState::InCombat {
                peer: PlayerId::from("p1")
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            CombatEvent::Started {
                peer: PlayerId::from("p1"),
                character: Some("vera".to_string()),
                initiated_locally: false
            }
        );
    }

    #[tokio::test]
    async fn test_finalize_resets_even_when_server_unreachable() {
        let (mut client, mut events) = offline_client();
        client.set_state(LocalState::InCombat {
            peer: PlayerId::from("p1"),
        });

        assert!(client.finalize().await.is_err());
        assert_eq!(client.state(), &LocalState::Idle);
        assert_eq!(client.pending_finalize, Some(PlayerId::from("p1")));
        assert!(matches!(
            events.try_recv().unwrap(),
            CombatEvent::Ended {
                reason: EndReason::Finalized,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cooldown_expires_back_to_idle() {
        let (mut client, _events) = offline_client();
        let now = Instant::now();
        client.set_state(LocalState::Cooldown { until: now });

        client.tick(Position::new(0.0, 0.0), now).await;
        assert_eq!(client.state(), &LocalState::Idle);
    }

    /// Feeds a FREE report with one nearby FREE peer and runs a tick
    async fn tick_near_free_peer(client: &mut CollisionClient) {
        let generation = client.generation();
        let report = response(CombatState::Free, vec![snapshot("p2", CombatState::Free, None)]);
        client.apply_server_state(report, generation).await;
        client.tick(Position::new(0.0, 0.0), Instant::now()).await;
    }

    #[tokio::test]
    async fn test_unreachable_server_during_request_enters_cooldown() {
        let (mut client, mut events) = offline_client();

        tick_near_free_peer(&mut client).await;

        assert!(matches!(client.state(), LocalState::Cooldown { .. }));
        assert_eq!(client.stats().requests, 1);
        assert_eq!(client.stats().rejections, 1);
        assert_eq!(client.stats().confirmed, 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timed_out_request_enters_cooldown() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let (mut client, mut events) = client_for(&addr.to_string(), Duration::from_millis(150));
        let started = Instant::now();
        tick_near_free_peer(&mut client).await;

        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(matches!(client.state(), LocalState::Cooldown { .. }));
        assert_eq!(client.stats().rejections, 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unconfirmed_remote_lock_pauses_scanning() {
        let (mut client, mut events) = offline_client();
        let report = response(
            CombatState::Locking,
            vec![
                snapshot("p1", CombatState::Locking, Some("me")),
                snapshot("p2", CombatState::Free, None),
            ],
        );

        // The adopting confirm cannot reach the server.
        let generation = client.generation();
        client.apply_server_state(report, generation).await;
        assert_eq!(client.state(), &LocalState::Idle);
        assert_eq!(client.server_state(), CombatState::Locking);

        client.tick(Position::new(0.0, 0.0), Instant::now()).await;
        assert_eq!(client.state(), &LocalState::Idle);
        assert_eq!(client.stats().requests, 0);

        // Once the server lets go of the lock, scanning resumes.
        tick_near_free_peer(&mut client).await;
        assert_eq!(client.server_state(), CombatState::Free);
        assert_eq!(client.stats().requests, 1);
        assert!(events.try_recv().is_err());
    }
}
