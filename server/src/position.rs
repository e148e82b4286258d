//! Periodic position push, which doubles as the state reconciliation channel.
//!
//! A report writes the caller's coordinates and answers with the eligible
//! peers plus the caller's own combat state, all read under the same write
//! lock that the arbiter commits under. A lock granted to some other player's
//! request is therefore visible in the very next report from either party.

use crate::error::RegistryError;
use crate::registry::{PlayerRegistry, SharedRegistry};
use shared::{PeerSnapshot, PlayerId, PositionReport, PositionResponse};
use std::time::Instant;

pub struct PositionChannel {
    registry: SharedRegistry,
}

impl PositionChannel {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    pub async fn report(
        &self,
        id: &PlayerId,
        report: PositionReport,
    ) -> Result<PositionResponse, RegistryError> {
        let now = Instant::now();
        let mut registry = self.registry.write().await;
        registry.upsert_position(id, report.x, report.y, now)?;
        snapshot_for(&mut registry, id, now)
    }
}

/// Builds the view of the world as `id` should see it right now
///
/// Lazy expiry runs on the caller and on every listed peer first, so no
/// abandoned lock is ever reported as live.
pub fn snapshot_for(
    registry: &mut PlayerRegistry,
    id: &PlayerId,
    now: Instant,
) -> Result<PositionResponse, RegistryError> {
    registry.reap_expired(id, now);
    let peer_ids: Vec<PlayerId> = registry
        .list_eligible(id)
        .into_iter()
        .map(|record| record.id.clone())
        .collect();
    for peer_id in &peer_ids {
        registry.reap_expired(peer_id, now);
    }

    let own = registry.get(id, now)?;
    let own_state = own.combat_state;
    let own_peer = own.combat_peer.clone();

    let peers: Vec<PeerSnapshot> = registry
        .list_eligible(id)
        .into_iter()
        .filter_map(|record| record.snapshot())
        .collect();

    Ok(PositionResponse {
        peers,
        own_state,
        own_peer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::CollisionArbiter;
    use crate::config::{ExpiryPolicy, ServerConfig};
    use shared::{CollisionRequest, CombatState, Position};
    use std::time::Duration;

    async fn ready(
        channel: &PositionChannel,
        registry: &SharedRegistry,
        x: f32,
        y: f32,
    ) -> PlayerId {
        let id = {
            let now = Instant::now();
            let mut registry = registry.write().await;
            let id = registry.join(now);
            registry.set_character(&id, "limbre".to_string(), now).unwrap();
            id
        };
        channel.report(&id, PositionReport { x, y }).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_report_lists_other_eligible_players() {
        let registry = PlayerRegistry::new(ExpiryPolicy::default()).into_shared();
        let channel = PositionChannel::new(registry.clone());
        let p1 = ready(&channel, &registry, 0.0, 0.0).await;
        let p2 = ready(&channel, &registry, 40.0, 30.0).await;

        let response = channel.report(&p1, PositionReport { x: 5.0, y: 5.0 }).await.unwrap();

        assert_eq!(response.own_state, CombatState::Free);
        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].id, p2);
        assert_eq!(response.peers[0].position(), Position::new(40.0, 30.0));

        let stored = registry.read().await.peek(&p1).unwrap().position;
        assert_eq!(stored, Some(Position::new(5.0, 5.0)));
    }

    #[tokio::test]
    async fn test_report_unknown_player() {
        let registry = PlayerRegistry::new(ExpiryPolicy::default()).into_shared();
        let channel = PositionChannel::new(registry);
        let ghost = PlayerId::from("ghost");

        let err = channel
            .report(&ghost, PositionReport { x: 0.0, y: 0.0 })
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound(ghost));
    }

    #[tokio::test]
    async fn test_target_sees_remote_lock_in_next_report() {
        let config = ServerConfig::default();
        let registry = PlayerRegistry::new(config.expiry).into_shared();
        let channel = PositionChannel::new(registry.clone());
        let arbiter = CollisionArbiter::new(registry.clone(), &config);
        let p1 = ready(&channel, &registry, 0.0, 0.0).await;
        let p2 = ready(&channel, &registry, 10.0, 10.0).await;

        let request = CollisionRequest::new(
            p2.clone(),
            Position::new(0.0, 0.0),
            Position::new(10.0, 10.0),
        );
        assert!(arbiter.request_collision(&p1, &request).await.unwrap().success);

        let response = channel.report(&p2, PositionReport { x: 10.0, y: 10.0 }).await.unwrap();
        assert_eq!(response.own_state, CombatState::Locking);
        assert_eq!(response.own_peer, Some(p1.clone()));

        let initiator = response.peers.iter().find(|peer| peer.is_paired_with(&p2));
        assert_eq!(initiator.map(|peer| peer.id.clone()), Some(p1));
    }

    #[tokio::test]
    async fn test_report_never_shows_expired_lock() {
        let config = ServerConfig {
            expiry: ExpiryPolicy {
                lock_timeout: Duration::from_millis(100),
                ..ExpiryPolicy::default()
            },
            ..ServerConfig::default()
        };
        let registry = PlayerRegistry::new(config.expiry).into_shared();
        let channel = PositionChannel::new(registry.clone());
        let arbiter = CollisionArbiter::new(registry.clone(), &config);
        let p1 = ready(&channel, &registry, 0.0, 0.0).await;
        let p2 = ready(&channel, &registry, 10.0, 10.0).await;
        let p3 = ready(&channel, &registry, 300.0, 300.0).await;

        let request = CollisionRequest::new(
            p2.clone(),
            Position::new(0.0, 0.0),
            Position::new(10.0, 10.0),
        );
        assert!(arbiter.request_collision(&p1, &request).await.unwrap().success);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // An uninvolved observer still gets both players reported as FREE.
        let response = channel.report(&p3, PositionReport { x: 300.0, y: 300.0 }).await.unwrap();
        assert!(response
            .peers
            .iter()
            .all(|peer| peer.combat_state == CombatState::Free && peer.combat_peer.is_none()));
    }
}
