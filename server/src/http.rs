//! HTTP/JSON edge of the arbitration server
//!
//! Every call is a stateless request/response. Handlers translate between the
//! wire types in `shared` and the registry, arbiter and position channel; none
//! of them hold state of their own.

use crate::arbiter::CollisionArbiter;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::position::PositionChannel;
use crate::registry::{PlayerRegistry, SharedRegistry};
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use log::{debug, error, info};
use shared::{
    AckResponse, CharacterSelection, CollisionRequest, CollisionResponse, JoinResponse,
    MetricsResponse, PlayerId, Position, PositionReport, PositionResponse, PowersResponse,
    PowersSubmission, POWERS_PER_COMBAT,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// Shared handles given to every request handler
#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub arbiter: Arc<CollisionArbiter>,
    pub positions: Arc<PositionChannel>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        let registry = PlayerRegistry::new(config.expiry).into_shared();
        Self {
            arbiter: Arc::new(CollisionArbiter::new(registry.clone(), config)),
            positions: Arc::new(PositionChannel::new(registry.clone())),
            registry,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/players", post(join))
        .route("/players/:id", delete(leave))
        .route("/players/:id/character", post(select_character))
        .route("/players/:id/position", post(report_position))
        .route("/players/:id/collision", post(request_collision))
        .route("/players/:id/confirm-combat", post(confirm_combat))
        .route("/players/:id/finalize-combat", post(finalize_combat))
        .route("/players/:id/powers", post(submit_powers).get(fetch_powers))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn join(State(state): State<AppState>) -> Json<JoinResponse> {
    let id = state.registry.write().await.join(Instant::now());
    Json(JoinResponse { id })
}

async fn leave(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
) -> Result<Json<AckResponse>, ApiError> {
    state.registry.write().await.remove(&id, Instant::now())?;
    Ok(Json(AckResponse::ok()))
}

async fn select_character(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
    Json(body): Json<CharacterSelection>,
) -> Result<Json<AckResponse>, ApiError> {
    let character = body.character.trim().to_string();
    if character.is_empty() {
        return Err(ApiError::BadRequest("character name must not be empty".to_string()));
    }
    state
        .registry
        .write()
        .await
        .set_character(&id, character, Instant::now())?;
    Ok(Json(AckResponse::ok()))
}

async fn report_position(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
    Json(report): Json<PositionReport>,
) -> Result<Json<PositionResponse>, ApiError> {
    if !Position::new(report.x, report.y).is_finite() {
        return Err(ApiError::BadRequest("coordinates must be finite".to_string()));
    }
    let response = state.positions.report(&id, report).await?;
    Ok(Json(response))
}

async fn request_collision(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
    Json(request): Json<CollisionRequest>,
) -> Result<Json<CollisionResponse>, ApiError> {
    debug!("Collision request {} -> {}", id, request.target_id);
    let response = state.arbiter.request_collision(&id, &request).await?;
    Ok(Json(response))
}

async fn confirm_combat(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
) -> Result<Json<AckResponse>, ApiError> {
    Ok(Json(state.arbiter.confirm_combat(&id).await?))
}

async fn finalize_combat(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
) -> Result<Json<AckResponse>, ApiError> {
    Ok(Json(state.arbiter.finalize_combat(&id).await?))
}

async fn submit_powers(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
    Json(body): Json<PowersSubmission>,
) -> Result<Json<AckResponse>, ApiError> {
    if body.powers.len() > POWERS_PER_COMBAT {
        return Err(ApiError::BadRequest(format!(
            "at most {} powers per combat",
            POWERS_PER_COMBAT
        )));
    }
    state
        .registry
        .write()
        .await
        .set_powers(&id, body.powers, Instant::now())?;
    Ok(Json(AckResponse::ok()))
}

async fn fetch_powers(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
) -> Result<Json<PowersResponse>, ApiError> {
    let powers = state.registry.read().await.powers(&id)?;
    Ok(Json(PowersResponse { powers }))
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(state.arbiter.metrics().await)
}

/// Arbitration server bound to a TCP listener
pub struct Server {
    listener: TcpListener,
    state: AppState,
    config: ServerConfig,
}

impl Server {
    pub async fn new(addr: &str, config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            state: AppState::new(&config),
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Spawns the sweep that drops players who stopped calling altogether
    fn spawn_idle_reaper(&self) {
        let registry = Arc::clone(&self.state.registry);
        let idle_timeout = self.config.idle_timeout;
        let period = self.config.reap_interval.max(MIN_REAP_INTERVAL);
        let mut interval = tokio::time::interval(period);

        tokio::spawn(async move {
            loop {
                interval.tick().await;

                let reaped = {
                    let mut registry = registry.write().await;
                    registry.reap_idle(idle_timeout, Instant::now())
                };

                if !reaped.is_empty() {
                    debug!("Idle sweep removed {} players", reaped.len());
                }
            }
        });
    }

    /// Serves requests until the listener fails
    pub async fn run(self) -> std::io::Result<()> {
        self.spawn_idle_reaper();

        info!("Server started successfully");
        let app = router(self.state);
        if let Err(e) = axum::serve(self.listener, app).await {
            error!("Server stopped: {}", e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_shares_one_registry() {
        let state = AppState::new(&ServerConfig::default());
        assert!(Arc::ptr_eq(&state.registry, state.arbiter.registry()));
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let server = Server::new("127.0.0.1:0", ServerConfig::default()).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.state().registry.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_handler_registers_player() {
        let state = AppState::new(&ServerConfig::default());
        let Json(response) = join(State(state.clone())).await;
        assert!(state.registry.read().await.contains(&response.id));
    }

    #[tokio::test]
    async fn test_empty_character_is_rejected() {
        let state = AppState::new(&ServerConfig::default());
        let Json(joined) = join(State(state.clone())).await;

        let result = select_character(
            State(state),
            Path(joined.id),
            Json(CharacterSelection {
                character: "   ".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_too_many_powers_rejected() {
        let state = AppState::new(&ServerConfig::default());
        let Json(joined) = join(State(state.clone())).await;

        let powers = vec!["FUEGO".to_string(); POWERS_PER_COMBAT + 1];
        let body = Json(PowersSubmission { powers });
        let result = submit_powers(State(state), Path(joined.id), body).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_unknown_player_is_not_found() {
        let state = AppState::new(&ServerConfig::default());
        let result = confirm_combat(State(state), Path(PlayerId::from("ghost"))).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_zero_reap_interval_still_sweeps() {
        let config = ServerConfig {
            reap_interval: Duration::ZERO,
            idle_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let server = Server::new("127.0.0.1:0", config).await.unwrap();
        let state = server.state();
        state.registry.write().await.join(Instant::now());

        let running = tokio::spawn(server.run());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!running.is_finished());
        assert!(state.registry.read().await.is_empty());
        running.abort();
    }
}
