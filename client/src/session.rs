use crate::collision::{CollisionClient, CombatEvent};
use crate::error::ClientError;
use crate::network::ApiClient;
use crate::proximity::{DetectorConfig, ProximityDetector};
use crate::scheduler::PeriodicTask;
use log::{debug, info, warn};
use shared::{
    PlayerId, Position, COOLDOWN_MS, POSITION_INTERVAL_MS, REQUEST_TIMEOUT_MS, SCAN_INTERVAL_MS,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server: String,
    pub position_interval: Duration,
    pub scan_interval: Duration,
    pub request_timeout: Duration,
    pub cooldown: Duration,
    pub detector: DetectorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:8080".to_string(),
            position_interval: Duration::from_millis(POSITION_INTERVAL_MS),
            scan_interval: Duration::from_millis(SCAN_INTERVAL_MS),
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            cooldown: Duration::from_millis(COOLDOWN_MS),
            detector: DetectorConfig::default(),
        }
    }
}

/// A joined player with its periodic position push and proximity scan
pub struct Session {
    id: PlayerId,
    api: ApiClient,
    client: Arc<Mutex<CollisionClient>>,
    position: watch::Sender<Position>,
    config: SessionConfig,
    position_task: PeriodicTask,
    scan_task: PeriodicTask,
    metrics_task: PeriodicTask,
}

impl Session {
    /// Joins the server and selects `character`; tasks are not started yet
    pub async fn join(
        config: SessionConfig,
        character: &str,
        start: Position,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CombatEvent>), ClientError> {
        let api = ApiClient::new(&config.server, config.request_timeout)?;
        let id = api.join().await?;
        api.select_character(&id, character).await?;
        info!("Joined {} as {} playing {}", api.base_url(), id, character);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = CollisionClient::new(
            id.clone(),
            api.clone(),
            ProximityDetector::new(config.detector),
            config.cooldown,
            events_tx,
        );
        let (position, _) = watch::channel(start);

        let session = Session {
            id,
            api,
            client: Arc::new(Mutex::new(client)),
            position,
            config,
            position_task: PeriodicTask::new("position"),
            scan_task: PeriodicTask::new("scan"),
            metrics_task: PeriodicTask::new("metrics"),
        };
        Ok((session, events_rx))
    }

    pub fn id(&self) -> &PlayerId {
        &self.id
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn client(&self) -> Arc<Mutex<CollisionClient>> {
        Arc::clone(&self.client)
    }

    pub fn position(&self) -> Position {
        *self.position.borrow()
    }

    pub fn set_position(&self, position: Position) {
        self.position.send_replace(position);
    }

    pub fn start(&mut self) {
        let api = self.api.clone();
        let id = self.id.clone();
        let client = Arc::clone(&self.client);
        let position = self.position.subscribe();
        self.position_task.start(self.config.position_interval, move || {
            let api = api.clone();
            let id = id.clone();
            let client = Arc::clone(&client);
            let own = *position.borrow();
            async move {
                let generation = client.lock().await.generation();
                match api.report_position(&id, own).await {
                    Ok(response) => {
                        let mut client = client.lock().await;
                        client.apply_server_state(response, generation).await;
                    }
                    Err(e) => warn!("Position report failed: {}", e),
                }
            }
        });

        let client = Arc::clone(&self.client);
        let position = self.position.subscribe();
        self.scan_task.start(self.config.scan_interval, move || {
            let client = Arc::clone(&client);
            let own = *position.borrow();
            async move {
                client.lock().await.tick(own, Instant::now()).await;
            }
        });

        let client = Arc::clone(&self.client);
        self.metrics_task.start(METRICS_LOG_INTERVAL, move || {
            let client = Arc::clone(&client);
            async move {
                let client = client.lock().await;
                let scan = client.scan_stats();
                let handshake = client.stats();
                debug!(
                    "{}: {} scans, {} peers checked, {} candidates",
                    client.id(),
                    scan.ticks,
                    scan.peers_scanned,
                    scan.candidates
                );
                debug!(
                    "{}: {} requests, {} confirmed, {} adopted, {} released",
                    client.id(),
                    handshake.requests,
                    handshake.confirmed,
                    handshake.remote_adoptions,
                    handshake.server_releases
                );
            }
        });
    }

    pub async fn stop(&mut self) {
        self.scan_task.stop().await;
        self.position_task.stop().await;
        self.metrics_task.stop().await;
    }

    /// Ends the current combat, see `CollisionClient::finalize`
    pub async fn finalize(&self) -> Result<(), ClientError> {
        self.client.lock().await.finalize().await
    }

    /// Stops the tasks and removes the player from the server
    pub async fn leave(mut self) -> Result<(), ClientError> {
        self.stop().await;
        self.api.leave(&self.id).await?;
        info!("{} left", self.id);
        Ok(())
    }
}
