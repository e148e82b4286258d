use crate::error::ClientError;
use log::{debug, warn};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    AckResponse, CharacterSelection, CollisionRequest, CollisionResponse, JoinResponse,
    MetricsResponse, PlayerId, Position, PositionReport, PositionResponse, PowersResponse,
    PowersSubmission,
};
use std::time::Duration;
use tokio::time::sleep;

/// Position reports are idempotent and retried this many times in total
pub const POSITION_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Thin JSON client for the arbitration server
///
/// Every call carries the per-request timeout configured at construction. A
/// timeout surfaces as `ClientError::Timeout` and an unknown id as
/// `ClientError::NotFound`; business rejections come back as ordinary bodies.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(server: &str, request_timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        let server = server.trim_end_matches('/');
        let base_url = if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("http://{}", server)
        };

        Ok(ApiClient { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn player_url(&self, id: &PlayerId, action: &str) -> String {
        self.url(&format!("/players/{}/{}", id, action))
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        id: Option<&PlayerId>,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(ClientError::NotFound(id.clone()));
            }
        }
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        Ok(response.json::<T>().await?)
    }

    pub async fn join(&self) -> Result<PlayerId, ClientError> {
        let response = self.http.post(self.url("/players")).send().await?;
        let joined: JoinResponse = Self::decode(response, None).await?;
        debug!("Joined as {}", joined.id);
        Ok(joined.id)
    }

    pub async fn leave(&self, id: &PlayerId) -> Result<bool, ClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/players/{}", id)))
            .send()
            .await?;
        let ack: AckResponse = Self::decode(response, Some(id)).await?;
        Ok(ack.success)
    }

    pub async fn select_character(
        &self,
        id: &PlayerId,
        character: &str,
    ) -> Result<bool, ClientError> {
        let body = CharacterSelection {
            character: character.to_string(),
        };
        let response = self
            .http
            .post(self.player_url(id, "character"))
            .json(&body)
            .send()
            .await?;
        let ack: AckResponse = Self::decode(response, Some(id)).await?;
        Ok(ack.success)
    }

    async fn post_position(
        &self,
        id: &PlayerId,
        report: PositionReport,
    ) -> Result<PositionResponse, ClientError> {
        let response = self
            .http
            .post(self.player_url(id, "position"))
            .json(&report)
            .send()
            .await?;
        Self::decode(response, Some(id)).await
    }

    /// Pushes the local position, retrying transient failures with backoff
    pub async fn report_position(
        &self,
        id: &PlayerId,
        position: Position,
    ) -> Result<PositionResponse, ClientError> {
        let report = PositionReport {
            x: position.x,
            y: position.y,
        };
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;

        loop {
            match self.post_position(id, report).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < POSITION_ATTEMPTS => {
                    warn!("Position report attempt {} failed: {}", attempt, e);
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sent exactly once; a lost reply is resolved by the next position report
    pub async fn request_collision(
        &self,
        id: &PlayerId,
        request: &CollisionRequest,
    ) -> Result<CollisionResponse, ClientError> {
        let response = self
            .http
            .post(self.player_url(id, "collision"))
            .json(request)
            .send()
            .await?;
        Self::decode(response, Some(id)).await
    }

    pub async fn confirm_combat(&self, id: &PlayerId) -> Result<bool, ClientError> {
        let response = self.http.post(self.player_url(id, "confirm-combat")).send().await?;
        let ack: AckResponse = Self::decode(response, Some(id)).await?;
        Ok(ack.success)
    }

    pub async fn finalize_combat(&self, id: &PlayerId) -> Result<bool, ClientError> {
        let response = self.http.post(self.player_url(id, "finalize-combat")).send().await?;
        let ack: AckResponse = Self::decode(response, Some(id)).await?;
        Ok(ack.success)
    }

    pub async fn submit_powers(
        &self,
        id: &PlayerId,
        powers: Vec<String>,
    ) -> Result<bool, ClientError> {
        let response = self
            .http
            .post(self.player_url(id, "powers"))
            .json(&PowersSubmission { powers })
            .send()
            .await?;
        let ack: AckResponse = Self::decode(response, Some(id)).await?;
        Ok(ack.success)
    }

    pub async fn fetch_powers(&self, id: &PlayerId) -> Result<Vec<String>, ClientError> {
        let response = self.http.get(self.player_url(id, "powers")).send().await?;
        let powers: PowersResponse = Self::decode(response, Some(id)).await?;
        Ok(powers.powers)
    }

    pub async fn metrics(&self) -> Result<MetricsResponse, ClientError> {
        let response = self.http.get(self.url("/metrics")).send().await?;
        Self::decode(response, None).await
    }
}
