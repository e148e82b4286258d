use shared::PlayerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("server does not know player {0}")]
    NotFound(PlayerId),

    #[error("server answered with status {0}")]
    Status(u16),
}

impl ClientError {
    /// Whether repeating the same idempotent call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Timeout => true,
            ClientError::Http(e) => e.is_connect() || e.is_request(),
            ClientError::Status(code) => *code >= 500,
            ClientError::NotFound(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Http(e)
        }
    }
}
