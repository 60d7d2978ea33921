//! Error taxonomy shared by the sync core and its HTTP/WebSocket clients.

use reqwest::StatusCode;
use shared::config::ConfigError;
use shared::models::ErrorResponse;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),
    #[error("login required")]
    Unauthorized,
    #[error("server rejected the request ({status}): {detail}")]
    Rejected { status: StatusCode, detail: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("push channel error: {0}")]
    Socket(Box<tungstenite::Error>),
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no conversation is active")]
    NoActiveConversation,
    #[error("live stream is not open")]
    StreamNotOpen,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
                Self::Unauthorized
            }
            _ => Self::Socket(Box::new(err)),
        }
    }
}

impl ClientError {
    /// Maps a non-success HTTP response onto the error taxonomy.
    ///
    /// The server's `detail` text is kept verbatim when it is a string. Only
    /// 401 means the credential is bad; 403 is an ordinary rejection.
    #[must_use]
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = ErrorResponse::from_body(body)
            .and_then(|error| error.message().map(str::to_owned));

        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::NOT_FOUND => {
                Self::NotFound(detail.unwrap_or_else(|| "resource not found".to_string()))
            }
            _ => Self::Rejected {
                status,
                detail: detail.unwrap_or_else(|| format!("request failed with status {status}")),
            },
        }
    }

    /// True when the user has to log in again.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::InvalidCredential(_))
    }

    /// Inline text shown to the user next to the failed action.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) | Self::NotFound(message) => message.clone(),
            Self::Rejected { detail, .. } => detail.clone(),
            Self::Unauthorized | Self::InvalidCredential(_) => {
                "Your session has expired. Please log in again.".to_string()
            }
            Self::Http(_) | Self::Socket(_) => {
                "Could not reach the chat server. Check your connection.".to_string()
            }
            Self::NoActiveConversation => "Select a conversation first.".to_string(),
            Self::StreamNotOpen => "Live updates are currently unavailable.".to_string(),
            other => other.to_string(),
        }
    }
}
