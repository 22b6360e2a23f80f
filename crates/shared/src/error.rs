use serde::{Deserialize, Serialize};

/// Coarse classification of a remote failure, derived from its HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No status at all: the request never got a response.
    Network,
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Timeout,
    RateLimited,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            None => Self::Network,
            Some(401) => Self::Unauthorized,
            Some(403) => Self::Forbidden,
            Some(404) => Self::NotFound,
            Some(408) => Self::Timeout,
            Some(429) => Self::RateLimited,
            Some(code) if code >= 500 => Self::Internal,
            Some(_) => Self::Validation,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Internal
        )
    }
}

/// Error body returned by the remote service: `{"error": {"code", "message"}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteErrorEnvelope {
    pub error: RemoteErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl RemoteErrorEnvelope {
    /// Extracts the service's own message from a raw response body, if any.
    pub fn message_from_body(body: &str) -> Option<String> {
        serde_json::from_str::<Self>(body)
            .ok()
            .map(|envelope| envelope.error.message)
            .filter(|message| !message.is_empty())
    }
}
