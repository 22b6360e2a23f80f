use std::time::Duration;

use shared::error::ErrorCode;
use thiserror::Error;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Empty { field: &'static str },
    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} contains invalid characters")]
    InvalidCharacters { field: &'static str },
    #[error("{field} is not a valid GUID")]
    NotGuid { field: &'static str },
}

/// A failed remote call, as seen after the retry wrapper gave up on it.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed{}: {message}", status_suffix(.status))]
pub struct ApiError {
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
    pub message: String,
    pub operation: String,
    pub attempts: u32,
    pub is_retryable: bool,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!(" with status {status}"),
        None => String::new(),
    }
}

impl ApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            message: message.into(),
            operation: String::from("request"),
            attempts: 0,
            is_retryable: ErrorCode::from_status(status).is_retryable(),
        }
    }

    /// Network-level failure: the request produced no status at all.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(Some(status), message)
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::from_status(self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum ErrorKind {
    Validation,
    Client,
    RateLimit,
    Server,
    Network,
    AuthExpired,
    LoginThrottled,
    Auth,
}

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("authentication expired; sign in again")]
    AuthExpired,
    #[error("too many login attempts; retry in {} seconds", .retry_in.as_secs().max(1))]
    LoginThrottled { retry_in: Duration },
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::AuthExpired => ErrorKind::AuthExpired,
            Self::LoginThrottled { .. } => ErrorKind::LoginThrottled,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Api(err) => match err.status {
                None => ErrorKind::Network,
                Some(429) => ErrorKind::RateLimit,
                Some(408) => ErrorKind::Server,
                Some(status) if status >= 500 => ErrorKind::Server,
                Some(_) => ErrorKind::Client,
            },
        }
    }

    /// Only remote failures are ever retried; an expired session never is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(err) => err.is_retryable,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api(err) => err.retry_after,
            _ => None,
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(err) => err.status,
            _ => None,
        }
    }

    pub(crate) fn annotated(self, operation: &str, attempts: u32) -> Self {
        match self {
            Self::Api(mut err) => {
                err.operation = operation.to_string();
                err.attempts = attempts;
                Self::Api(err)
            }
            other => other,
        }
    }
}
