use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{ClientError, Result};

pub const MAX_LOGIN_ATTEMPTS: usize = 3;
pub const LOGIN_ATTEMPT_WINDOW: Duration = Duration::from_secs(30);

/// Token acquisition lives outside this crate; the engine only asks for a
/// token per request. `None` means the user is no longer signed in.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
    async fn sign_in(&self) -> Result<()>;
    async fn sign_out(&self) -> Result<()>;
    async fn clear_cached_accounts(&self);
}

/// Serves one pre-acquired token until signed out.
pub struct StaticTokenProvider {
    token: Mutex<Option<String>>,
    original: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: Mutex::new(Some(token.clone())),
            original: token,
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn access_token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    async fn sign_in(&self) -> Result<()> {
        if self.original.trim().is_empty() {
            return Err(ClientError::Auth("no access token configured".to_string()));
        }
        *self.token.lock() = Some(self.original.clone());
        Ok(())
    }

    async fn sign_out(&self) -> Result<()> {
        self.token.lock().take();
        Ok(())
    }

    async fn clear_cached_accounts(&self) {
        self.token.lock().take();
    }
}

/// Rolling-window cap on interactive login attempts.
pub struct LoginThrottle {
    attempts: Mutex<VecDeque<Instant>>,
    max_attempts: usize,
    window: Duration,
}

impl LoginThrottle {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Mutex::new(VecDeque::new()),
            max_attempts,
            window,
        }
    }

    /// Records an attempt, or rejects it with the time left until the oldest
    /// attempt in the window expires.
    pub fn check(&self) -> Result<()> {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        while attempts
            .front()
            .is_some_and(|first| now.duration_since(*first) >= self.window)
        {
            attempts.pop_front();
        }
        if attempts.len() >= self.max_attempts {
            let oldest = attempts.front().copied().unwrap_or(now);
            let retry_in = self.window.saturating_sub(now.duration_since(oldest));
            return Err(ClientError::LoginThrottled { retry_in });
        }
        attempts.push_back(now);
        Ok(())
    }

    pub fn record_success(&self) {
        self.attempts.lock().clear();
    }
}

impl Default for LoginThrottle {
    fn default() -> Self {
        Self::new(MAX_LOGIN_ATTEMPTS, LOGIN_ATTEMPT_WINDOW)
    }
}
