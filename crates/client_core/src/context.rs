use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use reqwest::Client;
use tracing::{info, warn};

use crate::{
    auth::AuthProvider,
    error::{ApiError, ClientError, Result},
};

/// Owned replacement for a process-global API handle: the HTTP client is
/// built on first use, reused afterwards, and dropped again by [`reset`].
///
/// [`reset`]: ClientContext::reset
pub struct ClientContext {
    auth: Arc<dyn AuthProvider>,
    base_url: String,
    timeout: Duration,
    http: Mutex<Option<Client>>,
}

impl ClientContext {
    pub fn new(auth: Arc<dyn AuthProvider>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            auth,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            http: Mutex::new(None),
        }
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn http(&self) -> Result<Client> {
        let mut slot = self.http.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| ApiError::network(format!("failed to build http client: {err}")))?;
        info!(base_url = %self.base_url, "context: http client initialized");
        *slot = Some(client.clone());
        Ok(client)
    }

    /// A missing token de-authenticates: the cached client and the provider's
    /// cached accounts are dropped before `AuthExpired` is returned.
    pub async fn access_token(&self) -> Result<String> {
        match self.auth.access_token().await {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                warn!("context: no access token available, resetting session state");
                self.reset();
                self.auth.clear_cached_accounts().await;
                Err(ClientError::AuthExpired)
            }
        }
    }

    pub fn reset(&self) {
        self.http.lock().take();
    }

    pub fn is_initialized(&self) -> bool {
        self.http.lock().is_some()
    }
}
