use std::{fs, path::Path, str::FromStr, sync::Arc, time::Duration};

use serde::Deserialize;
use tracing::warn;

use crate::{operations::PageSizes, rate_limit::RateLimiter, retry::RetryPolicy};

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub graph_base_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub presence_refresh_interval_ms: u64,
    pub max_concurrent_requests: usize,
    pub min_request_interval_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub message_page_size: u32,
    pub chat_page_size: u32,
    pub search_page_size: u32,
    pub presence_session_id: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            graph_base_url: "https://graph.microsoft.com/v1.0".into(),
            request_timeout_secs: 30,
            poll_interval_ms: 1000,
            presence_refresh_interval_ms: 30_000,
            max_concurrent_requests: 5,
            min_request_interval_ms: 100,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            message_page_size: 50,
            chat_page_size: 50,
            search_page_size: 25,
            presence_session_id: "slackteams".into(),
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn presence_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.presence_refresh_interval_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            self.max_concurrent_requests,
            Duration::from_millis(self.min_request_interval_ms),
        ))
    }

    pub fn page_sizes(&self) -> PageSizes {
        PageSizes {
            messages: self.message_page_size,
            chats: self.chat_page_size,
            search: self.search_page_size,
        }
    }
}

/// Defaults, then `client.toml` in the working directory, then `APP__*`.
pub fn load_settings() -> Settings {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE))
}

pub fn load_settings_from(path: &Path) -> Settings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<Settings>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config: ignoring invalid file");
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Applies `APP__*` overrides read through `lookup`. Values that do not
/// parse leave the current setting untouched.
pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
        if let Some(value) = lookup(key).and_then(|raw| raw.trim().parse::<T>().ok()) {
            *slot = value;
        }
    }

    if let Some(v) = lookup("APP__GRAPH_BASE_URL").filter(|v| !v.trim().is_empty()) {
        settings.graph_base_url = v;
    }
    parsed(&lookup, "APP__REQUEST_TIMEOUT_SECS", &mut settings.request_timeout_secs);
    parsed(&lookup, "APP__POLL_INTERVAL_MS", &mut settings.poll_interval_ms);
    parsed(
        &lookup,
        "APP__PRESENCE_REFRESH_INTERVAL_MS",
        &mut settings.presence_refresh_interval_ms,
    );
    parsed(&lookup, "APP__MAX_CONCURRENT_REQUESTS", &mut settings.max_concurrent_requests);
    parsed(&lookup, "APP__MIN_REQUEST_INTERVAL_MS", &mut settings.min_request_interval_ms);
    parsed(&lookup, "APP__MAX_RETRIES", &mut settings.max_retries);
    parsed(&lookup, "APP__RETRY_BASE_DELAY_MS", &mut settings.retry_base_delay_ms);
    parsed(&lookup, "APP__RETRY_MAX_DELAY_MS", &mut settings.retry_max_delay_ms);
    parsed(&lookup, "APP__MESSAGE_PAGE_SIZE", &mut settings.message_page_size);
    parsed(&lookup, "APP__CHAT_PAGE_SIZE", &mut settings.chat_page_size);
    parsed(&lookup, "APP__SEARCH_PAGE_SIZE", &mut settings.search_page_size);
    if let Some(v) = lookup("APP__PRESENCE_SESSION_ID").filter(|v| !v.trim().is_empty()) {
        settings.presence_session_id = v;
    }
}
