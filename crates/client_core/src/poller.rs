use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use shared::domain::ConversationKey;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{ErrorKind, Result},
    operations::RemoteOperations,
    redact::redact,
    store::{PollOutcome, Store},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

struct ActivePoll {
    key: ConversationKey,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ActivePoll {
    fn cancel(self) {
        self.stop.cancel();
        self.task.abort();
    }
}

/// Keeps the selected conversation's message list fresh. At most one loop
/// runs at a time; starting a new one cancels the previous loop first.
pub struct MessagePoller {
    store: Arc<Store>,
    operations: Arc<RemoteOperations>,
    period: Duration,
    active: Mutex<Option<ActivePoll>>,
}

impl MessagePoller {
    pub fn new(store: Arc<Store>, operations: Arc<RemoteOperations>, period: Duration) -> Self {
        Self {
            store,
            operations,
            period,
            active: Mutex::new(None),
        }
    }

    pub fn start(&self, key: ConversationKey) {
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.cancel();
        }
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_poll_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.operations),
            key.clone(),
            self.period,
            stop.clone(),
        ));
        debug!(conversation = %key, period_ms = self.period.as_millis() as u64, "poller: started");
        *active = Some(ActivePoll { key, stop, task });
    }

    pub fn stop(&self) {
        if let Some(previous) = self.active.lock().take() {
            debug!(conversation = %previous.key, "poller: stopped");
            previous.cancel();
        }
    }

    pub fn active_key(&self) -> Option<ConversationKey> {
        self.active
            .lock()
            .as_ref()
            .filter(|poll| !poll.task.is_finished())
            .map(|poll| poll.key.clone())
    }

    pub fn is_running(&self) -> bool {
        self.active_key().is_some()
    }
}

impl Drop for MessagePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One fetch-and-reconcile step for `key`. The selection is checked again
/// when the result is applied, so a superseded fetch is discarded.
pub async fn poll_once(
    store: &Store,
    operations: &RemoteOperations,
    key: &ConversationKey,
) -> Result<PollOutcome> {
    let fetched = operations.conversation_messages(key).await?;
    Ok(store.reconcile_poll(key, fetched))
}

async fn run_poll_loop(
    store: Arc<Store>,
    operations: Arc<RemoteOperations>,
    key: ConversationKey,
    period: Duration,
    stop: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !store.read(|state| state.is_selected(&key)) {
            debug!(conversation = %key, "poller: conversation no longer selected");
            break;
        }

        let outcome = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            outcome = poll_once(&store, &operations, &key) => outcome,
        };
        match outcome {
            Ok(PollOutcome::Replaced) => {
                debug!(conversation = %key, "poller: message list replaced");
            }
            Ok(PollOutcome::Unchanged) => {}
            Ok(PollOutcome::Stale) => break,
            Err(err) if err.is_auth_expired() => {
                info!(conversation = %key, "poller: session expired, ending session");
                store.end_session(Some(err.to_string()));
                break;
            }
            Err(err) if err.kind() == ErrorKind::Validation => {
                warn!(
                    conversation = %key,
                    error = %err,
                    "poller: conversation key rejected, stopping"
                );
                break;
            }
            Err(err) => {
                warn!(
                    conversation = %key,
                    error = %redact(&err.to_string()),
                    "poller: tick failed"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
