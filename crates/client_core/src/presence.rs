use std::{collections::BTreeSet, sync::Arc, time::Duration};

use shared::domain::UserId;
use tokio::{
    sync::{broadcast::error::RecvError, Mutex},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, Result},
    operations::RemoteOperations,
    redact::redact,
    store::{Store, StoreEvent},
};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Batches presence lookups for the authors currently on screen.
///
/// A lookup is issued when the visible author set changes, and the last
/// set is refreshed on a slower timer. Results land in the store.
pub struct PresenceTracker {
    store: Arc<Store>,
    operations: Arc<RemoteOperations>,
    period: Duration,
    observed: Mutex<BTreeSet<UserId>>,
    active: parking_lot::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl PresenceTracker {
    pub fn new(store: Arc<Store>, operations: Arc<RemoteOperations>, period: Duration) -> Self {
        Self {
            store,
            operations,
            period,
            observed: Mutex::new(BTreeSet::new()),
            active: parking_lot::Mutex::new(None),
        }
    }

    pub async fn observed_ids(&self) -> BTreeSet<UserId> {
        self.observed.lock().await.clone()
    }

    /// Recomputes the visible author set and fetches presence if it differs
    /// from the set used last time. Returns whether a request was issued.
    pub async fn observe(&self) -> Result<bool> {
        if !self.store.is_authenticated() {
            return Ok(false);
        }
        let ids = self.store.message_author_ids();
        {
            let mut observed = self.observed.lock().await;
            if *observed == ids {
                return Ok(false);
            }
            observed.clone_from(&ids);
        }
        if ids.is_empty() {
            return Ok(false);
        }
        self.fetch(ids).await?;
        Ok(true)
    }

    /// Re-fetches the last observed set; an empty set is skipped.
    pub async fn refresh(&self) -> Result<bool> {
        if !self.store.is_authenticated() {
            return Ok(false);
        }
        let ids = self.observed.lock().await.clone();
        if ids.is_empty() {
            return Ok(false);
        }
        self.fetch(ids).await?;
        Ok(true)
    }

    async fn fetch(&self, ids: BTreeSet<UserId>) -> Result<()> {
        let ids = ids.into_iter().collect::<Vec<_>>();
        let presences = self.operations.presences(&ids).await?;
        debug!(requested = ids.len(), received = presences.len(), "presence: refreshed");
        self.store.merge_presence(presences);
        Ok(())
    }

    pub async fn reset(&self) {
        self.observed.lock().await.clear();
    }

    pub fn start(self: &Arc<Self>) {
        let mut active = self.active.lock();
        if let Some((stop, task)) = active.take() {
            stop.cancel();
            task.abort();
        }
        let stop = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run(stop.clone()));
        *active = Some((stop, task));
    }

    pub fn stop(&self) {
        if let Some((stop, task)) = self.active.lock().take() {
            stop.cancel();
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|(_, task)| !task.is_finished())
    }

    async fn run(self: Arc<Self>, stop: CancellationToken) {
        let mut events = self.store.subscribe();
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.report(self.observe().await);
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                event = events.recv() => match event {
                    Ok(StoreEvent::Session) if !self.store.is_authenticated() => {
                        self.reset().await;
                        break;
                    }
                    Ok(StoreEvent::Messages | StoreEvent::Selection) | Err(RecvError::Lagged(_)) => {
                        self.report(self.observe().await);
                    }
                    Ok(_) => {}
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => self.report(self.refresh().await),
            }
        }
        debug!("presence: loop stopped");
    }

    fn report(&self, outcome: Result<bool>) {
        match outcome {
            Ok(_) => {}
            Err(ClientError::AuthExpired) => {
                info!("presence: session expired, ending session");
                self.store.end_session(Some(ClientError::AuthExpired.to_string()));
            }
            Err(err) => warn!(error = %redact(&err.to_string()), "presence: refresh failed"),
        }
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
