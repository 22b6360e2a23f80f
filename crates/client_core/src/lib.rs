use std::sync::Arc;

use futures::future::try_join_all;
use shared::{
    domain::{Availability, ConversationKey, ConversationRef, MessageId, TeamId, UserId},
    protocol::{Channel, ChatMessage, Team, User},
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod operations;
pub mod poller;
pub mod presence;
pub mod rate_limit;
pub mod redact;
pub mod retry;
pub mod store;
pub mod transport;
pub mod validation;

pub use auth::{AuthProvider, LoginThrottle, StaticTokenProvider};
pub use config::{load_settings, load_settings_from, Settings};
pub use context::ClientContext;
pub use error::{ApiError, ClientError, ErrorKind, Result, ValidationError};
pub use operations::{GraphApi, RemoteOperations};
pub use rate_limit::{RateLimitPermit, RateLimiter};
pub use retry::RetryPolicy;
pub use store::{AppState, OpenThread, PresenceRecord, Store, StoreEvent};

use crate::{
    poller::MessagePoller, presence::PresenceTracker, redact::redact, transport::HttpGraphApi,
    validation::validate_conversation_key,
};

/// Composition root of the engine: one remote operation set behind one rate
/// limiter, one store, one message poller and one presence tracker.
///
/// Action methods validate, call out, and apply the result to the store only
/// if the conversation (or thread) it belongs to is still current. An
/// `AuthExpired` failure from any of them ends the session.
pub struct SyncClient {
    settings: Settings,
    context: Arc<ClientContext>,
    operations: Arc<RemoteOperations>,
    store: Arc<Store>,
    poller: MessagePoller,
    presence: Arc<PresenceTracker>,
    login_throttle: LoginThrottle,
}

impl SyncClient {
    pub fn new(settings: Settings, auth: Arc<dyn AuthProvider>) -> Self {
        let context = Arc::new(ClientContext::new(
            auth,
            settings.graph_base_url.clone(),
            settings.request_timeout(),
        ));
        let api = Arc::new(HttpGraphApi::new(Arc::clone(&context)));
        Self::assemble(settings, context, api)
    }

    /// Same wiring as [`SyncClient::new`] over a caller-supplied API.
    pub fn with_api(settings: Settings, auth: Arc<dyn AuthProvider>, api: Arc<dyn GraphApi>) -> Self {
        let context = Arc::new(ClientContext::new(
            auth,
            settings.graph_base_url.clone(),
            settings.request_timeout(),
        ));
        Self::assemble(settings, context, api)
    }

    fn assemble(settings: Settings, context: Arc<ClientContext>, api: Arc<dyn GraphApi>) -> Self {
        let operations = Arc::new(RemoteOperations::new(
            api,
            settings.rate_limiter(),
            settings.retry_policy(),
            settings.page_sizes(),
            settings.presence_session_id.clone(),
        ));
        let store = Arc::new(Store::new());
        let poller = MessagePoller::new(
            Arc::clone(&store),
            Arc::clone(&operations),
            settings.poll_interval(),
        );
        let presence = Arc::new(PresenceTracker::new(
            Arc::clone(&store),
            Arc::clone(&operations),
            settings.presence_refresh_interval(),
        ));
        Self {
            settings,
            context,
            operations,
            store,
            poller,
            presence,
            login_throttle: LoginThrottle::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn operations(&self) -> &Arc<RemoteOperations> {
        &self.operations
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.context
    }

    pub fn state(&self) -> AppState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn presence_for(&self, user_id: &UserId) -> PresenceRecord {
        self.store.presence_for(user_id)
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    pub fn is_tracking_presence(&self) -> bool {
        self.presence.is_running()
    }

    /// Interactive sign-in. Throttled before the auth provider or the
    /// network is touched.
    pub async fn login(&self) -> Result<User> {
        self.login_throttle.check()?;
        self.store.set_auth_loading(true);
        let outcome = async {
            self.context.auth().sign_in().await?;
            self.establish_session().await
        }
        .await;
        match outcome {
            Ok(user) => {
                self.login_throttle.record_success();
                Ok(user)
            }
            Err(err) => {
                warn!(error = %redact(&err.to_string()), "session: login failed");
                self.store.set_auth_loading(false);
                let err = self.on_error(err);
                self.store.set_auth_error(Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Resumes with a token the provider already holds, if any.
    pub async fn restore_session(&self) -> Result<Option<User>> {
        if self.context.auth().access_token().await.is_none() {
            debug!("session: no cached token to restore");
            return Ok(None);
        }
        self.store.set_auth_loading(true);
        match self.establish_session().await {
            Ok(user) => Ok(Some(user)),
            Err(err) => {
                self.store.set_auth_loading(false);
                Err(self.on_error(err))
            }
        }
    }

    async fn establish_session(&self) -> Result<User> {
        let user = self.operations.current_user().await?;
        info!(user_id = %user.id, "session: signed in");
        self.store.begin_session(user.clone());
        self.presence.reset().await;
        self.presence.start();

        let (teams, chats) = tokio::join!(self.refresh_conversations(), self.refresh_chats());
        for outcome in [teams, chats] {
            if let Err(err) = outcome {
                if err.is_auth_expired() {
                    return Err(err);
                }
                warn!(error = %redact(&err.to_string()), "session: initial load failed");
            }
        }
        Ok(user)
    }

    pub async fn logout(&self) -> Result<()> {
        self.end_session(None).await;
        self.context.auth().sign_out().await?;
        info!("session: signed out");
        Ok(())
    }

    /// Stops every timer, drops the cached HTTP client and resets the store.
    pub async fn end_session(&self, reason: Option<String>) {
        self.stop_background();
        self.presence.reset().await;
        self.context.reset();
        self.store.end_session(reason);
    }

    pub async fn refresh_conversations(&self) -> Result<()> {
        self.store.set_teams_loading(true);
        let loaded = self.load_teams().await;
        self.store.set_teams_loading(false);
        match loaded {
            Ok(teams) => {
                if self.store.set_teams(teams) {
                    debug!("sync: team list updated");
                }
                Ok(())
            }
            Err(err) => Err(self.on_error(err)),
        }
    }

    async fn load_teams(&self) -> Result<Vec<(Team, Vec<Channel>)>> {
        let teams = self.operations.joined_teams().await?;
        let channels = try_join_all(
            teams
                .iter()
                .map(|team| self.operations.team_channels(&team.id)),
        )
        .await?;
        Ok(teams.into_iter().zip(channels).collect())
    }

    pub async fn refresh_chats(&self) -> Result<()> {
        self.store.set_chats_loading(true);
        let loaded = self.operations.chats().await;
        self.store.set_chats_loading(false);
        match loaded {
            Ok(chats) => {
                self.store.set_chats(chats);
                Ok(())
            }
            Err(err) => Err(self.on_error(err)),
        }
    }

    /// Switches the active conversation. Malformed ids are rejected before
    /// anything changes. The previous poll loop is cancelled before the store
    /// is touched, and the list is cleared even when the selection is
    /// unchanged.
    pub async fn select_conversation(&self, selection: ConversationRef) -> Result<()> {
        let key = selection.key();
        validate_conversation_key(&key)?;
        self.poller.stop();
        info!(conversation = %key, "sync: conversation selected");
        self.store.select_conversation(Some(selection));
        self.poller.start(key.clone());

        self.store.set_messages_loading(&key, true);
        let loaded = self.operations.conversation_messages(&key).await;
        self.store.set_messages_loading(&key, false);
        match loaded {
            Ok(messages) => {
                if !self.store.replace_messages(&key, messages) {
                    debug!(conversation = %key, "sync: initial load discarded or unchanged");
                }
                Ok(())
            }
            Err(err) => Err(self.on_error(err)),
        }
    }

    pub fn clear_selection(&self) {
        self.poller.stop();
        self.store.select_conversation(None);
    }

    /// Posts to the selected conversation and appends the server's copy.
    /// Returns `None` when nothing is selected.
    pub async fn send_message(&self, content: &str) -> Result<Option<ChatMessage>> {
        let Some(key) = self.store.selected_key() else {
            return Ok(None);
        };
        let message = self
            .operations
            .send_message(&key, content)
            .await
            .map_err(|err| self.on_error(err))?;
        if !self.store.append_message(&key, message.clone()) {
            debug!(conversation = %key, message_id = %message.id, "sync: sent message not appended");
        }
        Ok(Some(message))
    }

    /// Loads replies and opens the thread. Returns `false` without calling
    /// out when the selection is a chat or the message is not listed.
    pub async fn open_thread(&self, message_id: &MessageId) -> Result<bool> {
        let Some(key) = self.store.read(|state| {
            state
                .selection
                .as_ref()
                .filter(|selection| selection.is_channel())
                .filter(|_| state.message(message_id).is_some())
                .map(ConversationRef::key)
        }) else {
            return Ok(false);
        };
        let ConversationKey::Channel {
            team_id,
            channel_id,
        } = &key
        else {
            return Ok(false);
        };
        let replies = self
            .operations
            .message_replies(team_id, channel_id, message_id)
            .await
            .map_err(|err| self.on_error(err))?;
        Ok(self.store.open_thread(&key, message_id, replies))
    }

    pub fn close_thread(&self) -> bool {
        self.store.close_thread()
    }

    /// Replies in the open thread. Without an open thread nothing is sent.
    pub async fn send_reply(&self, content: &str) -> Result<Option<ChatMessage>> {
        let Some(thread) = self.store.thread() else {
            return Ok(None);
        };
        let reply = self
            .operations
            .reply_to_message(
                &thread.team_id,
                &thread.channel_id,
                &thread.parent_message_id,
                content,
            )
            .await
            .map_err(|err| self.on_error(err))?;
        if !self.store.add_reply(&thread.parent_message_id, reply.clone()) {
            debug!(message_id = %thread.parent_message_id, "sync: thread closed before reply landed");
        }
        Ok(Some(reply))
    }

    /// Publishes the user's own availability and refreshes their record.
    pub async fn set_presence_status(&self, availability: Availability, activity: &str) -> Result<()> {
        self.operations
            .set_my_presence(availability, activity)
            .await
            .map_err(|err| self.on_error(err))?;
        let me = self.store.read(|state| state.current_user.as_ref().map(|user| user.id.clone()));
        if let Some(me) = me {
            match self.operations.presence(&me).await {
                Ok(presence) => {
                    self.store.merge_presence(vec![presence]);
                }
                Err(err) => {
                    let err = self.on_error(err);
                    warn!(error = %redact(&err.to_string()), "presence: own status refresh failed");
                }
            }
        }
        Ok(())
    }

    pub async fn search_messages(&self, query: &str) -> Result<Vec<ChatMessage>> {
        self.operations
            .search_messages(query)
            .await
            .map_err(|err| self.on_error(err))
    }

    pub fn toggle_team_expanded(&self, team_id: &TeamId) -> bool {
        self.store.toggle_team_expanded(team_id)
    }

    pub fn toggle_sidebar(&self) -> bool {
        self.store.toggle_sidebar()
    }

    pub fn toggle_dark_mode(&self) -> bool {
        self.store.toggle_dark_mode()
    }

    /// Stops background tasks without touching the store.
    pub fn shutdown(&self) {
        self.stop_background();
        debug!("sync: background tasks stopped");
    }

    fn stop_background(&self) {
        self.poller.stop();
        self.presence.stop();
    }

    fn on_error(&self, err: ClientError) -> ClientError {
        if err.is_auth_expired() {
            info!("session: access token unavailable, ending session");
            self.stop_background();
            self.context.reset();
            self.store.end_session(Some(err.to_string()));
        }
        err
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.stop_background();
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
