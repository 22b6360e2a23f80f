use std::{
    collections::{BTreeSet, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shared::{
    domain::{Availability, ChannelId, ConversationKey, ConversationRef, MessageId, TeamId, UserId},
    protocol::{Channel, Chat, ChatMessage, Presence, Team, TeamWithChannels, User},
};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Which slice of [`AppState`] a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreEvent {
    Session,
    Conversations,
    Chats,
    Selection,
    Messages,
    Thread,
    Presence,
    Preferences,
    /// A loading flag flipped; content is unchanged.
    Loading,
}

impl StoreEvent {
    fn is_content(self) -> bool {
        !matches!(self, Self::Loading)
    }
}

const SESSION_EVENTS: &[StoreEvent] = &[
    StoreEvent::Session,
    StoreEvent::Conversations,
    StoreEvent::Chats,
    StoreEvent::Selection,
    StoreEvent::Messages,
    StoreEvent::Thread,
    StoreEvent::Presence,
    StoreEvent::Loading,
];
const SELECTION_EVENTS: &[StoreEvent] = &[
    StoreEvent::Selection,
    StoreEvent::Messages,
    StoreEvent::Thread,
];
const REPLY_EVENTS: &[StoreEvent] = &[StoreEvent::Thread, StoreEvent::Messages];

/// A thread view rooted at one channel message. `parent` is a copy of the
/// root message with its replies merged in.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenThread {
    pub team_id: TeamId,
    pub channel_id: ChannelId,
    pub parent_message_id: MessageId,
    pub parent: ChatMessage,
}

impl OpenThread {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::Channel {
            team_id: self.team_id.clone(),
            channel_id: self.channel_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub availability: Availability,
    pub activity: String,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    pub fn unknown(user_id: UserId) -> Self {
        Self {
            user_id,
            availability: Availability::Unknown,
            activity: String::new(),
            last_refreshed: None,
        }
    }
}

/// Outcome of reconciling one poll result against the stored list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The conversation is no longer selected; nothing was written.
    Stale,
    /// Same length and same last id; the stored list was kept.
    Unchanged,
    Replaced,
}

/// Anything a transition returns that can say whether state changed.
pub trait Changed {
    fn changed(&self) -> bool;
}

impl Changed for bool {
    fn changed(&self) -> bool {
        *self
    }
}

impl Changed for PollOutcome {
    fn changed(&self) -> bool {
        matches!(self, Self::Replaced)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub current_user: Option<User>,
    pub auth_error: Option<String>,
    pub teams: Vec<TeamWithChannels>,
    pub teams_loading: bool,
    pub chats: Vec<Chat>,
    pub chats_loading: bool,
    pub selection: Option<ConversationRef>,
    pub messages: Vec<ChatMessage>,
    pub messages_loading: bool,
    pub thread: Option<OpenThread>,
    pub presence: HashMap<UserId, PresenceRecord>,
    pub sidebar_collapsed: bool,
    pub dark_mode: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            is_authenticated: false,
            is_loading: false,
            current_user: None,
            auth_error: None,
            teams: Vec::new(),
            teams_loading: false,
            chats: Vec::new(),
            chats_loading: false,
            selection: None,
            messages: Vec::new(),
            messages_loading: false,
            thread: None,
            presence: HashMap::new(),
            sidebar_collapsed: false,
            dark_mode: true,
        }
    }
}

// Read accessors.
impl AppState {
    pub fn selected_key(&self) -> Option<ConversationKey> {
        self.selection.as_ref().map(ConversationRef::key)
    }

    pub fn is_selected(&self, key: &ConversationKey) -> bool {
        self.selected_key().as_ref() == Some(key)
    }

    pub fn thread_is_open(&self) -> bool {
        self.thread.is_some()
    }

    pub fn presence_for(&self, user_id: &UserId) -> PresenceRecord {
        self.presence
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| PresenceRecord::unknown(user_id.clone()))
    }

    /// Distinct authors of the messages currently on screen.
    pub fn message_author_ids(&self) -> BTreeSet<UserId> {
        self.messages
            .iter()
            .filter_map(ChatMessage::author_id)
            .cloned()
            .collect()
    }

    pub fn message(&self, message_id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| &message.id == message_id)
    }
}

// Transitions. Each returns whether anything changed.
impl AppState {
    pub fn begin_session(&mut self, user: User) -> bool {
        self.is_authenticated = true;
        self.is_loading = false;
        self.auth_error = None;
        self.current_user = Some(user);
        true
    }

    /// Back to the signed-out initial state. UI preferences survive.
    pub fn end_session(&mut self, auth_error: Option<String>) -> bool {
        let next = Self {
            auth_error,
            sidebar_collapsed: self.sidebar_collapsed,
            dark_mode: self.dark_mode,
            ..Self::default()
        };
        if *self == next {
            return false;
        }
        *self = next;
        true
    }

    pub fn set_auth_loading(&mut self, loading: bool) -> bool {
        replace_flag(&mut self.is_loading, loading)
    }

    pub fn set_auth_error(&mut self, error: Option<String>) -> bool {
        if self.auth_error == error {
            return false;
        }
        self.auth_error = error;
        true
    }

    /// Installs a fresh team list, keeping each known team's expansion flag.
    pub fn set_teams(&mut self, teams: Vec<(Team, Vec<Channel>)>) -> bool {
        let next = teams
            .into_iter()
            .map(|(team, channels)| {
                let is_expanded = self
                    .teams
                    .iter()
                    .find(|existing| existing.team.id == team.id)
                    .map_or(true, |existing| existing.is_expanded);
                TeamWithChannels {
                    team,
                    channels,
                    is_expanded,
                }
            })
            .collect::<Vec<_>>();
        if self.teams == next {
            return false;
        }
        self.teams = next;
        true
    }

    pub fn set_teams_loading(&mut self, loading: bool) -> bool {
        replace_flag(&mut self.teams_loading, loading)
    }

    pub fn toggle_team_expanded(&mut self, team_id: &TeamId) -> bool {
        match self.teams.iter_mut().find(|entry| &entry.team.id == team_id) {
            Some(entry) => {
                entry.is_expanded = !entry.is_expanded;
                true
            }
            None => false,
        }
    }

    pub fn set_chats(&mut self, chats: Vec<Chat>) -> bool {
        if self.chats == chats {
            return false;
        }
        self.chats = chats;
        true
    }

    pub fn set_chats_loading(&mut self, loading: bool) -> bool {
        replace_flag(&mut self.chats_loading, loading)
    }

    /// Always clears the message list and the thread, even when `selection`
    /// repeats the current one.
    pub fn select_conversation(&mut self, selection: Option<ConversationRef>) -> bool {
        self.selection = selection;
        self.messages.clear();
        self.messages_loading = false;
        self.thread = None;
        true
    }

    pub fn set_messages_loading(&mut self, key: &ConversationKey, loading: bool) -> bool {
        self.is_selected(key) && replace_flag(&mut self.messages_loading, loading)
    }

    /// Initial load for `key`; dropped if the selection moved on meanwhile.
    pub fn replace_messages(&mut self, key: &ConversationKey, messages: Vec<ChatMessage>) -> bool {
        if !self.is_selected(key) || self.messages == messages {
            return false;
        }
        self.messages = messages;
        true
    }

    /// Coarse poll reconciliation: equal length and equal last id count as
    /// unchanged. Edits that keep both are not detected.
    pub fn reconcile_poll(&mut self, key: &ConversationKey, fetched: Vec<ChatMessage>) -> PollOutcome {
        if !self.is_selected(key) {
            return PollOutcome::Stale;
        }
        let last_id = |messages: &[ChatMessage]| messages.last().map(|message| message.id.clone());
        if fetched.len() == self.messages.len() && last_id(&fetched) == last_id(&self.messages) {
            return PollOutcome::Unchanged;
        }
        self.messages = fetched;
        PollOutcome::Replaced
    }

    /// Appends a message returned by the server, keeping creation order.
    pub fn append_message(&mut self, key: &ConversationKey, message: ChatMessage) -> bool {
        if !self.is_selected(key) || self.message(&message.id).is_some() {
            return false;
        }
        let at = self
            .messages
            .partition_point(|existing| existing.created_at() <= message.created_at());
        self.messages.insert(at, message);
        true
    }

    /// Opens a thread on a message of the selected channel. Chats have no
    /// threads, and the parent must still be in the list.
    pub fn open_thread(
        &mut self,
        key: &ConversationKey,
        parent_message_id: &MessageId,
        replies: Vec<ChatMessage>,
    ) -> bool {
        let ConversationKey::Channel {
            team_id,
            channel_id,
        } = key
        else {
            return false;
        };
        if !self.is_selected(key) {
            return false;
        }
        let Some(parent) = self.message(parent_message_id) else {
            return false;
        };
        let parent = with_replies(parent, replies);
        self.thread = Some(OpenThread {
            team_id: team_id.clone(),
            channel_id: channel_id.clone(),
            parent_message_id: parent_message_id.clone(),
            parent,
        });
        true
    }

    pub fn close_thread(&mut self) -> bool {
        self.thread.take().is_some()
    }

    /// Merges a posted reply into the thread's parent copy and into the
    /// matching entry of the main list.
    pub fn add_reply(&mut self, parent_message_id: &MessageId, reply: ChatMessage) -> bool {
        let Some(thread) = self
            .thread
            .as_mut()
            .filter(|thread| &thread.parent_message_id == parent_message_id)
        else {
            return false;
        };
        thread.parent = with_reply(&thread.parent, reply.clone());
        if let Some(entry) = self
            .messages
            .iter_mut()
            .find(|message| &message.id == parent_message_id)
        {
            *entry = with_reply(entry, reply);
        }
        true
    }

    /// Later results overwrite earlier ones per user; nothing is removed.
    /// Results that land after sign-out are dropped.
    pub fn merge_presence(&mut self, presences: Vec<Presence>, refreshed_at: DateTime<Utc>) -> bool {
        if !self.is_authenticated {
            return false;
        }
        let mut changed = false;
        for presence in presences {
            let record = PresenceRecord {
                user_id: presence.id.clone(),
                availability: presence.availability,
                activity: presence.activity,
                last_refreshed: Some(refreshed_at),
            };
            changed |= self.presence.insert(presence.id, record.clone()).as_ref() != Some(&record);
        }
        changed
    }

    pub fn toggle_sidebar(&mut self) -> bool {
        self.sidebar_collapsed = !self.sidebar_collapsed;
        true
    }

    pub fn toggle_dark_mode(&mut self) -> bool {
        self.dark_mode = !self.dark_mode;
        true
    }
}

fn replace_flag(flag: &mut bool, value: bool) -> bool {
    std::mem::replace(flag, value) != value
}

/// Copy of `parent` carrying exactly `replies`.
pub fn with_replies(parent: &ChatMessage, replies: Vec<ChatMessage>) -> ChatMessage {
    let mut merged = parent.clone();
    merged.reply_count = merged.reply_count.max(replies.len() as u32);
    merged.replies = replies;
    merged
}

/// Copy of `parent` with `reply` appended, unless it is already there.
pub fn with_reply(parent: &ChatMessage, reply: ChatMessage) -> ChatMessage {
    let mut merged = parent.clone();
    if merged.replies.iter().all(|existing| existing.id != reply.id) {
        merged.replies.push(reply);
        merged.reply_count = merged.reply_count.saturating_add(1);
    }
    merged
}

/// Single owner of client state. Every mutation goes through [`Store::apply`],
/// which bumps the content version and broadcasts the touched slices only
/// when the transition reports a change.
pub struct Store {
    state: RwLock<AppState>,
    version: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(AppState::default()),
            version: AtomicU64::new(0),
            events,
        }
    }

    pub fn snapshot(&self) -> AppState {
        self.state.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.state.read())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn apply<R: Changed>(&self, events: &[StoreEvent], f: impl FnOnce(&mut AppState) -> R) -> R {
        let mut state = self.state.write();
        let outcome = f(&mut state);
        if outcome.changed() {
            if events.iter().any(|event| event.is_content()) {
                self.version.fetch_add(1, Ordering::SeqCst);
            }
            for event in events {
                // No receivers is fine.
                let _ = self.events.send(*event);
            }
        }
        outcome
    }

    pub fn is_authenticated(&self) -> bool {
        self.read(|state| state.is_authenticated)
    }

    pub fn selected_key(&self) -> Option<ConversationKey> {
        self.read(AppState::selected_key)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.read(|state| state.messages.clone())
    }

    pub fn thread(&self) -> Option<OpenThread> {
        self.read(|state| state.thread.clone())
    }

    pub fn presence_for(&self, user_id: &UserId) -> PresenceRecord {
        self.read(|state| state.presence_for(user_id))
    }

    pub fn message_author_ids(&self) -> BTreeSet<UserId> {
        self.read(AppState::message_author_ids)
    }

    pub fn begin_session(&self, user: User) -> bool {
        self.apply(&[StoreEvent::Session], |state| state.begin_session(user))
    }

    pub fn end_session(&self, auth_error: Option<String>) -> bool {
        self.apply(SESSION_EVENTS, |state| state.end_session(auth_error))
    }

    pub fn set_auth_loading(&self, loading: bool) -> bool {
        self.apply(&[StoreEvent::Loading], |state| state.set_auth_loading(loading))
    }

    pub fn set_auth_error(&self, error: Option<String>) -> bool {
        self.apply(&[StoreEvent::Session], |state| state.set_auth_error(error))
    }

    pub fn set_teams(&self, teams: Vec<(Team, Vec<Channel>)>) -> bool {
        self.apply(&[StoreEvent::Conversations], |state| state.set_teams(teams))
    }

    pub fn set_teams_loading(&self, loading: bool) -> bool {
        self.apply(&[StoreEvent::Loading], |state| state.set_teams_loading(loading))
    }

    pub fn toggle_team_expanded(&self, team_id: &TeamId) -> bool {
        self.apply(&[StoreEvent::Conversations], |state| {
            state.toggle_team_expanded(team_id)
        })
    }

    pub fn set_chats(&self, chats: Vec<Chat>) -> bool {
        self.apply(&[StoreEvent::Chats], |state| state.set_chats(chats))
    }

    pub fn set_chats_loading(&self, loading: bool) -> bool {
        self.apply(&[StoreEvent::Loading], |state| state.set_chats_loading(loading))
    }

    pub fn select_conversation(&self, selection: Option<ConversationRef>) -> bool {
        self.apply(SELECTION_EVENTS, |state| state.select_conversation(selection))
    }

    pub fn set_messages_loading(&self, key: &ConversationKey, loading: bool) -> bool {
        self.apply(&[StoreEvent::Loading], |state| {
            state.set_messages_loading(key, loading)
        })
    }

    pub fn replace_messages(&self, key: &ConversationKey, messages: Vec<ChatMessage>) -> bool {
        self.apply(&[StoreEvent::Messages], |state| {
            state.replace_messages(key, messages)
        })
    }

    pub fn reconcile_poll(&self, key: &ConversationKey, fetched: Vec<ChatMessage>) -> PollOutcome {
        self.apply(&[StoreEvent::Messages], |state| state.reconcile_poll(key, fetched))
    }

    pub fn append_message(&self, key: &ConversationKey, message: ChatMessage) -> bool {
        self.apply(&[StoreEvent::Messages], |state| state.append_message(key, message))
    }

    pub fn open_thread(
        &self,
        key: &ConversationKey,
        parent_message_id: &MessageId,
        replies: Vec<ChatMessage>,
    ) -> bool {
        self.apply(&[StoreEvent::Thread], |state| {
            state.open_thread(key, parent_message_id, replies)
        })
    }

    pub fn close_thread(&self) -> bool {
        self.apply(&[StoreEvent::Thread], AppState::close_thread)
    }

    pub fn add_reply(&self, parent_message_id: &MessageId, reply: ChatMessage) -> bool {
        self.apply(REPLY_EVENTS, |state| state.add_reply(parent_message_id, reply))
    }

    pub fn merge_presence(&self, presences: Vec<Presence>) -> bool {
        let now = Utc::now();
        self.apply(&[StoreEvent::Presence], |state| {
            state.merge_presence(presences, now)
        })
    }

    pub fn toggle_sidebar(&self) -> bool {
        self.apply(&[StoreEvent::Preferences], AppState::toggle_sidebar)
    }

    pub fn toggle_dark_mode(&self) -> bool {
        self.apply(&[StoreEvent::Preferences], AppState::toggle_dark_mode)
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
