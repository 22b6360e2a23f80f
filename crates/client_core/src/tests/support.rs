//! In-memory `GraphApi` used by the engine tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use shared::{
    domain::{
        Availability, ChannelId, ChatId, ConversationKey, ConversationRef, MessageId, TeamId,
        UserId,
    },
    protocol::{
        Channel, Chat, ChatMessage, Identity, IdentitySet, ItemBody, Presence, SetPresenceRequest,
        Team, User,
    },
};
use tokio::sync::{Notify, Semaphore};

use crate::{
    config::Settings,
    error::{ClientError, Result},
    operations::{GraphApi, PageSizes, RemoteOperations},
    rate_limit::RateLimiter,
    retry::RetryPolicy,
};

pub const TEAM_A: &str = "11111111-1111-4111-8111-111111111111";
pub const TEAM_B: &str = "22222222-2222-4222-8222-222222222222";
pub const ME: &str = "aaaaaaaa-aaaa-4aaa-8aaa-aaaaaaaaaaaa";
pub const U1: &str = "b1111111-1111-4111-8111-111111111111";
pub const U2: &str = "b2222222-2222-4222-8222-222222222222";
pub const U3: &str = "b3333333-3333-4333-8333-333333333333";

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("valid timestamp")
}

pub fn message(id: &str, seconds: i64, author: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId::new(id),
        created_date_time: Some(at(seconds)),
        last_modified_date_time: None,
        body: ItemBody::html(format!("body of {id}")),
        from: Some(IdentitySet {
            user: Some(Identity {
                id: UserId::new(author),
                display_name: Some(format!("User {author}")),
            }),
        }),
        attachments: Vec::new(),
        reactions: Vec::new(),
        reply_to_id: None,
        replies: Vec::new(),
        reply_count: 0,
    }
}

pub fn team(id: &str, name: &str) -> Team {
    Team {
        id: TeamId::new(id),
        display_name: name.to_string(),
        description: None,
        is_archived: Some(false),
    }
}

pub fn channel(id: &str, name: &str) -> Channel {
    Channel {
        id: ChannelId::new(id),
        display_name: name.to_string(),
        description: None,
        membership_type: Some("standard".to_string()),
        web_url: None,
    }
}

pub fn chat(id: &str, seconds: i64) -> Chat {
    Chat {
        id: ChatId::new(id),
        chat_type: Default::default(),
        topic: Some(format!("topic {id}")),
        last_updated_date_time: Some(at(seconds)),
        members: Vec::new(),
    }
}

pub fn me() -> User {
    User {
        id: UserId::new(ME),
        display_name: "Me Myself".to_string(),
        mail: Some("me@contoso.com".to_string()),
        user_principal_name: None,
        given_name: Some("Me".to_string()),
        surname: None,
        job_title: None,
    }
}

pub fn channel_ref(team_id: &str, channel_id: &str) -> ConversationRef {
    ConversationRef::channel(team_id, channel_id, format!("#{channel_id}"))
}

pub fn channel_key(team_id: &str, channel_id: &str) -> ConversationKey {
    channel_ref(team_id, channel_id).key()
}

pub fn chat_ref(chat_id: &str) -> ConversationRef {
    ConversationRef::chat(chat_id, format!("chat {chat_id}"))
}

/// Holds a conversation's message fetch until the test lets it through.
pub struct Gate {
    pub entered: Notify,
    release: Semaphore,
}

impl Gate {
    pub fn open(&self) {
        self.release.add_permits(1);
    }
}

#[derive(Default)]
pub struct FakeGraph {
    pub user: Mutex<Option<User>>,
    pub teams: Mutex<Vec<Team>>,
    pub channels: Mutex<HashMap<TeamId, Vec<Channel>>>,
    pub messages: Mutex<HashMap<ConversationKey, Vec<ChatMessage>>>,
    pub replies: Mutex<HashMap<MessageId, Vec<ChatMessage>>>,
    pub chats: Mutex<Vec<Chat>>,
    pub presences: Mutex<HashMap<UserId, Presence>>,
    pub presence_batches: Mutex<Vec<Vec<UserId>>>,
    pub presence_updates: Mutex<Vec<SetPresenceRequest>>,
    pub sent: Mutex<Vec<(ConversationKey, String)>>,
    pub sent_replies: Mutex<Vec<(MessageId, String)>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, VecDeque<ClientError>>>,
    gates: Mutex<HashMap<ConversationKey, Arc<Gate>>>,
    next_id: AtomicU64,
}

impl FakeGraph {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        *fake.user.lock() = Some(me());
        Arc::new(fake)
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    pub fn fail_next(&self, operation: &'static str, err: impl Into<ClientError>) {
        self.failures
            .lock()
            .entry(operation)
            .or_default()
            .push_back(err.into());
    }

    pub fn set_messages(&self, key: ConversationKey, messages: Vec<ChatMessage>) {
        self.messages.lock().insert(key, messages);
    }

    pub fn set_presence(&self, user_id: &str, availability: Availability) {
        self.presences.lock().insert(
            UserId::new(user_id),
            Presence {
                id: UserId::new(user_id),
                availability,
                activity: availability.as_str().to_string(),
            },
        );
    }

    /// The next message fetches for `key` block until [`Gate::open`].
    pub fn gate(&self, key: ConversationKey) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Semaphore::new(0),
        });
        self.gates.lock().insert(key, Arc::clone(&gate));
        gate
    }

    pub fn ungate(&self, key: &ConversationKey) {
        self.gates.lock().remove(key);
    }

    fn record(&self, operation: &'static str) -> Result<()> {
        *self.calls.lock().entry(operation).or_insert(0) += 1;
        match self
            .failures
            .lock()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn pass_gate(&self, key: &ConversationKey) {
        let gate = self.gates.lock().get(key).cloned();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            if let Ok(permit) = gate.release.acquire().await {
                permit.forget();
            }
        }
    }

    fn messages_for(&self, key: &ConversationKey) -> Vec<ChatMessage> {
        self.messages.lock().get(key).cloned().unwrap_or_default()
    }

    fn posted(&self, body: &ItemBody, author: &str) -> ChatMessage {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut posted = message(&format!("sent-{seq}"), 10_000 + seq as i64, author);
        posted.body = body.clone();
        posted
    }
}

#[async_trait]
impl GraphApi for FakeGraph {
    async fn current_user(&self) -> Result<User> {
        self.record("getCurrentUser")?;
        self.user
            .lock()
            .clone()
            .ok_or_else(|| crate::error::ApiError::with_status(404, "no user").into())
    }

    async fn joined_teams(&self) -> Result<Vec<Team>> {
        self.record("getJoinedTeams")?;
        Ok(self.teams.lock().clone())
    }

    async fn team_channels(&self, team_id: &TeamId) -> Result<Vec<Channel>> {
        self.record("getTeamChannels")?;
        Ok(self.channels.lock().get(team_id).cloned().unwrap_or_default())
    }

    async fn channel_messages(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        _top: u32,
    ) -> Result<Vec<ChatMessage>> {
        let key = ConversationKey::Channel {
            team_id: team_id.clone(),
            channel_id: channel_id.clone(),
        };
        self.pass_gate(&key).await;
        self.record("getChannelMessages")?;
        Ok(self.messages_for(&key))
    }

    async fn message_replies(
        &self,
        _team_id: &TeamId,
        _channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<Vec<ChatMessage>> {
        self.record("getMessageReplies")?;
        Ok(self.replies.lock().get(message_id).cloned().unwrap_or_default())
    }

    async fn send_channel_message(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        body: &ItemBody,
    ) -> Result<ChatMessage> {
        self.record("sendChannelMessage")?;
        let key = ConversationKey::Channel {
            team_id: team_id.clone(),
            channel_id: channel_id.clone(),
        };
        self.sent.lock().push((key, body.content.clone()));
        Ok(self.posted(body, ME))
    }

    async fn reply_to_message(
        &self,
        _team_id: &TeamId,
        _channel_id: &ChannelId,
        message_id: &MessageId,
        body: &ItemBody,
    ) -> Result<ChatMessage> {
        self.record("replyToMessage")?;
        self.sent_replies
            .lock()
            .push((message_id.clone(), body.content.clone()));
        let mut reply = self.posted(body, ME);
        reply.reply_to_id = Some(message_id.clone());
        Ok(reply)
    }

    async fn chats(&self, _top: u32) -> Result<Vec<Chat>> {
        self.record("getChats")?;
        Ok(self.chats.lock().clone())
    }

    async fn chat_messages(&self, chat_id: &ChatId, _top: u32) -> Result<Vec<ChatMessage>> {
        let key = ConversationKey::Chat(chat_id.clone());
        self.pass_gate(&key).await;
        self.record("getChatMessages")?;
        Ok(self.messages_for(&key))
    }

    async fn send_chat_message(&self, chat_id: &ChatId, body: &ItemBody) -> Result<ChatMessage> {
        self.record("sendChatMessage")?;
        self.sent
            .lock()
            .push((ConversationKey::Chat(chat_id.clone()), body.content.clone()));
        Ok(self.posted(body, ME))
    }

    async fn presence(&self, user_id: &UserId) -> Result<Presence> {
        self.record("getPresence")?;
        Ok(self.presences.lock().get(user_id).cloned().unwrap_or(Presence {
            id: user_id.clone(),
            availability: Availability::Unknown,
            activity: String::new(),
        }))
    }

    async fn presences_by_user_id(&self, user_ids: &[UserId]) -> Result<Vec<Presence>> {
        self.record("getPresencesByUserId")?;
        self.presence_batches.lock().push(user_ids.to_vec());
        let known = self.presences.lock();
        Ok(user_ids
            .iter()
            .filter_map(|id| known.get(id).cloned())
            .collect())
    }

    async fn set_my_presence(&self, request: &SetPresenceRequest) -> Result<()> {
        self.record("setMyPresence")?;
        self.presence_updates.lock().push(request.clone());
        self.set_presence(ME, request.availability);
        Ok(())
    }

    async fn search_messages(&self, query: &str, _size: u32) -> Result<Vec<ChatMessage>> {
        self.record("searchMessages")?;
        Ok(self
            .messages
            .lock()
            .values()
            .flatten()
            .filter(|message| message.body.content.contains(query))
            .cloned()
            .collect())
    }
}

/// Settings with short timers so paused-clock tests stay fast.
pub fn test_settings() -> Settings {
    Settings {
        graph_base_url: "http://127.0.0.1:1".to_string(),
        poll_interval_ms: 1000,
        presence_refresh_interval_ms: 30_000,
        max_concurrent_requests: 5,
        min_request_interval_ms: 0,
        max_retries: 3,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 40,
        ..Settings::default()
    }
}

pub fn operations_over(api: Arc<FakeGraph>) -> Arc<RemoteOperations> {
    Arc::new(RemoteOperations::new(
        api,
        Arc::new(RateLimiter::new(5, Duration::ZERO)),
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        PageSizes::default(),
        "slackteams",
    ))
}
