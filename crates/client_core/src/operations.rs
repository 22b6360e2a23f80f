use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use shared::{
    domain::{Availability, ChannelId, ChatId, ConversationKey, MessageId, TeamId, UserId},
    protocol::{Channel, Chat, ChatMessage, ItemBody, Presence, SetPresenceRequest, Team, User},
};
use tracing::debug;

use crate::{
    error::{Result, ValidationError},
    rate_limit::RateLimiter,
    retry::RetryPolicy,
    validation::{
        validate_channel_id, validate_chat_id, validate_message_id, validate_team_id,
        validate_user_id,
    },
};

pub const PRESENCE_EXPIRATION: &str = "PT1H";

/// Raw remote calls, one per endpoint. Implementations perform a single
/// attempt and report failures as [`crate::error::ApiError`]; validation,
/// rate limiting and retries are layered on top by [`RemoteOperations`].
#[async_trait]
pub trait GraphApi: Send + Sync {
    async fn current_user(&self) -> Result<User>;
    async fn joined_teams(&self) -> Result<Vec<Team>>;
    async fn team_channels(&self, team_id: &TeamId) -> Result<Vec<Channel>>;
    async fn channel_messages(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        top: u32,
    ) -> Result<Vec<ChatMessage>>;
    async fn message_replies(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<Vec<ChatMessage>>;
    async fn send_channel_message(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        body: &ItemBody,
    ) -> Result<ChatMessage>;
    async fn reply_to_message(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        message_id: &MessageId,
        body: &ItemBody,
    ) -> Result<ChatMessage>;
    async fn chats(&self, top: u32) -> Result<Vec<Chat>>;
    async fn chat_messages(&self, chat_id: &ChatId, top: u32) -> Result<Vec<ChatMessage>>;
    async fn send_chat_message(&self, chat_id: &ChatId, body: &ItemBody) -> Result<ChatMessage>;
    async fn presence(&self, user_id: &UserId) -> Result<Presence>;
    async fn presences_by_user_id(&self, user_ids: &[UserId]) -> Result<Vec<Presence>>;
    async fn set_my_presence(&self, request: &SetPresenceRequest) -> Result<()>;
    async fn search_messages(&self, query: &str, size: u32) -> Result<Vec<ChatMessage>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizes {
    pub messages: u32,
    pub chats: u32,
    pub search: u32,
}

impl Default for PageSizes {
    fn default() -> Self {
        Self {
            messages: 50,
            chats: 50,
            search: 25,
        }
    }
}

/// The named remote operations the engine uses. Every identifier is
/// validated before anything touches the network, and every attempt goes
/// through the shared rate limiter.
pub struct RemoteOperations {
    api: Arc<dyn GraphApi>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    pages: PageSizes,
    presence_session_id: String,
}

impl RemoteOperations {
    pub fn new(
        api: Arc<dyn GraphApi>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        pages: PageSizes,
        presence_session_id: impl Into<String>,
    ) -> Self {
        Self {
            api,
            limiter,
            retry,
            pages,
            presence_session_id: presence_session_id.into(),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn current_user(&self) -> Result<User> {
        self.retry
            .run(&self.limiter, "getCurrentUser", || self.api.current_user())
            .await
    }

    pub async fn joined_teams(&self) -> Result<Vec<Team>> {
        let mut teams = self
            .retry
            .run(&self.limiter, "getJoinedTeams", || self.api.joined_teams())
            .await?;
        dedup_by_key(&mut teams, |team| team.id.clone());
        Ok(teams)
    }

    pub async fn team_channels(&self, team_id: &TeamId) -> Result<Vec<Channel>> {
        let team_id = validate_team_id(team_id)?;
        let mut channels = self
            .retry
            .run(&self.limiter, "getTeamChannels", || {
                self.api.team_channels(&team_id)
            })
            .await?;
        dedup_by_key(&mut channels, |channel| channel.id.clone());
        Ok(channels)
    }

    pub async fn channel_messages(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
    ) -> Result<Vec<ChatMessage>> {
        let team_id = validate_team_id(team_id)?;
        let channel_id = validate_channel_id(channel_id)?;
        let top = self.pages.messages;
        let messages = self
            .retry
            .run(&self.limiter, "getChannelMessages", || {
                self.api.channel_messages(&team_id, &channel_id, top)
            })
            .await?;
        Ok(sort_messages(messages))
    }

    pub async fn message_replies(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<Vec<ChatMessage>> {
        let team_id = validate_team_id(team_id)?;
        let channel_id = validate_channel_id(channel_id)?;
        let message_id = validate_message_id(message_id)?;
        let replies = self
            .retry
            .run(&self.limiter, "getMessageReplies", || {
                self.api.message_replies(&team_id, &channel_id, &message_id)
            })
            .await?;
        Ok(sort_messages(replies))
    }

    pub async fn send_channel_message(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        content: &str,
    ) -> Result<ChatMessage> {
        let team_id = validate_team_id(team_id)?;
        let channel_id = validate_channel_id(channel_id)?;
        let body = message_body(content)?;
        self.retry
            .run(&self.limiter, "sendChannelMessage", || {
                self.api.send_channel_message(&team_id, &channel_id, &body)
            })
            .await
    }

    pub async fn reply_to_message(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        message_id: &MessageId,
        content: &str,
    ) -> Result<ChatMessage> {
        let team_id = validate_team_id(team_id)?;
        let channel_id = validate_channel_id(channel_id)?;
        let message_id = validate_message_id(message_id)?;
        let body = message_body(content)?;
        self.retry
            .run(&self.limiter, "replyToMessage", || {
                self.api
                    .reply_to_message(&team_id, &channel_id, &message_id, &body)
            })
            .await
    }

    /// Most recently active chats first.
    pub async fn chats(&self) -> Result<Vec<Chat>> {
        let top = self.pages.chats;
        let mut chats = self
            .retry
            .run(&self.limiter, "getChats", || self.api.chats(top))
            .await?;
        dedup_by_key(&mut chats, |chat| chat.id.clone());
        chats.sort_by(|a, b| b.last_updated_date_time.cmp(&a.last_updated_date_time));
        Ok(chats)
    }

    pub async fn chat_messages(&self, chat_id: &ChatId) -> Result<Vec<ChatMessage>> {
        let chat_id = validate_chat_id(chat_id)?;
        let top = self.pages.messages;
        let messages = self
            .retry
            .run(&self.limiter, "getChatMessages", || {
                self.api.chat_messages(&chat_id, top)
            })
            .await?;
        Ok(sort_messages(messages))
    }

    pub async fn send_chat_message(&self, chat_id: &ChatId, content: &str) -> Result<ChatMessage> {
        let chat_id = validate_chat_id(chat_id)?;
        let body = message_body(content)?;
        self.retry
            .run(&self.limiter, "sendChatMessage", || {
                self.api.send_chat_message(&chat_id, &body)
            })
            .await
    }

    pub async fn conversation_messages(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>> {
        match key {
            ConversationKey::Channel {
                team_id,
                channel_id,
            } => self.channel_messages(team_id, channel_id).await,
            ConversationKey::Chat(chat_id) => self.chat_messages(chat_id).await,
        }
    }

    pub async fn send_message(&self, key: &ConversationKey, content: &str) -> Result<ChatMessage> {
        match key {
            ConversationKey::Channel {
                team_id,
                channel_id,
            } => self.send_channel_message(team_id, channel_id, content).await,
            ConversationKey::Chat(chat_id) => self.send_chat_message(chat_id, content).await,
        }
    }

    pub async fn presence(&self, user_id: &UserId) -> Result<Presence> {
        let user_id = validate_user_id(user_id)?;
        self.retry
            .run(&self.limiter, "getPresence", || self.api.presence(&user_id))
            .await
    }

    /// One batched lookup. An empty id set never reaches the network.
    pub async fn presences(&self, user_ids: &[UserId]) -> Result<Vec<Presence>> {
        let mut ids = user_ids
            .iter()
            .map(validate_user_id)
            .collect::<Result<Vec<_>, _>>()?;
        dedup_by_key(&mut ids, UserId::clone);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = ids.len(), "operations: batched presence lookup");
        self.retry
            .run(&self.limiter, "getPresencesByUserId", || {
                self.api.presences_by_user_id(&ids)
            })
            .await
    }

    pub async fn set_my_presence(&self, availability: Availability, activity: &str) -> Result<()> {
        let request = SetPresenceRequest {
            session_id: self.presence_session_id.clone(),
            availability,
            activity: activity.to_string(),
            expiration_duration: PRESENCE_EXPIRATION.to_string(),
        };
        self.retry
            .run(&self.limiter, "setMyPresence", || {
                self.api.set_my_presence(&request)
            })
            .await
    }

    pub async fn search_messages(&self, query: &str) -> Result<Vec<ChatMessage>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let size = self.pages.search;
        self.retry
            .run(&self.limiter, "searchMessages", || {
                self.api.search_messages(query, size)
            })
            .await
    }
}

fn message_body(content: &str) -> Result<ItemBody> {
    if content.trim().is_empty() {
        return Err(ValidationError::Empty { field: "message" }.into());
    }
    Ok(ItemBody::html(content))
}

/// Oldest first, undated messages first, first occurrence of an id wins.
pub fn sort_messages(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    dedup_by_key(&mut messages, |message| message.id.clone());
    messages.sort_by_key(ChatMessage::created_at);
    messages
}

fn dedup_by_key<T, K, F>(items: &mut Vec<T>, mut key: F)
where
    K: std::hash::Hash + Eq,
    F: FnMut(&T) -> K,
{
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(key(item)));
}

#[cfg(test)]
#[path = "tests/operations_tests.rs"]
mod tests;
