use std::sync::LazyLock;

use regex::Regex;
use shared::domain::{ChannelId, ChatId, ConversationKey, MessageId, TeamId, UserId};

use crate::error::ValidationError;

pub const MAX_ID_LEN: usize = 500;

static GUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("static regex")
});
static REMOTE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_:@.-]+$").expect("static regex"));

fn checked<'a>(id: &'a str, field: &'static str) -> Result<&'a str, ValidationError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if id.chars().count() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_ID_LEN,
        });
    }
    if id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(ValidationError::InvalidCharacters { field });
    }
    Ok(id)
}

/// Opaque remote identifier: channel, chat and message ids.
pub fn validate_remote_id(id: &str, field: &'static str) -> Result<String, ValidationError> {
    let id = checked(id, field)?;
    if !REMOTE_ID.is_match(id) {
        return Err(ValidationError::InvalidCharacters { field });
    }
    Ok(id.to_string())
}

pub fn validate_guid(id: &str, field: &'static str) -> Result<String, ValidationError> {
    let id = checked(id, field)?;
    if !GUID.is_match(id) {
        return Err(ValidationError::NotGuid { field });
    }
    Ok(id.to_string())
}

pub fn validate_team_id(id: &TeamId) -> Result<TeamId, ValidationError> {
    validate_guid(id.as_str(), "team id").map(TeamId)
}

pub fn validate_user_id(id: &UserId) -> Result<UserId, ValidationError> {
    validate_guid(id.as_str(), "user id").map(UserId)
}

pub fn validate_channel_id(id: &ChannelId) -> Result<ChannelId, ValidationError> {
    validate_remote_id(id.as_str(), "channel id").map(ChannelId)
}

pub fn validate_chat_id(id: &ChatId) -> Result<ChatId, ValidationError> {
    validate_remote_id(id.as_str(), "chat id").map(ChatId)
}

pub fn validate_message_id(id: &MessageId) -> Result<MessageId, ValidationError> {
    validate_remote_id(id.as_str(), "message id").map(MessageId)
}

pub fn validate_conversation_key(key: &ConversationKey) -> Result<ConversationKey, ValidationError> {
    Ok(match key {
        ConversationKey::Channel {
            team_id,
            channel_id,
        } => ConversationKey::Channel {
            team_id: validate_team_id(team_id)?,
            channel_id: validate_channel_id(channel_id)?,
        },
        ConversationKey::Chat(chat_id) => ConversationKey::Chat(validate_chat_id(chat_id)?),
    })
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
