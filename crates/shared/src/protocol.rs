use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Availability, ChannelId, ChatId, ChatType, MessageId, TeamId, UserId};

/// `{"value": [...]}` wrapper the remote service puts around every list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_principal_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: TeamId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
}

/// A joined team together with its channels, as shown in the sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamWithChannels {
    #[serde(flatten)]
    pub team: Team,
    pub channels: Vec<Channel>,
    pub is_expanded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMember {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    #[serde(default)]
    pub chat_type: ChatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub members: Vec<ChatMember>,
}

impl Chat {
    /// Topic if set, otherwise the first names of up to three members.
    pub fn display_name(&self) -> String {
        if let Some(topic) = self.topic.as_deref().filter(|topic| !topic.is_empty()) {
            return topic.to_string();
        }
        let names = self
            .members
            .iter()
            .take(3)
            .filter_map(|member| member.display_name.as_deref())
            .filter_map(|name| name.split_whitespace().next())
            .collect::<Vec<_>>();
        if names.is_empty() {
            "Chat".to_string()
        } else {
            names.join(", ")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyContentType {
    Text,
    #[default]
    Html,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: BodyContentType,
}

impl ItemBody {
    pub fn html(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: BodyContentType::Html,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IdentitySet {
    #[serde(default)]
    pub user: Option<Identity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub reaction_type: String,
    #[serde(default)]
    pub user: Option<Identity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: ItemBody,
    #[serde(default)]
    pub from: Option<IdentitySet>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    /// Only populated while a thread rooted at this message is open.
    #[serde(default)]
    pub replies: Vec<ChatMessage>,
    #[serde(default)]
    pub reply_count: u32,
}

impl ChatMessage {
    pub fn author(&self) -> Option<&Identity> {
        self.from.as_ref().and_then(|from| from.user.as_ref())
    }

    pub fn author_id(&self) -> Option<&UserId> {
        self.author().map(|user| &user.id)
    }

    pub fn author_name(&self) -> Option<&str> {
        self.author().and_then(|user| user.display_name.as_deref())
    }

    /// Messages without a timestamp sort before everything else.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_date_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn reaction_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for reaction in &self.reactions {
            *counts.entry(reaction.reaction_type.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub id: UserId,
    #[serde(default)]
    pub availability: Availability,
    #[serde(default)]
    pub activity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub body: ItemBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceBatchRequest {
    pub ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPresenceRequest {
    pub session_id: String,
    pub availability: Availability,
    pub activity: String,
    pub expiration_duration: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEnvelope {
    pub requests: Vec<SearchRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub entity_types: Vec<String>,
    pub query: SearchQuery,
    pub from: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub query_string: String,
}

impl SearchEnvelope {
    pub fn chat_messages(query: impl Into<String>, size: u32) -> Self {
        Self {
            requests: vec![SearchRequest {
                entity_types: vec!["chatMessage".to_string()],
                query: SearchQuery {
                    query_string: query.into(),
                },
                from: 0,
                size,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub hits_containers: Vec<SearchHitsContainer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHitsContainer {
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub resource: ChatMessage,
}

impl Collection<SearchResponse> {
    /// Hits of the first container of the first response, in order.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.value
            .into_iter()
            .next()
            .and_then(|response| response.hits_containers.into_iter().next())
            .map(|container| container.hits.into_iter().map(|hit| hit.resource).collect())
            .unwrap_or_default()
    }
}
