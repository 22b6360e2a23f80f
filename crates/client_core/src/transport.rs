use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, RETRY_AFTER},
    Method, RequestBuilder, Response,
};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{ChannelId, ChatId, MessageId, TeamId, UserId},
    error::RemoteErrorEnvelope,
    protocol::{
        Channel, Chat, ChatMessage, Collection, ItemBody, PostMessageRequest, Presence,
        PresenceBatchRequest, SearchEnvelope, SearchResponse, SetPresenceRequest, Team, User,
    },
};

use crate::{
    context::ClientContext,
    error::{ApiError, Result},
    operations::GraphApi,
};

const USER_FIELDS: &str = "id,displayName,mail,userPrincipalName,givenName,surname,jobTitle";
const TEAM_FIELDS: &str = "id,displayName,description,isArchived";
const CHANNEL_FIELDS: &str = "id,displayName,description,membershipType,webUrl";
const CHAT_FIELDS: &str = "id,chatType,topic,lastUpdatedDateTime";

/// [`GraphApi`] over HTTPS with bearer tokens from the [`ClientContext`].
pub struct HttpGraphApi {
    context: Arc<ClientContext>,
}

impl HttpGraphApi {
    pub fn new(context: Arc<ClientContext>) -> Self {
        Self { context }
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.context.access_token().await?;
        let http = self.context.http()?;
        Ok(http.request(method, self.context.url(path)).bearer_auth(token))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let request = self.request(Method::GET, path).await?.query(query);
        decode(send(request).await?).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, path).await?.json(body);
        decode(send(request).await?).await
    }

    async fn post_message(&self, path: &str, body: &ItemBody) -> Result<ChatMessage> {
        let request = PostMessageRequest { body: body.clone() };
        self.post_json(path, &request).await
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|err| ApiError::network(err.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    let message = RemoteErrorEnvelope::message_from_body(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    Err(ApiError::with_status(status.as_u16(), message)
        .with_retry_after(retry_after)
        .into())
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status().as_u16();
    response
        .json::<T>()
        .await
        .map_err(|err| ApiError::with_status(status, format!("invalid response body: {err}")).into())
}

/// `Retry-After` in whole seconds; HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn top(value: u32) -> (&'static str, String) {
    ("$top", value.to_string())
}

fn select(fields: &str) -> (&'static str, String) {
    ("$select", fields.to_string())
}

#[async_trait]
impl GraphApi for HttpGraphApi {
    async fn current_user(&self) -> Result<User> {
        self.get_json("me", &[select(USER_FIELDS)]).await
    }

    async fn joined_teams(&self) -> Result<Vec<Team>> {
        let teams: Collection<Team> = self
            .get_json("me/joinedTeams", &[select(TEAM_FIELDS)])
            .await?;
        Ok(teams.value)
    }

    async fn team_channels(&self, team_id: &TeamId) -> Result<Vec<Channel>> {
        let channels: Collection<Channel> = self
            .get_json(&format!("teams/{team_id}/channels"), &[select(CHANNEL_FIELDS)])
            .await?;
        Ok(channels.value)
    }

    async fn channel_messages(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        page: u32,
    ) -> Result<Vec<ChatMessage>> {
        let messages: Collection<ChatMessage> = self
            .get_json(
                &format!("teams/{team_id}/channels/{channel_id}/messages"),
                &[top(page)],
            )
            .await?;
        Ok(messages.value)
    }

    async fn message_replies(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<Vec<ChatMessage>> {
        let replies: Collection<ChatMessage> = self
            .get_json(
                &format!("teams/{team_id}/channels/{channel_id}/messages/{message_id}/replies"),
                &[],
            )
            .await?;
        Ok(replies.value)
    }

    async fn send_channel_message(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        body: &ItemBody,
    ) -> Result<ChatMessage> {
        self.post_message(&format!("teams/{team_id}/channels/{channel_id}/messages"), body)
            .await
    }

    async fn reply_to_message(
        &self,
        team_id: &TeamId,
        channel_id: &ChannelId,
        message_id: &MessageId,
        body: &ItemBody,
    ) -> Result<ChatMessage> {
        self.post_message(
            &format!("teams/{team_id}/channels/{channel_id}/messages/{message_id}/replies"),
            body,
        )
        .await
    }

    async fn chats(&self, page: u32) -> Result<Vec<Chat>> {
        let chats: Collection<Chat> = self
            .get_json(
                "me/chats",
                &[
                    ("$expand", "members".to_string()),
                    select(CHAT_FIELDS),
                    top(page),
                ],
            )
            .await?;
        Ok(chats.value)
    }

    async fn chat_messages(&self, chat_id: &ChatId, page: u32) -> Result<Vec<ChatMessage>> {
        let messages: Collection<ChatMessage> = self
            .get_json(&format!("me/chats/{chat_id}/messages"), &[top(page)])
            .await?;
        Ok(messages.value)
    }

    async fn send_chat_message(&self, chat_id: &ChatId, body: &ItemBody) -> Result<ChatMessage> {
        self.post_message(&format!("me/chats/{chat_id}/messages"), body)
            .await
    }

    async fn presence(&self, user_id: &UserId) -> Result<Presence> {
        self.get_json(&format!("users/{user_id}/presence"), &[]).await
    }

    async fn presences_by_user_id(&self, user_ids: &[UserId]) -> Result<Vec<Presence>> {
        let request = PresenceBatchRequest {
            ids: user_ids.to_vec(),
        };
        let presences: Collection<Presence> = self
            .post_json("communications/getPresencesByUserId", &request)
            .await?;
        Ok(presences.value)
    }

    async fn set_my_presence(&self, request: &SetPresenceRequest) -> Result<()> {
        let request = self
            .request(Method::POST, "me/presence/setPresence")
            .await?
            .json(request);
        send(request).await?;
        Ok(())
    }

    async fn search_messages(&self, query: &str, size: u32) -> Result<Vec<ChatMessage>> {
        let request = SearchEnvelope::chat_messages(query, size);
        let response: Collection<SearchResponse> = self.post_json("search/query", &request).await?;
        Ok(response.into_messages())
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
