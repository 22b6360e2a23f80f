use super::*;
use crate::{
    auth::{AuthProvider, StaticTokenProvider},
    error::ClientError,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::Availability;
use std::collections::HashMap;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct ServerState {
    authorization: Arc<Mutex<Vec<String>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

async fn remember_auth(state: &ServerState, headers: &HeaderMap) {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        state
            .authorization
            .lock()
            .await
            .push(value.to_str().unwrap_or_default().to_string());
    }
}

async fn handle_channel_messages(
    State(state): State<ServerState>,
    Path((team_id, channel_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    remember_auth(&state, &headers).await;
    state.queries.lock().await.push(query);
    Json(json!({
        "value": [{
            "id": format!("{team_id}|{channel_id}"),
            "createdDateTime": "2024-05-01T10:00:00Z",
            "body": {"content": "<p>hi</p>", "contentType": "html"},
            "from": {"user": {"id": "b1111111-1111-4111-8111-111111111111", "displayName": "Ada Lovelace"}},
            "reactions": [{"reactionType": "like"}, {"reactionType": "like"}, {"reactionType": "heart"}]
        }]
    }))
}

async fn handle_throttled() -> impl IntoResponse {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, "7")],
        Json(json!({"error": {"code": "TooManyRequests", "message": "Slow down"}})),
    )
}

async fn handle_missing() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not json")
}

async fn handle_post_message(
    State(state): State<ServerState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.bodies.lock().await.push(body.clone());
    (
        StatusCode::CREATED,
        Json(json!({
            "id": "new-1",
            "createdDateTime": "2024-05-01T10:05:00Z",
            "body": body["body"].clone()
        })),
    )
}

async fn handle_set_presence(
    State(state): State<ServerState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.bodies.lock().await.push(body);
    StatusCode::OK
}

async fn handle_search(State(state): State<ServerState>, Json(body): Json<Value>) -> impl IntoResponse {
    state.bodies.lock().await.push(body);
    Json(json!({
        "value": [{
            "hitsContainers": [{
                "hits": [
                    {"resource": {"id": "hit-1", "body": {"content": "budget"}}},
                    {"resource": {"id": "hit-2", "body": {"content": "budget v2"}}}
                ]
            }]
        }]
    }))
}

async fn spawn_graph_server() -> anyhow::Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState::default();
    let app = Router::new()
        .route(
            "/teams/:team_id/channels/:channel_id/messages",
            get(handle_channel_messages).post(handle_post_message),
        )
        .route("/me/chats", get(handle_throttled))
        .route("/me/joinedTeams", get(handle_missing))
        .route("/me/presence/setPresence", post(handle_set_presence))
        .route("/search/query", post(handle_search))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/"), state))
}

fn api_for(base_url: &str, provider: Arc<StaticTokenProvider>) -> (HttpGraphApi, Arc<ClientContext>) {
    let context = Arc::new(ClientContext::new(provider, base_url, Duration::from_secs(5)));
    (HttpGraphApi::new(Arc::clone(&context)), context)
}

#[tokio::test]
async fn get_sends_bearer_token_and_page_size() {
    let (base_url, state) = spawn_graph_server().await.expect("spawn server");
    let (api, _context) = api_for(&base_url, Arc::new(StaticTokenProvider::new("secret-token")));

    let messages = api
        .channel_messages(&TeamId::new("team-1"), &ChannelId::new("19:general"), 20)
        .await
        .expect("messages");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id.as_str(), "team-1|19:general");
    assert_eq!(messages[0].author_name(), Some("Ada Lovelace"));
    let counts = messages[0].reaction_counts();
    assert_eq!(counts.get("like"), Some(&2));
    assert_eq!(counts.get("heart"), Some(&1));

    assert_eq!(
        state.authorization.lock().await.clone(),
        vec!["Bearer secret-token".to_string()]
    );
    assert_eq!(
        state.queries.lock().await[0].get("$top").map(String::as_str),
        Some("20")
    );
}

#[tokio::test]
async fn throttled_response_carries_status_retry_after_and_message() {
    let (base_url, _state) = spawn_graph_server().await.expect("spawn server");
    let (api, _context) = api_for(&base_url, Arc::new(StaticTokenProvider::new("t")));

    let err = api.chats(50).await.expect_err("throttled");
    match err {
        ClientError::Api(api_err) => {
            assert_eq!(api_err.status, Some(429));
            assert_eq!(api_err.retry_after, Some(Duration::from_secs(7)));
            assert_eq!(api_err.message, "Slow down");
            assert!(api_err.is_retryable);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn non_json_error_body_falls_back_to_status_reason() {
    let (base_url, _state) = spawn_graph_server().await.expect("spawn server");
    let (api, _context) = api_for(&base_url, Arc::new(StaticTokenProvider::new("t")));

    let err = api.joined_teams().await.expect_err("missing");
    assert_eq!(err.status(), Some(404));
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("Not Found"));
}

#[tokio::test]
async fn posting_a_message_sends_an_html_body() {
    let (base_url, state) = spawn_graph_server().await.expect("spawn server");
    let (api, _context) = api_for(&base_url, Arc::new(StaticTokenProvider::new("t")));

    let sent = api
        .send_channel_message(
            &TeamId::new("team-1"),
            &ChannelId::new("19:general"),
            &ItemBody::html("<b>hello</b>"),
        )
        .await
        .expect("sent");

    assert_eq!(sent.id.as_str(), "new-1");
    assert_eq!(
        state.bodies.lock().await[0],
        json!({"body": {"content": "<b>hello</b>", "contentType": "html"}})
    );
}

#[tokio::test]
async fn set_presence_accepts_an_empty_response() {
    let (base_url, state) = spawn_graph_server().await.expect("spawn server");
    let (api, _context) = api_for(&base_url, Arc::new(StaticTokenProvider::new("t")));

    api.set_my_presence(&SetPresenceRequest {
        session_id: "slackteams".into(),
        availability: Availability::BeRightBack,
        activity: "BeRightBack".into(),
        expiration_duration: "PT1H".into(),
    })
    .await
    .expect("presence set");

    assert_eq!(
        state.bodies.lock().await[0],
        json!({
            "sessionId": "slackteams",
            "availability": "BeRightBack",
            "activity": "BeRightBack",
            "expirationDuration": "PT1H"
        })
    );
}

#[tokio::test]
async fn search_flattens_hits_into_messages() {
    let (base_url, state) = spawn_graph_server().await.expect("spawn server");
    let (api, _context) = api_for(&base_url, Arc::new(StaticTokenProvider::new("t")));

    let hits = api.search_messages("budget", 25).await.expect("search");
    let ids = hits.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["hit-1", "hit-2"]);
    assert_eq!(
        state.bodies.lock().await[0]["requests"][0]["entityTypes"],
        json!(["chatMessage"])
    );
}

#[tokio::test]
async fn missing_token_resets_context_without_a_request() {
    let (base_url, state) = spawn_graph_server().await.expect("spawn server");
    let provider = Arc::new(StaticTokenProvider::new("t"));
    let (api, context) = api_for(&base_url, Arc::clone(&provider));

    api.channel_messages(&TeamId::new("team-1"), &ChannelId::new("19:general"), 5)
        .await
        .expect("first call");
    assert!(context.is_initialized());

    provider.sign_out().await.expect("sign out");
    let err = api
        .channel_messages(&TeamId::new("team-1"), &ChannelId::new("19:general"), 5)
        .await
        .expect_err("no token");

    assert!(err.is_auth_expired());
    assert!(!context.is_initialized());
    assert_eq!(state.authorization.lock().await.len(), 1);
}
