use super::*;
use crate::{
    error::{ApiError, ClientError},
    test_support::{chat, message, operations_over, FakeGraph, TEAM_A, U1, U2},
};

#[tokio::test(start_paused = true)]
async fn invalid_ids_fail_before_any_call() {
    let fake = FakeGraph::new();
    let ops = operations_over(fake.clone());

    let err = ops
        .channel_messages(&TeamId::new("not-a-guid"), &ChannelId::new("19:general"))
        .await
        .expect_err("team id must be a GUID");
    assert!(matches!(err, ClientError::Validation(ValidationError::NotGuid { .. })));

    let err = ops
        .send_chat_message(&ChatId::new("../etc"), "hi")
        .await
        .expect_err("traversal rejected");
    assert!(matches!(err, ClientError::Validation(_)));

    assert_eq!(fake.calls("getChannelMessages"), 0);
    assert_eq!(fake.calls("sendChatMessage"), 0);
}

#[tokio::test(start_paused = true)]
async fn blank_message_content_is_rejected_locally() {
    let fake = FakeGraph::new();
    let ops = operations_over(fake.clone());

    let err = ops
        .send_channel_message(&TeamId::new(TEAM_A), &ChannelId::new("19:general"), "   ")
        .await
        .expect_err("blank body");
    assert!(matches!(
        err,
        ClientError::Validation(ValidationError::Empty { field: "message" })
    ));
    assert_eq!(fake.calls("sendChannelMessage"), 0);
}

#[tokio::test(start_paused = true)]
async fn channel_messages_are_sorted_and_deduplicated() {
    let fake = FakeGraph::new();
    let team_id = TeamId::new(TEAM_A);
    let channel_id = ChannelId::new("19:general");
    let mut undated = message("m0", 0, U1);
    undated.created_date_time = None;
    fake.set_messages(
        ConversationKey::Channel {
            team_id: team_id.clone(),
            channel_id: channel_id.clone(),
        },
        vec![
            message("m3", 30, U1),
            message("m1", 10, U2),
            message("m3", 31, U2),
            undated,
            message("m2", 20, U1),
        ],
    );

    let messages = operations_over(fake)
        .channel_messages(&team_id, &channel_id)
        .await
        .expect("messages");
    let ids = messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["m0", "m1", "m2", "m3"]);
    assert_eq!(messages[3].created_date_time, Some(crate::test_support::at(30)));
}

#[tokio::test(start_paused = true)]
async fn chats_are_most_recent_first() {
    let fake = FakeGraph::new();
    *fake.chats.lock() = vec![chat("19:old", 0), chat("19:new", 50), chat("19:mid", 20)];

    let chats = operations_over(fake).chats().await.expect("chats");
    let ids = chats.iter().map(|c| c.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["19:new", "19:mid", "19:old"]);
}

#[tokio::test(start_paused = true)]
async fn empty_presence_batch_and_blank_search_skip_the_network() {
    let fake = FakeGraph::new();
    let ops = operations_over(fake.clone());

    assert!(ops.presences(&[]).await.expect("empty").is_empty());
    assert!(ops.search_messages("   ").await.expect("blank").is_empty());
    assert_eq!(fake.calls("getPresencesByUserId"), 0);
    assert_eq!(fake.calls("searchMessages"), 0);
}

#[tokio::test(start_paused = true)]
async fn presence_batch_deduplicates_ids() {
    let fake = FakeGraph::new();
    fake.set_presence(U1, Availability::Busy);
    let ops = operations_over(fake.clone());

    let presences = ops
        .presences(&[UserId::new(U1), UserId::new(U2), UserId::new(U1)])
        .await
        .expect("presences");
    assert_eq!(presences.len(), 1);
    assert_eq!(
        fake.presence_batches.lock().clone(),
        vec![vec![UserId::new(U1), UserId::new(U2)]]
    );
}

#[tokio::test(start_paused = true)]
async fn set_presence_uses_session_id_and_one_hour_expiry() {
    let fake = FakeGraph::new();
    operations_over(fake.clone())
        .set_my_presence(Availability::DoNotDisturb, "Presenting")
        .await
        .expect("set presence");

    let updates = fake.presence_updates.lock().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].session_id, "slackteams");
    assert_eq!(updates[0].expiration_duration, "PT1H");
    assert_eq!(updates[0].availability, Availability::DoNotDisturb);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_through_the_operation() {
    let fake = FakeGraph::new();
    fake.fail_next("getChats", ApiError::with_status(503, "busy"));
    fake.fail_next("getChats", ApiError::network("reset"));

    operations_over(fake.clone()).chats().await.expect("recovers");
    assert_eq!(fake.calls("getChats"), 3);
}
