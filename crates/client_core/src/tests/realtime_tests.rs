use super::*;

use serde_json::json;
use shared::{
    domain::{ThreadKey, UserId},
    protocol::DeltaEvent,
};

use crate::mock_service::{
    eventually, mock_cookies, spawn_mock_service, MockState, MOCK_SYNC_TOKEN, MOCK_USER_ID,
};

struct Harness {
    session: Arc<Session>,
    channel: RealtimeChannel,
    events: mpsc::UnboundedReceiver<RealtimeEvent>,
    state: MockState,
}

async fn harness() -> Harness {
    let (settings, state) = spawn_mock_service().await.expect("spawn mock");
    let session = Arc::new(
        Session::builder(settings)
            .from_cookies(&mock_cookies())
            .await
            .expect("restore from cookies"),
    );
    let (tx, events) = mpsc::unbounded_channel();
    let options = ChannelOptions::from_settings(session.settings());
    let channel = RealtimeChannel::new(Arc::clone(&session), Arc::new(tx), options);
    Harness {
        session,
        channel,
        events,
        state,
    }
}

async fn connected() -> Harness {
    let mut harness = harness().await;
    harness
        .channel
        .connect(&CancellationToken::new())
        .await
        .expect("connect");
    assert_eq!(next_event(&mut harness.events).await, RealtimeEvent::Connected);
    wait_for_state(&harness.channel, ChannelState::Streaming).await;
    harness
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<RealtimeEvent>) -> RealtimeEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event in time")
        .expect("sink open")
}

async fn wait_for_state(channel: &RealtimeChannel, wanted: ChannelState) {
    let mut states = channel.watch_state();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == wanted))
        .await
        .expect("state in time")
        .expect("state channel open");
}

fn new_message(body: &str) -> Value {
    json!({
        "class": "NewMessage",
        "body": body,
        "messageMetadata": {
            "threadKey": {"otherUserFbId": "5005"},
            "actorFbId": "5005",
            "timestamp": "1600000000000",
            "messageId": "mid.$hello",
        },
    })
}

#[tokio::test]
async fn handshake_subscribes_and_creates_a_queue() {
    let harness = connected().await;
    let client_id = harness.session.state().await.client_id;

    assert_eq!(
        harness.channel.cursor().await,
        RealtimeCursor {
            sequence_id: Some(43),
            sync_token: Some(MOCK_SYNC_TOKEN.into()),
        }
    );

    let inner = harness.state.inner.lock().await;
    let handshake = &inner.handshakes[0];
    assert_eq!(handshake.user_id, MOCK_USER_ID);
    assert_eq!(handshake.device_id, client_id);
    assert!(handshake.chat_on);
    assert!(!handshake.foreground);
    assert!(handshake.no_auto_fg);
    assert_eq!(handshake.app_id, APP_ID);
    assert_eq!(handshake.subscribe_topics, SUBSCRIBE_TOPICS);

    let (sid, cookie) = &inner.ws_requests[0];
    assert_eq!(sid.as_deref(), Some(handshake.session_id.to_string().as_str()));
    assert!(cookie
        .as_deref()
        .is_some_and(|c| c.contains(&format!("c_user={MOCK_USER_ID}"))));

    assert_eq!(inner.subscriptions[0], SUBSCRIBE_TOPICS);
    assert_eq!(inner.unsubscriptions[0], [LEGACY_TOPIC]);

    let (topic, request) = &inner.publishes[0];
    assert_eq!(topic, TOPIC_CREATE_QUEUE);
    assert_eq!(request["initial_titan_sequence_id"], "42");
    assert_eq!(request["entity_fbid"], MOCK_USER_ID);
    assert_eq!(request["sync_api_version"], 10);
    assert_eq!(request["max_deltas_able_to_process"], 1000);
    assert_eq!(request["delta_batch_size"], 500);
    assert_eq!(request["encoding"], "JSON");
    assert!(request["device_params"].is_null());
}

#[tokio::test]
async fn dropped_connection_reconnects_and_resumes_from_the_cursor() {
    let mut harness = connected().await;

    harness.state.push(
        TOPIC_DELTAS,
        json!({"lastIssuedSeqId": 45, "deltas": [{"class": "NoOp"}, new_message("hi")]}),
    );
    match next_event(&mut harness.events).await {
        RealtimeEvent::Delta {
            event: DeltaEvent::MessageReceived { text, meta, .. },
            raw,
        } => {
            assert_eq!(text.as_deref(), Some("hi"));
            assert_eq!(meta.thread, ThreadKey::User(UserId("5005".into())));
            assert_eq!(raw["body"], "hi");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(harness.channel.cursor().await.sequence_id, Some(45));

    harness.state.kill_connections();
    assert!(matches!(
        next_event(&mut harness.events).await,
        RealtimeEvent::Disconnected { .. }
    ));
    assert_eq!(next_event(&mut harness.events).await, RealtimeEvent::Connected);
    wait_for_state(&harness.channel, ChannelState::Streaming).await;

    let inner = harness.state.inner.lock().await;
    assert_eq!(inner.handshakes.len(), 2);
    let (topic, request) = inner.publishes.last().expect("resume request");
    assert_eq!(topic, TOPIC_GET_DIFFS);
    assert_eq!(request["last_seq_id"], "45");
    assert_eq!(request["sync_token"], MOCK_SYNC_TOKEN);
    assert_eq!(inner.batch_calls.len(), 1);
    drop(inner);

    harness.channel.disconnect().await;
    assert!(harness.events.try_recv().is_err());
}

#[tokio::test]
async fn typing_presence_and_notices_are_forwarded_in_order() {
    let mut harness = connected().await;

    harness
        .state
        .push(TOPIC_THREAD_TYPING, json!({"sender_fbid": 7, "thread": "88", "state": 1}));
    harness.state.push(
        TOPIC_PRESENCE,
        json!({"list_type": "inc", "list": [{"u": 7, "p": 2, "l": 1600000000}]}),
    );
    harness
        .state
        .push(TOPIC_NOTIFY_DISCONNECT, json!({"reason": "maintenance"}));

    assert!(matches!(
        next_event(&mut harness.events).await,
        RealtimeEvent::Typing { typing: true, thread: ThreadKey::Group(_), .. }
    ));
    match next_event(&mut harness.events).await {
        RealtimeEvent::Presence { statuses } => {
            assert_eq!(statuses.len(), 1);
            assert!(statuses[0].active);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        next_event(&mut harness.events).await,
        RealtimeEvent::ServerDisconnectNotice {
            raw: json!({"reason": "maintenance"})
        }
    );
}

#[tokio::test]
async fn queue_error_resyncs_within_the_connection() {
    let mut harness = connected().await;

    harness
        .state
        .push(TOPIC_DELTAS, json!({"errorCode": "ERROR_QUEUE_OVERFLOW"}));
    assert_eq!(
        next_event(&mut harness.events).await,
        RealtimeEvent::Desynced {
            error_code: "ERROR_QUEUE_OVERFLOW".into()
        }
    );

    assert!(
        eventually(&harness.state, |inner| {
            inner
                .publishes
                .iter()
                .filter(|(topic, _)| topic == TOPIC_CREATE_QUEUE)
                .count()
                == 2
        })
        .await
    );
    wait_for_state(&harness.channel, ChannelState::Streaming).await;
    assert_eq!(
        harness.channel.cursor().await.sync_token.as_deref(),
        Some(MOCK_SYNC_TOKEN)
    );
    let inner = harness.state.inner.lock().await;
    assert_eq!(inner.handshakes.len(), 1);
    assert_eq!(inner.batch_calls.len(), 2);
}

#[tokio::test]
async fn toggles_are_no_ops_while_disconnected() {
    let harness = harness().await;
    assert_eq!(harness.channel.state(), ChannelState::Disconnected);
    assert!(!harness.channel.set_foreground(true).await.expect("foreground"));
    assert!(!harness.channel.set_chat_on(false).await.expect("chat on"));
    assert!(harness.state.inner.lock().await.publishes.is_empty());
}

#[tokio::test]
async fn toggles_publish_only_on_change() {
    let harness = connected().await;

    assert!(harness.channel.set_foreground(true).await.expect("foreground"));
    assert!(!harness.channel.set_foreground(true).await.expect("unchanged"));
    assert!(harness.channel.set_chat_on(false).await.expect("chat off"));

    assert!(
        eventually(&harness.state, |inner| {
            inner.publishes.iter().any(|(topic, payload)| {
                topic == TOPIC_FOREGROUND && payload == &json!({"foreground": true})
            }) && inner.publishes.iter().any(|(topic, payload)| {
                topic == TOPIC_CLIENT_SETTINGS
                    && payload == &json!({"make_user_available_when_in_foreground": false})
            })
        })
        .await
    );
    let foreground_publishes = harness
        .state
        .inner
        .lock()
        .await
        .publishes
        .iter()
        .filter(|(topic, _)| topic == TOPIC_FOREGROUND)
        .count();
    assert_eq!(foreground_publishes, 1);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_allows_reconnecting() {
    let mut harness = connected().await;

    harness.channel.disconnect().await;
    harness.channel.disconnect().await;
    assert_eq!(harness.channel.state(), ChannelState::Disconnected);
    assert_eq!(harness.channel.cursor().await, RealtimeCursor::default());
    assert!(eventually(&harness.state, |inner| inner.disconnects >= 1).await);

    harness
        .channel
        .connect(&CancellationToken::new())
        .await
        .expect("connect again");
    assert_eq!(next_event(&mut harness.events).await, RealtimeEvent::Connected);
    assert!(
        eventually(&harness.state, |inner| {
            inner
                .publishes
                .iter()
                .filter(|(topic, _)| topic == TOPIC_CREATE_QUEUE)
                .count()
                == 2
        })
        .await
    );
}

#[tokio::test]
async fn second_connect_is_rejected() {
    let harness = connected().await;
    let err = harness
        .channel
        .connect(&CancellationToken::new())
        .await
        .expect_err("already connected");
    assert!(matches!(err, RealtimeError::AlreadyConnected));
}

#[tokio::test]
async fn refused_handshake_fails_the_first_connect() {
    let mut harness = harness().await;
    harness.state.inner.lock().await.refuse_code = 5;

    let err = harness
        .channel
        .connect(&CancellationToken::new())
        .await
        .expect_err("refused");
    assert!(matches!(err, RealtimeError::Refused { code: 5 }), "{err}");
    assert!(err.is_fatal());
    assert_eq!(harness.channel.state(), ChannelState::Disconnected);
    assert!(harness.events.try_recv().is_err());
}

#[tokio::test]
async fn connect_with_a_cancelled_token_reports_cancelled() {
    let mut harness = harness().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = harness
        .channel
        .connect(&cancel)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, RealtimeError::Cancelled), "{err}");
    assert_eq!(harness.channel.state(), ChannelState::Disconnected);
    assert!(harness.events.try_recv().is_err());

    harness
        .channel
        .connect(&CancellationToken::new())
        .await
        .expect("connect after a cancelled attempt");
}

#[tokio::test]
async fn cancelling_the_parent_token_stops_the_worker() {
    let harness = harness().await;
    let cancel = CancellationToken::new();
    harness.channel.connect(&cancel).await.expect("connect");
    cancel.cancel();
    wait_for_state(&harness.channel, ChannelState::Disconnected).await;
    assert!(eventually(&harness.state, |inner| inner.disconnects == 1).await);
}
