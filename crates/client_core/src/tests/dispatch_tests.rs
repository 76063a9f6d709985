use super::*;

use serde_json::json;

fn meta(thread: Value) -> Value {
    json!({
        "threadKey": thread,
        "actorFbId": "1001",
        "timestamp": "1600000000000",
        "messageId": "mid.$abc",
    })
}

#[test]
fn queue_created_frame_wins_over_other_fields() {
    let frame = json!({"syncToken": "tok", "firstDeltaSeqId": 43, "lastIssuedSeqId": 1});
    assert_eq!(
        parse_sync_frame(&frame),
        SyncFrame::QueueCreated {
            sync_token: "tok".into(),
            first_sequence_id: 43
        }
    );
    assert_eq!(
        parse_sync_frame(&json!({"errorCode": "ERROR_QUEUE_NOT_FOUND"})),
        SyncFrame::QueueError {
            code: "ERROR_QUEUE_NOT_FOUND".into()
        }
    );
    assert_eq!(
        parse_sync_frame(&json!({"lastIssuedSeqId": "50", "deltas": [{"class": "NoOp"}]})),
        SyncFrame::Deltas {
            last_sequence_id: Some(50),
            deltas: vec![json!({"class": "NoOp"})]
        }
    );
}

#[test]
fn noop_is_skipped_and_unknown_is_an_error() {
    assert_eq!(classify_delta(&json!({"class": "NoOp"})), Ok(None));
    assert_eq!(
        classify_delta(&json!({"class": "Mystery", "type": "odd"})),
        Err(DispatchError::Unrecognized {
            class: Some("Mystery".into()),
            kind: Some("odd".into())
        })
    );
}

#[test]
fn participants_added_outranks_a_coincidental_message_class() {
    let delta = json!({
        "class": "NewMessage",
        "addedParticipants": [{"userFbId": "2002"}, {"userFbId": 2003}],
        "messageMetadata": meta(json!({"threadFbId": "77"})),
    });
    match classify_delta(&delta).expect("delta") {
        Some(DeltaEvent::ParticipantsAdded { meta, added }) => {
            assert_eq!(meta.thread, ThreadKey::Group(ThreadId("77".into())));
            assert_eq!(meta.actor, UserId("1001".into()));
            assert!(meta.at.is_some());
            assert_eq!(added, [UserId("2002".into()), UserId("2003".into())]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn admin_and_approval_mode_changes() {
    let admin = json!({
        "class": "AdminTextMessage",
        "type": "change_thread_admins",
        "untypedData": {"ADMIN_EVENT": "remove_admin", "TARGET_ID": "3003"},
        "messageMetadata": meta(json!({"threadFbId": "77"})),
    });
    assert!(matches!(
        classify_delta(&admin),
        Ok(Some(DeltaEvent::AdminRemoved { subject, .. })) if subject.as_str() == "3003"
    ));

    let approval = json!({
        "class": "AdminTextMessage",
        "type": "change_thread_approval_mode",
        "untypedData": {"APPROVAL_MODE": "0"},
        "messageMetadata": meta(json!({"threadFbId": "77"})),
    });
    assert!(matches!(
        classify_delta(&approval),
        Ok(Some(DeltaEvent::ApprovalModeChanged { enabled: false, .. }))
    ));

    let broken = json!({
        "type": "change_thread_admins",
        "untypedData": {"ADMIN_EVENT": "promote", "TARGET_ID": "3003"},
        "messageMetadata": meta(json!({"threadFbId": "77"})),
    });
    assert_eq!(
        classify_delta(&broken),
        Err(DispatchError::Missing("ADMIN_EVENT"))
    );
}

#[test]
fn receipts_and_mark_read() {
    let delivered = json!({
        "class": "DeliveryReceipt",
        "threadKey": {"otherUserFbId": "4004"},
        "messageIds": ["mid.1", "mid.2"],
        "deliveredWatermarkTimestampMs": "1600000000000",
    });
    match classify_delta(&delivered).expect("delta") {
        Some(DeltaEvent::MessagesDelivered {
            by, message_ids, ..
        }) => {
            assert_eq!(by.as_str(), "4004");
            assert_eq!(message_ids.len(), 2);
        }
        other => panic!("unexpected {other:?}"),
    }

    let read = json!({
        "class": "MarkRead",
        "threadKeys": [{"threadFbId": "1"}, {"otherUserFbId": "2"}],
        "actionTimestamp": "1600000000000",
        "watermarkTimestamp": "1600000000000",
    });
    match classify_delta(&read).expect("delta") {
        Some(DeltaEvent::ThreadsMarkedRead { threads, seen_at, .. }) => {
            assert_eq!(threads.len(), 2);
            assert!(seen_at.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn game_score_parses_embedded_leaderboard() {
    let delta = json!({
        "type": "instant_game_update",
        "untypedData": {
            "game_id": "123",
            "game_name": "Snake",
            "score": "45",
            "leaderboard": "{\"scores\":[]}",
        },
        "messageMetadata": meta(json!({"otherUserFbId": "5005"})),
    });
    match classify_delta(&delta).expect("delta") {
        Some(DeltaEvent::GameScore {
            game_name,
            score,
            leaderboard,
            ..
        }) => {
            assert_eq!(game_name, "Snake");
            assert_eq!(score, Some(45));
            assert_eq!(leaderboard, Some(json!({"scores": []})));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn new_message_carries_id_and_body() {
    let delta = json!({
        "class": "NewMessage",
        "body": "hi",
        "messageMetadata": meta(json!({"otherUserFbId": "5005"})),
    });
    assert!(matches!(
        classify_delta(&delta),
        Ok(Some(DeltaEvent::MessageReceived { message_id, text: Some(text), .. }))
            if message_id.as_str() == "mid.$abc" && text == "hi"
    ));
}

#[test]
fn typing_without_thread_is_a_one_to_one_thread() {
    let event = parse_typing(&json!({"sender_fbid": 6006, "state": 1})).expect("typing");
    assert_eq!(
        event,
        RealtimeEvent::Typing {
            thread: ThreadKey::User(UserId("6006".into())),
            author: UserId("6006".into()),
            typing: true,
        }
    );
    let stopped =
        parse_typing(&json!({"sender_fbid": "6006", "thread": "88", "state": 0})).expect("typing");
    assert!(matches!(
        stopped,
        RealtimeEvent::Typing { thread: ThreadKey::Group(_), typing: false, .. }
    ));
}

#[test]
fn presence_list_maps_status_codes() {
    let event = parse_presence(&json!({
        "list_type": "inc",
        "list": [{"u": 1, "p": 2, "l": 1600000000}, {"u": 2, "p": 0}]
    }))
    .expect("presence");
    match event {
        RealtimeEvent::Presence { statuses } => {
            assert_eq!(statuses.len(), 2);
            assert!(statuses[0].active);
            assert!(statuses[0].last_active.is_some());
            assert!(!statuses[1].active);
            assert!(statuses[1].last_active.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
}
