//! Turns realtime publishes into typed events.

use chrono::{TimeZone, Utc};
use serde_json::Value;
use shared::{
    domain::{millis_to_datetime, MessageId, ThreadId, ThreadKey, UserId},
    protocol::{DeltaEvent, DeltaMeta, PresenceStatus, RealtimeEvent},
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unrecognized delta (class {class:?}, type {kind:?})")]
    Unrecognized {
        class: Option<String>,
        kind: Option<String>,
    },
    #[error("delta field '{0}' missing or malformed")]
    Missing(&'static str),
}

/// What a `/t_ms` frame means for the cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncFrame {
    /// Answer to a create-queue request.
    QueueCreated {
        sync_token: String,
        first_sequence_id: u64,
    },
    /// The server lost or overflowed our queue.
    QueueError { code: String },
    Deltas {
        last_sequence_id: Option<u64>,
        deltas: Vec<Value>,
    },
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_sync_frame(frame: &Value) -> SyncFrame {
    if let (Some(token), Some(first)) = (
        frame.get("syncToken").and_then(Value::as_str),
        frame.get("firstDeltaSeqId").and_then(as_u64),
    ) {
        return SyncFrame::QueueCreated {
            sync_token: token.to_string(),
            first_sequence_id: first,
        };
    }
    if let Some(code) = frame.get("errorCode") {
        return SyncFrame::QueueError {
            code: as_string(code).unwrap_or_else(|| code.to_string()),
        };
    }
    SyncFrame::Deltas {
        last_sequence_id: frame.get("lastIssuedSeqId").and_then(as_u64),
        deltas: frame
            .get("deltas")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    }
}

fn user(value: Option<&Value>, field: &'static str) -> Result<UserId, DispatchError> {
    value
        .and_then(UserId::from_value)
        .ok_or(DispatchError::Missing(field))
}

fn metadata(delta: &Value) -> Result<DeltaMeta, DispatchError> {
    let meta = delta
        .get("messageMetadata")
        .ok_or(DispatchError::Missing("messageMetadata"))?;
    Ok(DeltaMeta {
        thread: meta
            .get("threadKey")
            .and_then(ThreadKey::from_value)
            .ok_or(DispatchError::Missing("messageMetadata.threadKey"))?,
        actor: user(meta.get("actorFbId"), "messageMetadata.actorFbId")?,
        at: meta.get("timestamp").and_then(millis_to_datetime),
    })
}

fn untyped<'a>(delta: &'a Value, key: &str) -> Option<&'a Value> {
    delta.get("untypedData").and_then(|data| data.get(key))
}

fn untyped_string(delta: &Value, key: &str) -> Option<String> {
    untyped(delta, key)
        .and_then(as_string)
        .filter(|s| !s.is_empty())
}

fn thread_key(delta: &Value) -> Result<ThreadKey, DispatchError> {
    delta
        .get("threadKey")
        .and_then(ThreadKey::from_value)
        .ok_or(DispatchError::Missing("threadKey"))
}

/// Classifies one delta. `Ok(None)` is a no-op delta.
///
/// More than one marker can be present on a frame, so the checks run in a
/// fixed order and the first match wins.
pub fn classify_delta(delta: &Value) -> Result<Option<DeltaEvent>, DispatchError> {
    let class = delta.get("class").and_then(Value::as_str);
    let kind = delta.get("type").and_then(Value::as_str);

    if class == Some("NoOp") {
        return Ok(None);
    }

    let event = if let Some(added) = delta.get("addedParticipants") {
        let added = added
            .as_array()
            .ok_or(DispatchError::Missing("addedParticipants"))?
            .iter()
            .filter_map(|p| p.get("userFbId").and_then(UserId::from_value))
            .collect();
        DeltaEvent::ParticipantsAdded {
            meta: metadata(delta)?,
            added,
        }
    } else if let Some(left) = delta.get("leftParticipantFbId") {
        DeltaEvent::ParticipantRemoved {
            meta: metadata(delta)?,
            removed: user(Some(left), "leftParticipantFbId")?,
        }
    } else if kind == Some("change_thread_theme") {
        DeltaEvent::ColorChanged {
            meta: metadata(delta)?,
            color: untyped_string(delta, "theme_color"),
        }
    } else if class == Some("MarkFolderSeen") {
        let folders = delta
            .get("folders")
            .and_then(Value::as_array)
            .map(|folders| {
                folders
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|f| f.trim_start_matches("FOLDER_").to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default();
        DeltaEvent::FolderSeen {
            folders,
            at: delta.get("timestamp").and_then(millis_to_datetime),
        }
    } else if kind == Some("change_thread_icon") {
        DeltaEvent::EmojiChanged {
            meta: metadata(delta)?,
            emoji: untyped_string(delta, "thread_icon"),
        }
    } else if class == Some("ThreadName") {
        DeltaEvent::TitleChanged {
            meta: metadata(delta)?,
            title: delta
                .get("name")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    } else if class == Some("ForcedFetch") {
        DeltaEvent::ForcedFetch {
            thread: thread_key(delta)?,
            message_id: delta.get("messageId").and_then(MessageId::from_value),
        }
    } else if kind == Some("change_thread_nickname") {
        DeltaEvent::NicknameChanged {
            meta: metadata(delta)?,
            subject: user(untyped(delta, "participant_id"), "participant_id")?,
            nickname: untyped_string(delta, "nickname"),
        }
    } else if kind == Some("change_thread_admins") {
        let meta = metadata(delta)?;
        let subject = user(untyped(delta, "TARGET_ID"), "TARGET_ID")?;
        match untyped(delta, "ADMIN_EVENT").and_then(Value::as_str) {
            Some("add_admin") => DeltaEvent::AdminAdded { meta, subject },
            Some("remove_admin") => DeltaEvent::AdminRemoved { meta, subject },
            _ => return Err(DispatchError::Missing("ADMIN_EVENT")),
        }
    } else if kind == Some("change_thread_approval_mode") {
        let mode = untyped(delta, "APPROVAL_MODE")
            .and_then(as_string)
            .ok_or(DispatchError::Missing("APPROVAL_MODE"))?;
        DeltaEvent::ApprovalModeChanged {
            meta: metadata(delta)?,
            enabled: mode != "0",
        }
    } else if class == Some("DeliveryReceipt") {
        let thread = thread_key(delta)?;
        let by = delta
            .get("actorFbId")
            .and_then(UserId::from_value)
            .or_else(|| match &thread {
                ThreadKey::User(other) => Some(other.clone()),
                ThreadKey::Group(_) => None,
            })
            .ok_or(DispatchError::Missing("actorFbId"))?;
        DeltaEvent::MessagesDelivered {
            thread,
            by,
            message_ids: delta
                .get("messageIds")
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(MessageId::from_value).collect())
                .unwrap_or_default(),
            at: delta
                .get("deliveredWatermarkTimestampMs")
                .and_then(millis_to_datetime),
        }
    } else if class == Some("ReadReceipt") {
        DeltaEvent::MessagesSeen {
            thread: thread_key(delta)?,
            by: user(delta.get("actorFbId"), "actorFbId")?,
            seen_at: delta.get("actionTimestampMs").and_then(millis_to_datetime),
            delivered_at: delta.get("watermarkTimestampMs").and_then(millis_to_datetime),
        }
    } else if class == Some("MarkRead") {
        DeltaEvent::ThreadsMarkedRead {
            threads: delta
                .get("threadKeys")
                .and_then(Value::as_array)
                .map(|keys| keys.iter().filter_map(ThreadKey::from_value).collect())
                .unwrap_or_default(),
            seen_at: delta.get("actionTimestamp").and_then(millis_to_datetime),
            delivered_at: delta.get("watermarkTimestamp").and_then(millis_to_datetime),
        }
    } else if kind == Some("instant_game_update") {
        DeltaEvent::GameScore {
            meta: metadata(delta)?,
            game_id: untyped_string(delta, "game_id").unwrap_or_default(),
            game_name: untyped_string(delta, "game_name").unwrap_or_default(),
            score: untyped(delta, "score").and_then(|s| as_string(s)?.parse().ok()),
            leaderboard: untyped(delta, "leaderboard")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str(raw).ok()),
        }
    } else if class == Some("NewMessage") {
        let meta_raw = delta
            .get("messageMetadata")
            .ok_or(DispatchError::Missing("messageMetadata"))?;
        DeltaEvent::MessageReceived {
            meta: metadata(delta)?,
            message_id: meta_raw
                .get("messageId")
                .and_then(MessageId::from_value)
                .ok_or(DispatchError::Missing("messageMetadata.messageId"))?,
            text: delta.get("body").and_then(Value::as_str).map(str::to_string),
        }
    } else {
        return Err(DispatchError::Unrecognized {
            class: class.map(str::to_string),
            kind: kind.map(str::to_string),
        });
    };
    Ok(Some(event))
}

/// `/thread_typing` and `/orca_typing_notifications` frames.
pub fn parse_typing(frame: &Value) -> Result<RealtimeEvent, DispatchError> {
    let author = user(frame.get("sender_fbid"), "sender_fbid")?;
    let thread = match frame.get("thread").and_then(ThreadId::from_value) {
        Some(thread) => ThreadKey::Group(thread),
        None => ThreadKey::User(author.clone()),
    };
    let state = frame
        .get("state")
        .and_then(Value::as_i64)
        .ok_or(DispatchError::Missing("state"))?;
    Ok(RealtimeEvent::Typing {
        thread,
        author,
        typing: state == 1,
    })
}

/// `/orca_presence` frames: `{"list": [{"u": id, "p": status, "l": seconds}]}`.
pub fn parse_presence(frame: &Value) -> Result<RealtimeEvent, DispatchError> {
    let list = frame
        .get("list")
        .and_then(Value::as_array)
        .ok_or(DispatchError::Missing("list"))?;
    let statuses = list
        .iter()
        .filter_map(|entry| {
            let user_id = entry.get("u").and_then(UserId::from_value)?;
            let status = entry.get("p").and_then(Value::as_i64).unwrap_or_default();
            let last_active = entry
                .get("l")
                .and_then(Value::as_i64)
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
            Some(PresenceStatus {
                user_id,
                active: matches!(status, 2 | 3),
                last_active,
            })
        })
        .collect();
    Ok(RealtimeEvent::Presence { statuses })
}

#[cfg(test)]
#[path = "../tests/dispatch_tests.rs"]
mod tests;
