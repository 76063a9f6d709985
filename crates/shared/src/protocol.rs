use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{MessageId, ThreadKey, UserId};

/// JSON object carried in the MQTT CONNECT username field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    #[serde(rename = "u")]
    pub user_id: String,
    #[serde(rename = "s")]
    pub session_id: u64,
    pub chat_on: bool,
    #[serde(rename = "fg")]
    pub foreground: bool,
    #[serde(rename = "d")]
    pub device_id: String,
    #[serde(rename = "aid")]
    pub app_id: u64,
    #[serde(rename = "st")]
    pub subscribe_topics: Vec<String>,
    #[serde(rename = "pm")]
    pub publish_on_connect: Vec<Value>,
    pub cp: u8,
    pub ecp: u8,
    #[serde(rename = "ct")]
    pub client_type: String,
    pub mqtt_sid: String,
    pub dc: String,
    pub no_auto_fg: bool,
    pub gas: Option<Value>,
    pub pack: Vec<Value>,
}

/// Body of `/messenger_sync_create_queue` and `/messenger_sync_get_diffs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueRequest {
    pub sync_api_version: u32,
    pub max_deltas_able_to_process: u32,
    pub delta_batch_size: u32,
    pub encoding: String,
    pub entity_fbid: String,
    #[serde(flatten)]
    pub mode: SyncQueueMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncQueueMode {
    Create {
        initial_titan_sequence_id: String,
        device_params: Option<Value>,
    },
    Resume {
        last_seq_id: String,
        sync_token: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForegroundState {
    pub foreground: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettingsUpdate {
    pub make_user_available_when_in_foreground: bool,
}

/// Author, thread and time shared by most thread-level deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaMeta {
    pub thread: ThreadKey,
    pub actor: UserId,
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeltaEvent {
    ParticipantsAdded {
        meta: DeltaMeta,
        added: Vec<UserId>,
    },
    ParticipantRemoved {
        meta: DeltaMeta,
        removed: UserId,
    },
    ColorChanged {
        meta: DeltaMeta,
        color: Option<String>,
    },
    FolderSeen {
        folders: Vec<String>,
        at: Option<DateTime<Utc>>,
    },
    EmojiChanged {
        meta: DeltaMeta,
        emoji: Option<String>,
    },
    TitleChanged {
        meta: DeltaMeta,
        title: Option<String>,
    },
    ForcedFetch {
        thread: ThreadKey,
        message_id: Option<MessageId>,
    },
    NicknameChanged {
        meta: DeltaMeta,
        subject: UserId,
        nickname: Option<String>,
    },
    AdminAdded {
        meta: DeltaMeta,
        subject: UserId,
    },
    AdminRemoved {
        meta: DeltaMeta,
        subject: UserId,
    },
    ApprovalModeChanged {
        meta: DeltaMeta,
        enabled: bool,
    },
    MessagesDelivered {
        thread: ThreadKey,
        by: UserId,
        message_ids: Vec<MessageId>,
        at: Option<DateTime<Utc>>,
    },
    MessagesSeen {
        thread: ThreadKey,
        by: UserId,
        seen_at: Option<DateTime<Utc>>,
        delivered_at: Option<DateTime<Utc>>,
    },
    ThreadsMarkedRead {
        threads: Vec<ThreadKey>,
        seen_at: Option<DateTime<Utc>>,
        delivered_at: Option<DateTime<Utc>>,
    },
    GameScore {
        meta: DeltaMeta,
        game_id: String,
        game_name: String,
        score: Option<i64>,
        leaderboard: Option<Value>,
    },
    MessageReceived {
        meta: DeltaMeta,
        message_id: MessageId,
        text: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub user_id: UserId,
    pub active: bool,
    pub last_active: Option<DateTime<Utc>>,
}

/// Everything the realtime channel hands to its event sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    /// The server lost our queue; state since the last cursor may be missing.
    Desynced {
        error_code: String,
    },
    ServerDisconnectNotice {
        raw: Value,
    },
    Typing {
        thread: ThreadKey,
        author: UserId,
        typing: bool,
    },
    Presence {
        statuses: Vec<PresenceStatus>,
    },
    Delta {
        event: DeltaEvent,
        /// Untouched delta, for the data-model layer.
        raw: Value,
    },
}
