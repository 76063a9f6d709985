use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Reads an id that the service sends either as a JSON string or a number.
            pub fn from_value(value: &Value) -> Option<Self> {
                id_string(value).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ThreadId);
id_newtype!(MessageId);

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identifies a conversation: a one-to-one thread keyed by the other user, or a
/// group thread keyed by its own id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ThreadKey {
    User(UserId),
    Group(ThreadId),
}

impl ThreadKey {
    /// Parses `{"threadFbId": ..}` or `{"otherUserFbId": ..}`.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(id) = value.get("threadFbId").and_then(ThreadId::from_value) {
            return Some(Self::Group(id));
        }
        value
            .get("otherUserFbId")
            .and_then(UserId::from_value)
            .map(Self::User)
    }
}

/// Converts a millisecond timestamp sent as a number or numeric string.
pub fn millis_to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse::<i64>().ok()?,
        _ => return None,
    };
    Utc.timestamp_millis_opt(millis).single()
}
