use shared::error::{ErrorClass, ServiceError};
use thiserror::Error;

/// Failures of the request engine, login flow and batch decoder.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error (status {status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },
    #[error("not logged in: {0}")]
    NotLoggedIn(String),
    #[error("session stale: {0}")]
    SessionStale(ServiceError),
    #[error("invalid parameters: {0}")]
    InvalidParameters(ServiceError),
    #[error("parse error: {message}")]
    Parse { message: String, fragment: String },
    /// The service answered with markup or fields we have no case for.
    #[error("protocol drift at {stage}: unexpected fields {fields:?}")]
    ProtocolDrift { stage: String, fields: Vec<String> },
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("invalid session: {0}")]
    InvalidSession(String),
    #[error(transparent)]
    External(ServiceError),
    #[error("query error: {0}")]
    Query(String),
    #[error("operation cancelled")]
    Cancelled,
}

const FRAGMENT_LIMIT: usize = 512;

impl SessionError {
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            status,
            message: message.into(),
        }
    }

    /// Parse failure carrying a bounded excerpt of the offending input.
    pub fn parse(message: impl Into<String>, fragment: &str) -> Self {
        let mut end = fragment.len().min(FRAGMENT_LIMIT);
        while !fragment.is_char_boundary(end) {
            end -= 1;
        }
        Self::Parse {
            message: message.into(),
            fragment: fragment[..end].to_string(),
        }
    }

    pub fn drift(stage: impl Into<String>, fields: Vec<String>) -> Self {
        Self::ProtocolDrift {
            stage: stage.into(),
            fields,
        }
    }

    /// Maps an in-body service error onto the taxonomy.
    pub fn from_service(err: ServiceError) -> Self {
        match err.class() {
            ErrorClass::NotLoggedIn => Self::NotLoggedIn(err.to_string()),
            ErrorClass::SessionStale => Self::SessionStale(err),
            ErrorClass::InvalidParameters => Self::InvalidParameters(err),
            _ => Self::External(err),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport { .. } | Self::Cancelled => ErrorClass::Transport,
            Self::NotLoggedIn(_) | Self::InvalidCredentials(_) | Self::InvalidSession(_) => {
                ErrorClass::NotLoggedIn
            }
            Self::SessionStale(_) => ErrorClass::SessionStale,
            Self::InvalidParameters(_) => ErrorClass::InvalidParameters,
            Self::Parse { .. } | Self::ProtocolDrift { .. } => ErrorClass::Parse,
            Self::External(_) | Self::Query(_) => ErrorClass::External,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::SessionStale(_))
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        Self::transport(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("truncated packet")]
    Truncated,
    #[error("remaining length exceeds four bytes")]
    MalformedLength,
    #[error("unsupported packet type {0:#04x}")]
    UnsupportedPacket(u8),
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("field too long for a u16 length prefix: {0} bytes")]
    FieldTooLong(usize),
}

/// Failures of the realtime channel.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("mqtt codec error: {0}")]
    Mqtt(#[from] MqttError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("connection refused by server (return code {code})")]
    Refused { code: u8 },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("channel already connected")]
    AlreadyConnected,
    #[error("operation cancelled")]
    Cancelled,
}

impl RealtimeError {
    /// Refusals for bad credentials / not authorized, or a lost login.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Refused { code } => matches!(code, 4 | 5),
            Self::Session(err) => err.class() == ErrorClass::NotLoggedIn,
            Self::Cancelled | Self::AlreadyConnected => true,
            _ => false,
        }
    }
}
