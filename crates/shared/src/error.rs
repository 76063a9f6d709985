use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// `error` codes the service embeds in otherwise successful response bodies.
pub const CODE_NOT_LOGGED_IN: i64 = 1357001;
pub const CODE_PLEASE_REFRESH: i64 = 1357004;
pub const CODES_INVALID_PARAMETERS: [i64; 3] = [1357031, 1545010, 1545003];

/// Broad failure class shared by the request engine and the realtime channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transport,
    NotLoggedIn,
    SessionStale,
    InvalidParameters,
    Parse,
    External,
}

pub fn classify_error_code(code: i64) -> ErrorClass {
    match code {
        CODE_NOT_LOGGED_IN => ErrorClass::NotLoggedIn,
        CODE_PLEASE_REFRESH => ErrorClass::SessionStale,
        c if CODES_INVALID_PARAMETERS.contains(&c) => ErrorClass::InvalidParameters,
        _ => ErrorClass::External,
    }
}

/// Returns `None` for statuses the engine handles itself (2xx, 3xx).
pub fn classify_http_status(status: u16) -> Option<ErrorClass> {
    match status {
        200..=399 => None,
        _ => Some(ErrorClass::Transport),
    }
}

/// Application error carried in a response body under `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("service error {code}: {summary}")]
pub struct ServiceError {
    pub code: i64,
    pub summary: String,
    pub description: String,
}

impl ServiceError {
    pub fn new(code: i64, summary: impl Into<String>) -> Self {
        Self {
            code,
            summary: summary.into(),
            description: String::new(),
        }
    }

    /// Extracts the `error` / `errorSummary` / `errorDescription` triple, if any.
    pub fn from_body(body: &Value) -> Option<Self> {
        let code = match body.get("error")? {
            Value::Number(n) => n.as_i64()?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        };
        let text = |key: &str| {
            body.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Some(Self {
            code,
            summary: text("errorSummary"),
            description: text("errorDescription"),
        })
    }

    pub fn class(&self) -> ErrorClass {
        classify_error_code(self.code)
    }
}
