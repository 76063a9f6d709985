use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Host serving login, the home page and the request endpoints.
    pub base_url: String,
    /// Host the checkpoint forms post back to.
    pub facebook_url: String,
    pub realtime_url: String,
    /// Cookies imported from a browser are scoped to this domain.
    pub apex_domain: String,
    pub user_agent: Option<String>,
    pub reconnect_backoff_ms: u64,
    pub keepalive_secs: u64,
    /// Number of `N-edge-chat` hosts that receive propagated cookies.
    pub edge_pool_size: u8,
    pub request_timeout_secs: u64,
    pub cookie_path: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.messenger.com".into(),
            facebook_url: "https://www.facebook.com".into(),
            realtime_url: "wss://edge-chat.messenger.com/chat".into(),
            apex_domain: "facebook.com".into(),
            user_agent: None,
            reconnect_backoff_ms: 5_000,
            keepalive_secs: 10,
            edge_pool_size: 7,
            request_timeout_secs: 30,
            cookie_path: None,
        }
    }
}

impl ClientSettings {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Defaults, then `client.toml` from the working directory when readable,
/// then `CLIENT__*` environment variables.
pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();
    if let Ok(raw) = fs::read_to_string(DEFAULT_SETTINGS_FILE) {
        if let Ok(file_cfg) = toml::from_str::<ClientSettings>(&raw) {
            settings = file_cfg;
        }
    }
    apply_env_overrides(settings, |key| std::env::var(key).ok())
}

/// Like [`load_settings`] but a missing or malformed file is an error.
pub fn load_settings_from(path: &Path) -> anyhow::Result<ClientSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let settings = toml::from_str::<ClientSettings>(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
    Ok(apply_env_overrides(settings, |key| std::env::var(key).ok()))
}

pub fn apply_env_overrides(
    mut settings: ClientSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    if let Some(v) = lookup("CLIENT__BASE_URL") {
        settings.base_url = v;
    }
    if let Some(v) = lookup("CLIENT__FACEBOOK_URL") {
        settings.facebook_url = v;
    }
    if let Some(v) = lookup("CLIENT__REALTIME_URL") {
        settings.realtime_url = v;
    }
    if let Some(v) = lookup("CLIENT__APEX_DOMAIN") {
        settings.apex_domain = v;
    }
    if let Some(v) = lookup("CLIENT__USER_AGENT") {
        settings.user_agent = Some(v);
    }
    if let Some(v) = lookup("CLIENT__COOKIE_PATH") {
        settings.cookie_path = Some(PathBuf::from(v));
    }

    if let Some(parsed) = lookup("CLIENT__RECONNECT_BACKOFF_MS").and_then(|v| v.parse().ok()) {
        settings.reconnect_backoff_ms = parsed;
    }
    if let Some(parsed) = lookup("CLIENT__KEEPALIVE_SECS").and_then(|v| v.parse().ok()) {
        settings.keepalive_secs = parsed;
    }
    if let Some(parsed) = lookup("CLIENT__EDGE_POOL_SIZE").and_then(|v| v.parse().ok()) {
        settings.edge_pool_size = parsed;
    }
    if let Some(parsed) = lookup("CLIENT__REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        settings.request_timeout_secs = parsed;
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
