//! Every service-specific string the protocol layer depends on.
//!
//! The service is undocumented and changes without notice; paths, form field
//! names, topics and query ids live here so that drift touches one file.

pub const LOGIN_PATH: &str = "/login/password/";
pub const LOGIN_PROBE_PATH: &str = "/login/";
pub const LOGOUT_PATH: &str = "/logout/";
pub const AUTH_TOKEN_PATH: &str = "/login/auth_token/";
pub const GRAPHQL_BATCH_PATH: &str = "/api/graphqlbatch/";
pub const CHECKPOINT_MARKER: &str = "checkpoint";
pub const CHECKPOINT_NEXT_PARAM: &str = "next";
pub const USER_ID_COOKIE: &str = "c_user";
pub const CSRF_FIELD: &str = "fb_dtsg";

/// Subdomains of the apex that receive imported cookies, besides the
/// numbered `N-edge-chat` pool.
pub const COOKIE_SUBDOMAINS: [&str; 4] = ["www", "m", "upload", "edge-chat"];
pub const EDGE_POOL_SUFFIX: &str = "edge-chat";

pub fn login_form(identifier: &str, secret: &str) -> Vec<(String, String)> {
    [
        ("initial_request_id", "x"),
        ("lgnjs", "n"),
        ("email", identifier),
        ("pass", secret),
        ("login", "1"),
        ("persistent", "1"),
        ("default_persistent", "0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Placeholder for form controls that carry no `value` attribute; the real
/// values are localized client-side and never present in the raw markup.
pub const FORM_VALUE_MISSING: &str = "[missing]";

/// Field names distinguishing the checkpoint sub-screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointMarkup {
    pub version: u32,
    pub code_field: &'static str,
    pub remember_device_field: &'static str,
    pub remember_device_decline: &'static str,
    pub review_confirm_field: &'static str,
    pub review_deny_field: &'static str,
    pub review_confirm_value: &'static str,
    pub locked_field: &'static str,
}

pub const CHECKPOINT_MARKUP_V1: CheckpointMarkup = CheckpointMarkup {
    version: 1,
    code_field: "approvals_code",
    remember_device_field: "name_action_selected",
    remember_device_decline: "dont_save",
    review_confirm_field: "submit[This was me]",
    review_deny_field: "submit[This wasn't me]",
    review_confirm_value: "[any value]",
    locked_field: "verification_method",
};

pub const CHECKPOINT_MARKUP: CheckpointMarkup = CHECKPOINT_MARKUP_V1;

/// Define-blob entries holding the CSRF token, newest name first.
pub const TOKEN_DEFINES: [&str; 2] = ["DTSGInitialData", "DTSGInitData"];
pub const REVISION_DEFINE: &str = "SiteData";
pub const REVISION_KEY: &str = "client_revision";

pub const MQTT_CLIENT_ID: &str = "mqttwsclient";
pub const MQTT_SUBPROTOCOL: &str = "mqtt";
pub const APP_ID: u64 = 219994525426954;

pub const TOPIC_DELTAS: &str = "/t_ms";
pub const TOPIC_THREAD_TYPING: &str = "/thread_typing";
pub const TOPIC_ORCA_TYPING: &str = "/orca_typing_notifications";
pub const TOPIC_PRESENCE: &str = "/orca_presence";
pub const TOPIC_NOTIFY_DISCONNECT: &str = "/notify_disconnect";
pub const SUBSCRIBE_TOPICS: [&str; 5] = [
    TOPIC_DELTAS,
    TOPIC_THREAD_TYPING,
    TOPIC_ORCA_TYPING,
    TOPIC_PRESENCE,
    TOPIC_NOTIFY_DISCONNECT,
];
/// Noisy legacy topic the server subscribes new connections to.
pub const LEGACY_TOPIC: &str = "/orca_message_notifications";

pub const TOPIC_CREATE_QUEUE: &str = "/messenger_sync_create_queue";
pub const TOPIC_GET_DIFFS: &str = "/messenger_sync_get_diffs";
pub const TOPIC_FOREGROUND: &str = "/foreground_state";
pub const TOPIC_CLIENT_SETTINGS: &str = "/set_client_settings";

pub const SYNC_API_VERSION: u32 = 10;
pub const MAX_DELTAS_ABLE_TO_PROCESS: u32 = 1000;
pub const DELTA_BATCH_SIZE: u32 = 500;
pub const SYNC_ENCODING: &str = "JSON";

/// Thread list query; with `limit: 0` it only returns the sync sequence id.
pub const THREAD_LIST_DOC_ID: &str = "1349387578499440";

pub const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
];
