//! Client for the messaging web service: login and session bootstrap, the
//! authenticated request engine, batched queries and the realtime channel.

pub mod batch;
pub mod bootstrap;
pub mod checkpoint;
pub mod config;
pub mod cookies;
pub mod error;
pub mod markup;
pub mod realtime;
pub mod retry;
pub mod service;
pub mod session;

pub use batch::{BatchedQuery, QueryBatcher};
pub use config::{load_settings, load_settings_from, ClientSettings};
pub use cookies::{CookieJar, CookieStorage, FileCookieStorage};
pub use error::{MqttError, RealtimeError, SessionError};
pub use realtime::{ChannelOptions, ChannelState, EventSink, RealtimeChannel, RealtimeCursor};
pub use session::{Credentials, Session, SessionBuilder, TwoFactorProvider, UploadFile};

#[cfg(test)]
#[path = "tests/mock_service.rs"]
mod mock_service;
