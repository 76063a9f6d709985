//! Recovery rules shared by the request engine and the realtime channel.

use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RealtimeError, SessionError};

/// What a caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Re-bootstrap the token from the current cookies and repeat the call once.
    RefreshAndRetry,
    /// Tear down the realtime transport and connect again after the backoff.
    Reconnect,
    Fatal,
}

pub fn session_recovery(err: &SessionError) -> Recovery {
    if err.is_stale() {
        Recovery::RefreshAndRetry
    } else {
        Recovery::Fatal
    }
}

pub fn realtime_recovery(err: &RealtimeError) -> Recovery {
    if err.is_fatal() {
        Recovery::Fatal
    } else {
        Recovery::Reconnect
    }
}

/// Fixed delay between realtime reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub backoff: Duration,
}

impl ReconnectPolicy {
    pub fn fixed(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// Sleeps for the backoff; returns `false` when cancelled first.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

/// Runs `op`, and when it fails with a stale session runs `refresh` and then
/// `op` exactly once more. A second stale result is returned to the caller.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_after_refresh<T, Op, Fut, Refresh, RefreshFut>(
    mut op: Op,
    refresh: Refresh,
) -> Result<T, SessionError>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
    Refresh: FnOnce() -> RefreshFut,
    RefreshFut: Future<Output = Result<(), SessionError>>,
{
    match op(1).await {
        Err(err) if session_recovery(&err) == Recovery::RefreshAndRetry => {
            debug!(event = "session_stale", error = %err, "refreshing before retry");
            refresh().await?;
            op(2).await
        }
        other => other,
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
