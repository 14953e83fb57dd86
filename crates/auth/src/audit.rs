use std::net::IpAddr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use backoffice_core::UserId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    LoginSucceeded,
    LoginFailed,
    /// This failure crossed the threshold.
    AccountLocked,
    LoginRejectedLocked,
    LoginRejectedDisabled,
    TokenRefreshed,
    Registered,
    LoggedOut,
}

/// Outcome of an authentication step, for external logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub email: String,
    pub user_id: Option<UserId>,
    pub client_ip: Option<IpAddr>,
    pub occurred_at: DateTime<Utc>,
}

/// Sink for authentication events.
///
/// The core only emits; formatting and persistence belong to the sink.
pub trait AuthEventSink: Send + Sync + 'static {
    fn emit(&self, event: AuthEvent);
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuthEventSink {
    inner: Mutex<Vec<AuthEvent>>,
}

impl InMemoryAuthEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<AuthEvent> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn kinds(&self) -> Vec<AuthEventKind> {
        self.all().into_iter().map(|e| e.kind).collect()
    }
}

impl AuthEventSink for InMemoryAuthEventSink {
    fn emit(&self, event: AuthEvent) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
