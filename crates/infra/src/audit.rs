//! Authentication event sink that writes structured `tracing` events.

use backoffice_auth::{AuthEvent, AuthEventKind, AuthEventSink};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuthEventSink;

impl TracingAuthEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuthEventSink for TracingAuthEventSink {
    fn emit(&self, event: AuthEvent) {
        let user_id = event.user_id.map(|id| id.to_string());
        let client_ip = event.client_ip.map(|ip| ip.to_string());
        match event.kind {
            AuthEventKind::LoginFailed
            | AuthEventKind::AccountLocked
            | AuthEventKind::LoginRejectedLocked
            | AuthEventKind::LoginRejectedDisabled => tracing::warn!(
                target: "auth.audit",
                kind = ?event.kind,
                email = %event.email,
                user_id = user_id.as_deref(),
                client_ip = client_ip.as_deref(),
                occurred_at = %event.occurred_at,
                "authentication rejected"
            ),
            _ => tracing::info!(
                target: "auth.audit",
                kind = ?event.kind,
                email = %event.email,
                user_id = user_id.as_deref(),
                client_ip = client_ip.as_deref(),
                occurred_at = %event.occurred_at,
                "authentication event"
            ),
        }
    }
}
