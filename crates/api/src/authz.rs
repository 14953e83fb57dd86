//! Handler-side guard in front of every protected operation.

use backoffice_auth::{AuthorizationGate, Identity, MenuAction, ProtectedResource};

use crate::app::errors::ApiResult;

/// Require `action` on the named resource for the request's identity.
pub async fn require(
    gate: &AuthorizationGate,
    identity: &Identity,
    resource: &str,
    action: MenuAction,
) -> ApiResult<()> {
    gate.check(identity, &ProtectedResource::resource(resource), action)
        .await?;
    Ok(())
}
