//! Consistent `{code, message}` error responses.

use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{async_trait, Json};
use serde::de::DeserializeOwned;
use serde_json::json;

use backoffice_auth::AuthError;
use backoffice_core::DomainError;

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "code": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials | AuthError::TokenExpired | AuthError::TokenInvalid => {
            StatusCode::UNAUTHORIZED
        }
        AuthError::AccountLocked
        | AuthError::AccountDisabled
        | AuthError::InsufficientPermission { .. } => StatusCode::FORBIDDEN,
        AuthError::Validation(_) | AuthError::WeakPassword(_) | AuthError::MenuCycle(_) => {
            StatusCode::BAD_REQUEST
        }
        AuthError::NotFound(_) => StatusCode::NOT_FOUND,
        AuthError::Duplicate(_) => StatusCode::CONFLICT,
        AuthError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Handler-level error: an [`AuthError`] rendered as an envelope.
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        json_error(status, self.0.code(), self.0.public_message())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Parse a path id, rejecting malformed input with a validation envelope.
pub fn parse_id<T>(raw: &str) -> ApiResult<T>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(|e| ApiError(e.into()))
}

/// `Json` whose rejection uses the error envelope.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError(AuthError::validation(rejection_message(&rejection)))),
        }
    }
}

fn rejection_message(rejection: &JsonRejection) -> String {
    rejection.body_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_the_taxonomy() {
        assert_eq!(status_for(&AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&AuthError::TokenExpired), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&AuthError::AccountLocked), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&AuthError::insufficient("users", "VIEW")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_for(&AuthError::duplicate("email")), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&AuthError::invalid_state("system role")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&AuthError::MenuCycle("loop".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn malformed_ids_are_validation_errors() {
        let err = parse_id::<backoffice_core::UserId>("not-a-uuid").unwrap_err();
        assert!(matches!(err.0, AuthError::Validation(_)));
    }
}
