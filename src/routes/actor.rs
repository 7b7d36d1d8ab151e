use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{error::AppError, state::session::Actor};

/// Authenticated user id, set by the upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Display name of the user; falls back to the user id.
pub const USER_NAME_HEADER: &str = "x-user-name";
/// Tenant of the user.
pub const ACCOUNT_ID_HEADER: &str = "x-account-id";

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };

        let user_id = header(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("missing `{USER_ID_HEADER}` header")))?;
        let account_id = header(ACCOUNT_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(format!("missing `{ACCOUNT_ID_HEADER}` header"))
        })?;
        let display_name = header(USER_NAME_HEADER).unwrap_or_else(|| user_id.clone());

        Ok(Actor {
            user_id,
            display_name,
            account_id,
        })
    }
}
