//! Session extractors
//!
//! Sessions are issued by the authentication service; handlers only resolve
//! the `Authorization: Bearer <token>` header into the calling user.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use crate::api::AppState;
use crate::database::session_repository::SessionUser;
use crate::error::AppError;

/// Any signed-in user
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub SessionUser);

/// A signed-in user with the admin flag
#[derive(Debug, Clone)]
pub struct AdminUser(pub SessionUser);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(AppError::unauthenticated)?;

        match state.sessions.find_by_token(token).await? {
            Some(user) => Ok(Self(user)),
            None => {
                debug!("Rejected unknown or expired session token");
                Err(AppError::unauthenticated())
            }
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(user) = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(AppError::forbidden());
        }
        Ok(Self(user))
    }
}
