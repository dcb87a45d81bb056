//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::models::User;
use crate::common::{safe_email_log, ApiError, AppState};
use crate::services::tokens::VerifyError;
use crate::services::users::StoreError;

/// Authenticated user extractor
///
/// Validates the bearer session token and loads the account it names.
/// Inactive accounts are treated as missing.
#[derive(Debug)]
pub struct AuthedUser {
    pub user: User,
    pub is_admin: bool,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(app_state): Extension<Arc<AppState>> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let Some(token) = token else {
            warn!("Authentication failed: missing bearer token");
            return Err(ApiError::unauthorized(
                "missing_token",
                "Authorization header with a Bearer token is required",
            ));
        };

        let claims = app_state.tokens.verify(token).map_err(|e| match e {
            VerifyError::Expired => {
                ApiError::unauthorized("token_expired", "Session token has expired")
            }
            VerifyError::Malformed | VerifyError::Unknown => {
                ApiError::unauthorized("invalid_token", "Session token is invalid")
            }
        })?;

        let user = app_state
            .users
            .find_by_id(&claims.sub)
            .await
            .map_err(|e| {
                error!(error = %e, user_id = %claims.sub, "User lookup failed during authentication");
                match e {
                    StoreError::Database(db) => ApiError::DatabaseError(db),
                    StoreError::Conflict => ApiError::InternalServer("user lookup failed".into()),
                }
            })?;

        match user {
            Some(user) if user.is_active => {
                let is_admin = app_state
                    .config
                    .admin_emails
                    .contains(&user.email.to_lowercase());
                debug!(
                    user_id = %user.id,
                    email = %safe_email_log(&user.email),
                    is_admin = is_admin,
                    "User authentication successful via extractor"
                );
                Ok(AuthedUser { user, is_admin })
            }
            Some(user) => {
                warn!(user_id = %user.id, "Authentication failed: account is deactivated");
                Err(ApiError::unauthorized("user_not_found", "User not found"))
            }
            None => {
                warn!(user_id = %claims.sub, "Authentication failed: user not found in database");
                Err(ApiError::unauthorized("user_not_found", "User not found"))
            }
        }
    }
}
