//! Authentication handlers

use axum::{
    extract::{rejection::QueryRejection, Extension, Json, Path, Query},
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::extractors::AuthedUser;
use super::flow::FlowError;
use super::models::CallbackParams;
use super::oauth_state::{
    clear_session_cookie, new_session_id, session_cookie, session_id_from_jar,
};
use crate::common::{safe_email_log, ApiError, AppState};
use crate::services::providers::Provider;

fn parse_provider(raw: &str) -> Result<Provider, ApiError> {
    raw.parse::<Provider>().map_err(|_| {
        warn!(provider = %raw, "Request for unsupported OAuth provider");
        ApiError::NotFound(format!("Unknown provider: {}", raw))
    })
}

/// 302 redirect that also sets one cookie
fn found(location: &str, jar: CookieJar, cookie: Cookie<'static>) -> Response {
    (
        StatusCode::FOUND,
        jar.add(cookie),
        [(LOCATION, location.to_string())],
    )
        .into_response()
}

/// GET /auth/:provider
/// Starts the authorization-code flow and redirects the browser to the provider
pub async fn oauth_start(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;

    // Reusing the cookie makes a second initiation replace the first nonce
    let session_id = session_id_from_jar(&jar).unwrap_or_else(new_session_id);

    let start = state
        .flow
        .begin(provider, &session_id)
        .await
        .map_err(|e| match e {
            FlowError::ProviderUnavailable(p) => {
                warn!(provider = %p, "OAuth initiation for unconfigured provider");
                ApiError::NotFound(format!("Provider {} is not configured", p))
            }
            other => {
                error!(error = %other, provider = %provider, "Failed to start OAuth flow");
                ApiError::InternalServer("Failed to start login".to_string())
            }
        })?;

    info!(provider = %provider, "Redirecting to provider authorization page");

    let cookie = session_cookie(
        session_id,
        state.config.state_ttl,
        state.config.cookie_secure,
    );
    Ok(found(&start.authorization_url, jar, cookie))
}

/// GET /auth/:provider/callback
/// Completes the flow and redirects to the frontend with the session token or an error code
pub async fn oauth_callback(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    jar: CookieJar,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;
    let session_id = session_id_from_jar(&jar);

    // An unparseable query still spends the nonce and fails as a missing code
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            warn!(provider = %provider, error = %rejection, "Malformed OAuth callback query");
            CallbackParams::default()
        }
    };
    let frontend = &state.config.frontend_url;
    let clear = clear_session_cookie(state.config.cookie_secure);

    match state
        .flow
        .complete(provider, session_id.as_deref(), &params)
        .await
    {
        Ok(done) => {
            info!(
                provider = %provider,
                user_id = %done.user.id,
                email = %safe_email_log(&done.user.email),
                "Login successful, redirecting to frontend"
            );
            let location = format!(
                "{}/auth-success?token={}",
                frontend,
                urlencoding::encode(&done.token)
            );
            Ok(found(&location, jar, clear))
        }
        Err(FlowError::ProviderUnavailable(p)) => {
            warn!(provider = %p, "OAuth callback for unconfigured provider");
            Err(ApiError::NotFound(format!("Provider {} is not configured", p)))
        }
        Err(e) => {
            warn!(
                provider = %provider,
                stage = %e.stage(),
                code = e.code(),
                error = %e,
                "OAuth login failed"
            );
            let location = format!("{}/login?error={}", frontend, e.code());
            Ok(found(&location, jar, clear))
        }
    }
}

/// GET /api/auth/profile
/// Returns the authenticated user's profile
///
/// # Response
/// ```json
/// {
///   "success": true,
///   "user": { "id": "...", "email": "...", "providers": ["google"], ... }
/// }
/// ```
pub async fn profile_handler(authed: AuthedUser) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(json!({
        "success": true,
        "user": authed.user.public_profile(),
    })))
}

/// POST /api/auth/logout
/// Session tokens are discarded client-side; this drops any pending OAuth
/// state and the browser's OAuth session cookie.
pub async fn logout_handler(
    Extension(state): Extension<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    if let Some(session_id) = session_id_from_jar(&jar) {
        state.flow.states().consume(&session_id).await?;
    }

    info!("User logout successful");

    let body = Json(json!({
        "success": true,
        "message": "Logout successful",
    }));
    Ok((jar.add(clear_session_cookie(state.config.cookie_secure)), body).into_response())
}

/// GET /api/auth/stats
/// Account totals per provider; admin only
pub async fn stats_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !authed.is_admin {
        warn!(user_id = %authed.user.id, "Non-admin user requested auth stats");
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    let stats = state.users.stats().await.map_err(|e| {
        error!(error = %e, "Failed to load user stats");
        ApiError::InternalServer("Failed to load stats".to_string())
    })?;

    Ok(Json(json!({
        "success": true,
        "stats": stats,
    })))
}

/// GET /api/auth/health
pub async fn health_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let users = state.users.count().await.map_err(|e| {
        error!(error = %e, "Health check could not count users");
        ApiError::InternalServer("Database unavailable".to_string())
    })?;

    let mut providers = serde_json::Map::new();
    for provider in Provider::ALL {
        providers.insert(
            provider.as_str().to_string(),
            json!(state.config.provider(provider).is_some()),
        );
    }

    Ok(Json(json!({
        "success": true,
        "status": "ok",
        "users": users,
        "providers": providers,
        "jwtConfigured": !state.config.jwt.secret.is_empty(),
    })))
}
