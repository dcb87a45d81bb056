//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `GET /auth/:provider` - Start the OAuth flow
/// - `GET /auth/:provider/callback` - Provider redirect target
/// - `GET /api/auth/profile` - Current user's profile
/// - `POST /api/auth/logout` - Logout (client-side token removal)
/// - `GET /api/auth/stats` - Account statistics (admin)
/// - `GET /api/auth/health` - Service health
pub fn auth_routes() -> Router {
    Router::new()
        .route("/auth/:provider", get(handlers::oauth_start))
        .route("/auth/:provider/callback", get(handlers::oauth_callback))
        .route("/api/auth/profile", get(handlers::profile_handler))
        .route("/api/auth/logout", post(handlers::logout_handler))
        .route("/api/auth/stats", get(handlers::stats_handler))
        .route("/api/auth/health", get(handlers::health_handler))
}
