//! CSRF state nonces for the authorization-code flow.
//!
//! Each browser gets a random `oauth_session` cookie. The nonce sent to the
//! provider is stored server-side under that session id, one slot per
//! session, and is removed the first time a callback reads it.

use axum_extra::extract::cookie::CookieJar;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use cookie::{time, Cookie, SameSite};
use rand::{rngs::OsRng, RngCore};
use sqlx::{FromRow, SqlitePool};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::services::providers::Provider;

pub const SESSION_COOKIE: &str = "oauth_session";

/// Fresh 256-bit nonce, base64url without padding (43 chars)
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Cookie binding the browser to its pending nonce
pub fn session_cookie(session_id: String, ttl: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(secure)
        .max_age(time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX))
        .build()
}

pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    let mut cookie = session_cookie(String::new(), Duration::ZERO, secure);
    cookie.make_removal();
    cookie
}

pub fn session_id_from_jar(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| cookie.value().trim().to_string())
        .filter(|value| !value.is_empty())
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PendingState {
    pub state: String,
    pub provider: String,
    /// Unix seconds
    pub created_at: i64,
}

impl PendingState {
    pub fn is_expired(&self, ttl: Duration, now: i64) -> bool {
        now.saturating_sub(self.created_at) > ttl_secs(ttl)
    }

    pub fn is_for(&self, provider: Provider) -> bool {
        self.provider == provider.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct OAuthStateStore {
    pool: SqlitePool,
}

impl OAuthStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stores `state` as the session's pending nonce, replacing any older one
    pub async fn issue(
        &self,
        session_id: &str,
        provider: Provider,
        state: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO oauth_states (session_id, state, provider, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                state = excluded.state,
                provider = excluded.provider,
                created_at = excluded.created_at
            "#,
        )
        .bind(session_id)
        .bind(state)
        .bind(provider.as_str())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        debug!(provider = %provider, "Stored pending OAuth state");
        Ok(())
    }

    /// Removes and returns the session's pending nonce
    pub async fn consume(&self, session_id: &str) -> Result<Option<PendingState>, sqlx::Error> {
        sqlx::query_as::<_, PendingState>(
            "DELETE FROM oauth_states WHERE session_id = ? RETURNING state, provider, created_at",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Deletes nonces older than `ttl`, returning how many were removed
    pub async fn purge_expired(&self, ttl: Duration) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now().timestamp().saturating_sub(ttl_secs(ttl));
        let result = sqlx::query("DELETE FROM oauth_states WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "Purged expired OAuth states");
        }
        Ok(removed)
    }

    /// Spawns a task that purges expired nonces every `ttl`
    pub fn start_cleanup_task(self, ttl: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl.max(Duration::from_secs(1)));
            loop {
                interval.tick().await;
                if let Err(e) = self.purge_expired(ttl).await {
                    error!(error = %e, "Failed to purge expired OAuth states");
                }
            }
        })
    }
}
