// src/services/users.rs
//! User store: local accounts and their linked provider identities.

use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::auth::models::{ProviderLink, ProviderLinkRow, User, UserRow, UserStats};
use crate::common::{generate_user_id, safe_email_log};
use crate::services::providers::{Provider, ProviderProfile};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write; the caller should look up again
    #[error("record already exists")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Database(e),
        }
    }
}

/// Result of linking a provider identity to an existing user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// This exact identity was already on the user
    AlreadyLinked,
    /// The user already holds a different identity for this provider; nothing changed
    ProviderAlreadyLinked,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_provider_identity(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Case-insensitive lookup
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Creates a user holding exactly one provider link, `login_count = 1`
    async fn create(&self, profile: &ProviderProfile) -> Result<User, StoreError>;

    async fn add_provider_link(
        &self,
        user_id: &str,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<LinkOutcome, StoreError>;

    /// Bumps the login counters and refreshes display metadata
    async fn record_login(
        &self,
        user_id: &str,
        name: &str,
        avatar: Option<&str>,
    ) -> Result<User, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;

    async fn stats(&self) -> Result<UserStats, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_links(&self, user_id: &str) -> Result<Vec<ProviderLink>, StoreError> {
        let rows = sqlx::query_as::<_, ProviderLinkRow>(
            "SELECT provider, provider_user_id, linked_at FROM user_providers WHERE user_id = ? ORDER BY rowid",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut links = Vec::with_capacity(rows.len());
        for row in rows {
            match row.provider.parse::<Provider>() {
                Ok(provider) => links.push(ProviderLink {
                    provider,
                    provider_user_id: row.provider_user_id,
                    linked_at: row.linked_at,
                }),
                Err(e) => warn!(user_id = %user_id, error = %e, "Skipping unknown provider link"),
            }
        }
        Ok(links)
    }

    async fn hydrate(&self, row: Option<UserRow>) -> Result<Option<User>, StoreError> {
        match row {
            Some(row) => {
                let links = self.load_links(&row.id).await?;
                Ok(Some(User::from_row(row, links)))
            }
            None => Ok(None),
        }
    }

    async fn require(&self, user_id: &str) -> Result<User, StoreError> {
        self.find_by_id(user_id)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn find_by_provider_identity(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.* FROM users u
            JOIN user_providers p ON p.user_id = u.id
            WHERE p.provider = ? AND p.provider_user_id = ?
            "#,
        )
        .bind(provider.as_str())
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        debug!(
            provider = %provider,
            provider_user_id = %provider_user_id,
            found = row.is_some(),
            "Looked up user by provider identity"
        );
        self.hydrate(row).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        // users.email is COLLATE NOCASE
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await?;

        debug!(
            email = %safe_email_log(email),
            found = row.is_some(),
            "Looked up user by email"
        );
        self.hydrate(row).await
    }

    async fn create(&self, profile: &ProviderProfile) -> Result<User, StoreError> {
        let id = generate_user_id();
        let email = profile.email.trim().to_lowercase();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, avatar, login_count, last_login_at)
            VALUES (?, ?, ?, ?, 1, datetime('now'))
            "#,
        )
        .bind(&id)
        .bind(&email)
        .bind(&profile.name)
        .bind(profile.avatar_url.as_deref())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO user_providers (user_id, provider, provider_user_id) VALUES (?, ?, ?)",
        )
        .bind(&id)
        .bind(profile.provider.as_str())
        .bind(&profile.provider_user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            user_id = %id,
            email = %safe_email_log(&email),
            provider = %profile.provider,
            "Created new user account"
        );

        self.require(&id).await
    }

    async fn add_provider_link(
        &self,
        user_id: &str,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<LinkOutcome, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_providers (user_id, provider, provider_user_id) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .bind(provider_user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            info!(user_id = %user_id, provider = %provider, "Linked provider to existing user");
            return Ok(LinkOutcome::Linked);
        }

        // Ignored: find out which uniqueness rule applied
        let owner: Option<(String,)> = sqlx::query_as(
            "SELECT user_id FROM user_providers WHERE provider = ? AND provider_user_id = ?",
        )
        .bind(provider.as_str())
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        match owner {
            Some((owner_id,)) if owner_id == user_id => Ok(LinkOutcome::AlreadyLinked),
            Some((owner_id,)) => {
                warn!(
                    user_id = %user_id,
                    owner_id = %owner_id,
                    provider = %provider,
                    "Provider identity already belongs to another user"
                );
                Err(StoreError::Conflict)
            }
            None => {
                warn!(
                    user_id = %user_id,
                    provider = %provider,
                    "User already has a different identity for this provider, link skipped"
                );
                Ok(LinkOutcome::ProviderAlreadyLinked)
            }
        }
    }

    async fn record_login(
        &self,
        user_id: &str,
        name: &str,
        avatar: Option<&str>,
    ) -> Result<User, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                login_count = login_count + 1,
                last_login_at = datetime('now'),
                name = ?,
                avatar = COALESCE(?, avatar),
                updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(avatar)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            error!(user_id = %user_id, "Login recorded for a user that does not exist");
            return Err(StoreError::Database(sqlx::Error::RowNotFound));
        }

        self.require(user_id).await
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn stats(&self) -> Result<UserStats, StoreError> {
        let (total_users, active_users): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM users")
                .fetch_one(&self.pool)
                .await?;

        let per_provider: Vec<(String, i64)> = sqlx::query_as(
            "SELECT provider, COUNT(DISTINCT user_id) FROM user_providers GROUP BY provider",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = UserStats {
            total_users,
            active_users,
            ..UserStats::default()
        };
        for (provider, count) in per_provider {
            match provider.parse::<Provider>() {
                Ok(Provider::Google) => stats.google_users = count,
                Ok(Provider::Facebook) => stats.facebook_users = count,
                Ok(Provider::GitHub) => stats.github_users = count,
                Err(_) => {}
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::common::migrations::run_migrations;
    use crate::services::providers::{Provider, ProviderProfile};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::SqlitePool;
    use std::path::PathBuf;
    use std::time::Duration;
    use uuid::Uuid;

    /// Single-connection in-memory database with the real schema
    pub async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool, false).await.unwrap();
        pool
    }

    /// File-backed database so several connections write concurrently
    pub async fn setup_file_db(max_connections: u32) -> (SqlitePool, PathBuf) {
        let path = std::env::temp_dir().join(format!("claims_auth_{}.db", Uuid::new_v4()));
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .unwrap();
        run_migrations(&pool, false).await.unwrap();
        (pool, path)
    }

    pub fn profile(provider: Provider, id: &str, email: &str, name: &str) -> ProviderProfile {
        ProviderProfile {
            provider,
            provider_user_id: id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            avatar_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{profile, setup_test_db};
    use super::*;

    #[tokio::test]
    async fn test_create_and_find() {
        let store = SqliteUserStore::new(setup_test_db().await);

        let created = store
            .create(&profile(Provider::Google, "g-42", "a@x.com", "A"))
            .await
            .unwrap();
        assert!(created.id.starts_with("U_"));
        assert_eq!(created.login_count, 1);
        assert!(created.is_active);
        assert_eq!(created.providers.len(), 1);
        assert_eq!(created.providers[0].provider, Provider::Google);
        assert_eq!(created.providers[0].provider_user_id, "g-42");

        let by_identity = store
            .find_by_provider_identity(Provider::Google, "g-42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_identity.id, created.id);

        let by_email = store.find_by_email("A@X.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, created.id);

        assert!(store
            .find_by_provider_identity(Provider::GitHub, "g-42")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_identity_is_conflict() {
        let store = SqliteUserStore::new(setup_test_db().await);

        store
            .create(&profile(Provider::Google, "g-1", "a@x.com", "A"))
            .await
            .unwrap();

        let same_identity = store
            .create(&profile(Provider::Google, "g-1", "other@x.com", "B"))
            .await;
        assert!(matches!(same_identity, Err(StoreError::Conflict)));

        let same_email = store
            .create(&profile(Provider::GitHub, "gh-1", "A@x.com", "A"))
            .await;
        assert!(matches!(same_email, Err(StoreError::Conflict)));

        // The failed transaction left nothing behind
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store
            .find_by_email("other@x.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_add_provider_link_is_idempotent() {
        let store = SqliteUserStore::new(setup_test_db().await);
        let user = store
            .create(&profile(Provider::Google, "g-42", "a@x.com", "A"))
            .await
            .unwrap();

        assert_eq!(
            store
                .add_provider_link(&user.id, Provider::GitHub, "gh-7")
                .await
                .unwrap(),
            LinkOutcome::Linked
        );
        assert_eq!(
            store
                .add_provider_link(&user.id, Provider::GitHub, "gh-7")
                .await
                .unwrap(),
            LinkOutcome::AlreadyLinked
        );
        assert_eq!(
            store
                .add_provider_link(&user.id, Provider::GitHub, "gh-8")
                .await
                .unwrap(),
            LinkOutcome::ProviderAlreadyLinked
        );

        let user = store.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(user.provider_names(), vec!["google", "github"]);
    }

    #[tokio::test]
    async fn test_link_owned_by_other_user_is_conflict() {
        let store = SqliteUserStore::new(setup_test_db().await);
        let first = store
            .create(&profile(Provider::Google, "g-1", "a@x.com", "A"))
            .await
            .unwrap();
        store
            .create(&profile(Provider::GitHub, "gh-1", "b@x.com", "B"))
            .await
            .unwrap();

        let result = store
            .add_provider_link(&first.id, Provider::GitHub, "gh-1")
            .await;
        assert!(matches!(result, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn test_record_login_updates_counters_and_display_data() {
        let store = SqliteUserStore::new(setup_test_db().await);
        let user = store
            .create(&profile(Provider::Google, "g-1", "a@x.com", "A"))
            .await
            .unwrap();

        let updated = store
            .record_login(&user.id, "A. Person", Some("https://img.example.com/a.png"))
            .await
            .unwrap();
        assert_eq!(updated.login_count, 2);
        assert_eq!(updated.name, "A. Person");
        assert_eq!(
            updated.avatar.as_deref(),
            Some("https://img.example.com/a.png")
        );

        // A provider without an avatar keeps the stored one
        let updated = store.record_login(&user.id, "A", None).await.unwrap();
        assert_eq!(updated.login_count, 3);
        assert_eq!(
            updated.avatar.as_deref(),
            Some("https://img.example.com/a.png")
        );

        let missing = store.record_login("U_MISSING", "x", None).await;
        assert!(matches!(missing, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn test_stats() {
        let pool = setup_test_db().await;
        let store = SqliteUserStore::new(pool.clone());

        let a = store
            .create(&profile(Provider::Google, "g-1", "a@x.com", "A"))
            .await
            .unwrap();
        store
            .add_provider_link(&a.id, Provider::GitHub, "gh-1")
            .await
            .unwrap();
        let b = store
            .create(&profile(Provider::Facebook, "fb-1", "b@x.com", "B"))
            .await
            .unwrap();
        sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?")
            .bind(&b.id)
            .execute(&pool)
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            UserStats {
                total_users: 2,
                active_users: 1,
                google_users: 1,
                facebook_users: 1,
                github_users: 1,
            }
        );
    }
}
