// src/services/identity.rs
//! Maps a provider profile onto exactly one local account.
//!
//! Lookup order is provider identity, then email, then create. Two callbacks
//! for the same new identity can race; the loser's insert fails the unique
//! constraint and the whole sequence runs once more, which then finds the
//! winner's row.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::models::User;
use crate::common::safe_email_log;
use crate::services::providers::ProviderProfile;
use crate::services::users::{LinkOutcome, StoreError, UserStore};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("account is deactivated")]
    Inactive,

    #[error("user store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn UserStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// Finds, links, or creates the account for `profile` and records the login
    pub async fn resolve(&self, profile: &ProviderProfile) -> Result<User, ResolveError> {
        match self.resolve_once(profile).await {
            Err(ResolveError::Store(StoreError::Conflict)) => {
                warn!(
                    provider = %profile.provider,
                    email = %safe_email_log(&profile.email),
                    "Concurrent account write detected, retrying resolution"
                );
                self.resolve_once(profile).await
            }
            other => other,
        }
    }

    async fn resolve_once(&self, profile: &ProviderProfile) -> Result<User, ResolveError> {
        if let Some(user) = self
            .store
            .find_by_provider_identity(profile.provider, &profile.provider_user_id)
            .await?
        {
            ensure_active(&user)?;
            debug!(user_id = %user.id, provider = %profile.provider, "Returning user matched by provider identity");
            return self.login(&user, profile).await;
        }

        if let Some(user) = self.store.find_by_email(&profile.email).await? {
            ensure_active(&user)?;
            let outcome = self
                .store
                .add_provider_link(&user.id, profile.provider, &profile.provider_user_id)
                .await?;
            if outcome == LinkOutcome::Linked {
                info!(
                    user_id = %user.id,
                    provider = %profile.provider,
                    "Merged provider identity into existing account by email"
                );
            }
            return self.login(&user, profile).await;
        }

        let user = self.store.create(profile).await?;
        Ok(user)
    }

    async fn login(&self, user: &User, profile: &ProviderProfile) -> Result<User, ResolveError> {
        let user = self
            .store
            .record_login(&user.id, &profile.name, profile.avatar_url.as_deref())
            .await?;
        Ok(user)
    }
}

fn ensure_active(user: &User) -> Result<(), ResolveError> {
    if user.is_active {
        Ok(())
    } else {
        warn!(user_id = %user.id, "Login attempt for deactivated account");
        Err(ResolveError::Inactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::UserStats;
    use crate::services::providers::Provider;
    use crate::services::users::test_support::{profile, setup_file_db, setup_test_db};
    use crate::services::users::SqliteUserStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn resolver() -> (IdentityResolver, sqlx::SqlitePool) {
        let pool = setup_test_db().await;
        let store: Arc<dyn UserStore> = Arc::new(SqliteUserStore::new(pool.clone()));
        (IdentityResolver::new(store), pool)
    }

    #[tokio::test]
    async fn test_first_login_creates_account() {
        let (resolver, _pool) = resolver().await;

        let user = resolver
            .resolve(&profile(Provider::Google, "g-42", "a@x.com", "A"))
            .await
            .unwrap();

        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.login_count, 1);
        assert_eq!(user.provider_names(), vec!["google"]);
    }

    #[tokio::test]
    async fn test_repeat_login_returns_same_account() {
        let (resolver, _pool) = resolver().await;
        let p = profile(Provider::Google, "g-42", "a@x.com", "A");

        let first = resolver.resolve(&p).await.unwrap();
        let second = resolver.resolve(&p).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.login_count, 2);
        assert_eq!(second.providers.len(), 1);
        assert_eq!(resolver.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_provider_with_same_email_merges() {
        let (resolver, _pool) = resolver().await;

        let google = resolver
            .resolve(&profile(Provider::Google, "g-42", "a@x.com", "A"))
            .await
            .unwrap();
        let github = resolver
            .resolve(&profile(Provider::GitHub, "7", "A@X.com", "octo"))
            .await
            .unwrap();

        assert_eq!(google.id, github.id);
        assert_eq!(github.provider_names(), vec!["google", "github"]);
        assert_eq!(github.login_count, 2);
        // Last provider's display name wins
        assert_eq!(github.name, "octo");
        assert_eq!(resolver.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_email_for_known_identity_keeps_account() {
        let (resolver, _pool) = resolver().await;

        let before = resolver
            .resolve(&profile(Provider::Google, "g-42", "a@x.com", "A"))
            .await
            .unwrap();
        let after = resolver
            .resolve(&profile(Provider::Google, "g-42", "renamed@x.com", "A"))
            .await
            .unwrap();

        assert_eq!(before.id, after.id);
        assert_eq!(after.email, "a@x.com");
    }

    #[tokio::test]
    async fn test_inactive_account_is_refused() {
        let (resolver, pool) = resolver().await;
        let p = profile(Provider::Facebook, "fb-1", "b@x.com", "B");

        let user = resolver.resolve(&p).await.unwrap();
        sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?")
            .bind(&user.id)
            .execute(&pool)
            .await
            .unwrap();

        assert!(matches!(
            resolver.resolve(&p).await,
            Err(ResolveError::Inactive)
        ));
        // Via the email path as well
        assert!(matches!(
            resolver
                .resolve(&profile(Provider::Google, "g-9", "b@x.com", "B"))
                .await,
            Err(ResolveError::Inactive)
        ));

        let unchanged = resolver.store().find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(unchanged.login_count, 1);
        assert!(!unchanged.has_provider(Provider::Google));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_logins_resolve_to_one_account() {
        let (pool, path) = setup_file_db(8).await;
        let store: Arc<dyn UserStore> = Arc::new(SqliteUserStore::new(pool.clone()));
        let resolver = Arc::new(IdentityResolver::new(store.clone()));

        for n in 0..20 {
            let p = profile(
                Provider::GitHub,
                &format!("gh-{}", n),
                &format!("user{}@x.com", n),
                "C",
            );
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let resolver = resolver.clone();
                    let p = p.clone();
                    tokio::spawn(async move { resolver.resolve(&p).await })
                })
                .collect();

            let mut ids = HashSet::new();
            for handle in handles {
                ids.insert(handle.await.unwrap().unwrap().id);
            }
            assert_eq!(ids.len(), 1, "identity gh-{} split across accounts", n);
        }

        assert_eq!(store.count().await.unwrap(), 20);
        pool.close().await;
        let _ = std::fs::remove_file(&path);
    }

    /// Store whose first `create` loses a race against another writer
    struct RacingStore {
        inner: SqliteUserStore,
        creates: AtomicUsize,
    }

    #[async_trait]
    impl UserStore for RacingStore {
        async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_provider_identity(
            &self,
            provider: Provider,
            provider_user_id: &str,
        ) -> Result<Option<User>, StoreError> {
            self.inner
                .find_by_provider_identity(provider, provider_user_id)
                .await
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_by_email(email).await
        }

        async fn create(&self, profile: &ProviderProfile) -> Result<User, StoreError> {
            if self.creates.fetch_add(1, Ordering::SeqCst) == 0 {
                // The other writer commits first
                self.inner.create(profile).await?;
                return Err(StoreError::Conflict);
            }
            self.inner.create(profile).await
        }

        async fn add_provider_link(
            &self,
            user_id: &str,
            provider: Provider,
            provider_user_id: &str,
        ) -> Result<LinkOutcome, StoreError> {
            self.inner
                .add_provider_link(user_id, provider, provider_user_id)
                .await
        }

        async fn record_login(
            &self,
            user_id: &str,
            name: &str,
            avatar: Option<&str>,
        ) -> Result<User, StoreError> {
            self.inner.record_login(user_id, name, avatar).await
        }

        async fn count(&self) -> Result<i64, StoreError> {
            self.inner.count().await
        }

        async fn stats(&self) -> Result<UserStats, StoreError> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_conflict_retries_lookup_once() {
        let store = Arc::new(RacingStore {
            inner: SqliteUserStore::new(setup_test_db().await),
            creates: AtomicUsize::new(0),
        });
        let resolver = IdentityResolver::new(store.clone());

        let user = resolver
            .resolve(&profile(Provider::Google, "g-1", "d@x.com", "D"))
            .await
            .unwrap();

        assert_eq!(user.email, "d@x.com");
        assert_eq!(user.login_count, 2, "retry found the winner and logged in");
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
