// Application state shared across all modules

use sqlx::SqlitePool;
use std::sync::Arc;

use super::config::AppConfig;
use crate::auth::flow::OAuthFlow;
use crate::auth::oauth_state::OAuthStateStore;
use crate::services::identity::IdentityResolver;
use crate::services::providers::ProviderRegistry;
use crate::services::tokens::TokenService;
use crate::services::users::{SqliteUserStore, UserStore};

/// Application state containing services and configuration.
/// Built once at startup and shared read-only.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<TokenService>,
    pub flow: Arc<OAuthFlow>,
}

impl AppState {
    /// Wires the services on top of an already migrated pool
    pub fn new(db: SqlitePool, config: AppConfig, providers: ProviderRegistry) -> Self {
        let users: Arc<dyn UserStore> = Arc::new(SqliteUserStore::new(db.clone()));
        let tokens = Arc::new(TokenService::new(&config.jwt));
        let flow = Arc::new(OAuthFlow::new(
            providers,
            OAuthStateStore::new(db),
            IdentityResolver::new(users.clone()),
            tokens.clone(),
            config.state_ttl,
        ));

        Self {
            config: Arc::new(config),
            users,
            tokens,
            flow,
        }
    }
}
