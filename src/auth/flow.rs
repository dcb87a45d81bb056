//! Authorization-code flow orchestration.
//!
//! `begin` hands out the provider redirect and remembers the nonce.
//! `complete` runs the callback through state check, code exchange, profile
//! fetch, identity resolution and token issuance, stopping at the first
//! failing stage.

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::models::{CallbackParams, User};
use super::oauth_state::{generate_state, OAuthStateStore};
use crate::common::safe_email_log;
use crate::services::identity::{IdentityResolver, ResolveError};
use crate::services::providers::{Provider, ProviderError, ProviderRegistry};
use crate::services::tokens::{TokenError, TokenService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Initiated,
    AwaitingCallback,
    Exchanging,
    FetchingProfile,
    Resolving,
    Issuing,
    Completed,
}

impl FlowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStage::Initiated => "initiated",
            FlowStage::AwaitingCallback => "awaiting_callback",
            FlowStage::Exchanging => "exchanging",
            FlowStage::FetchingProfile => "fetching_profile",
            FlowStage::Resolving => "resolving",
            FlowStage::Issuing => "issuing",
            FlowStage::Completed => "completed",
        }
    }
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("provider {0} is not configured")]
    ProviderUnavailable(Provider),

    #[error("could not persist OAuth state: {0}")]
    StateStorage(#[source] sqlx::Error),

    #[error("provider denied authorization: {0}")]
    ProviderDenied(String),

    #[error("callback carries no authorization code")]
    MissingCode,

    #[error("state parameter does not match the pending request")]
    StateMismatch,

    #[error("code exchange failed: {0}")]
    ExchangeFailed(#[source] ProviderError),

    #[error("profile fetch failed: {0}")]
    ProfileFetchFailed(#[source] ProviderError),

    #[error("account is deactivated")]
    AccountInactive,

    #[error("identity resolution failed: {0}")]
    ResolutionFailed(#[source] ResolveError),

    #[error("token issuance failed: {0}")]
    IssuanceFailed(#[source] TokenError),
}

impl FlowError {
    /// Machine-readable code handed to the frontend
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::ProviderUnavailable(_) => "provider_unavailable",
            FlowError::StateStorage(_) => "internal_error",
            FlowError::ProviderDenied(_) => "provider_denied",
            FlowError::MissingCode => "missing_code",
            FlowError::StateMismatch => "state_mismatch",
            FlowError::ExchangeFailed(_) => "exchange_failed",
            FlowError::ProfileFetchFailed(_) => "profile_fetch_failed",
            FlowError::AccountInactive => "account_inactive",
            FlowError::ResolutionFailed(_) => "resolution_failed",
            FlowError::IssuanceFailed(_) => "issuance_failed",
        }
    }

    /// Stage the flow was in when it failed
    pub fn stage(&self) -> FlowStage {
        match self {
            FlowError::ProviderUnavailable(_) | FlowError::StateStorage(_) => FlowStage::Initiated,
            FlowError::ProviderDenied(_) | FlowError::MissingCode | FlowError::StateMismatch => {
                FlowStage::AwaitingCallback
            }
            FlowError::ExchangeFailed(_) => FlowStage::Exchanging,
            FlowError::ProfileFetchFailed(_) => FlowStage::FetchingProfile,
            FlowError::AccountInactive | FlowError::ResolutionFailed(_) => FlowStage::Resolving,
            FlowError::IssuanceFailed(_) => FlowStage::Issuing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowStart {
    pub authorization_url: String,
}

#[derive(Debug, Clone)]
pub struct FlowCompletion {
    pub user: User,
    pub token: String,
}

pub struct OAuthFlow {
    providers: ProviderRegistry,
    states: OAuthStateStore,
    resolver: IdentityResolver,
    tokens: Arc<TokenService>,
    state_ttl: Duration,
}

impl OAuthFlow {
    pub fn new(
        providers: ProviderRegistry,
        states: OAuthStateStore,
        resolver: IdentityResolver,
        tokens: Arc<TokenService>,
        state_ttl: Duration,
    ) -> Self {
        Self {
            providers,
            states,
            resolver,
            tokens,
            state_ttl,
        }
    }

    pub fn states(&self) -> &OAuthStateStore {
        &self.states
    }

    /// Generates and stores a nonce for `session_id` and returns the provider redirect
    pub async fn begin(&self, provider: Provider, session_id: &str) -> Result<FlowStart, FlowError> {
        let client = self
            .providers
            .get(provider)
            .ok_or(FlowError::ProviderUnavailable(provider))?;

        let state = generate_state();
        self.states
            .issue(session_id, provider, &state)
            .await
            .map_err(|e| {
                error!(error = %e, provider = %provider, "Failed to store OAuth state");
                FlowError::StateStorage(e)
            })?;

        debug!(provider = %provider, stage = %FlowStage::AwaitingCallback, "OAuth flow initiated");

        Ok(FlowStart {
            authorization_url: client.authorization_url(&state),
        })
    }

    /// Handles the provider callback for the browser identified by `session_id`
    pub async fn complete(
        &self,
        provider: Provider,
        session_id: Option<&str>,
        params: &CallbackParams,
    ) -> Result<FlowCompletion, FlowError> {
        let client = self
            .providers
            .get(provider)
            .ok_or(FlowError::ProviderUnavailable(provider))?;

        // The nonce is spent whatever happens next
        let pending = match session_id {
            Some(id) => self.states.consume(id).await.unwrap_or_else(|e| {
                error!(error = %e, "Failed to read pending OAuth state");
                None
            }),
            None => None,
        };

        if let Some(reason) = &params.error {
            warn!(
                provider = %provider,
                oauth_error = %reason,
                description = ?params.error_description,
                "Provider returned an error to the callback"
            );
            return Err(FlowError::ProviderDenied(reason.clone()));
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(FlowError::MissingCode)?;

        let state_ok = match (&pending, params.state.as_deref()) {
            (Some(pending), Some(received)) => {
                pending.is_for(provider)
                    && !pending.is_expired(self.state_ttl, Utc::now().timestamp())
                    && pending.state == received
            }
            _ => false,
        };
        if !state_ok {
            warn!(
                provider = %provider,
                has_pending = pending.is_some(),
                has_state = params.state.is_some(),
                "OAuth state validation failed"
            );
            return Err(FlowError::StateMismatch);
        }

        debug!(provider = %provider, stage = %FlowStage::Exchanging, "State verified");
        let token = client
            .exchange_code(code)
            .await
            .map_err(FlowError::ExchangeFailed)?;

        debug!(provider = %provider, stage = %FlowStage::FetchingProfile, "Code exchanged");
        let profile = client
            .fetch_profile(&token.access_token)
            .await
            .map_err(FlowError::ProfileFetchFailed)?;

        debug!(
            provider = %provider,
            stage = %FlowStage::Resolving,
            email = %safe_email_log(&profile.email),
            "Profile fetched"
        );
        let user = self.resolver.resolve(&profile).await.map_err(|e| match e {
            ResolveError::Inactive => FlowError::AccountInactive,
            other => FlowError::ResolutionFailed(other),
        })?;

        debug!(provider = %provider, stage = %FlowStage::Issuing, user_id = %user.id, "Identity resolved");
        let session_token = self.tokens.issue(&user).map_err(FlowError::IssuanceFailed)?;

        info!(
            provider = %provider,
            stage = %FlowStage::Completed,
            user_id = %user.id,
            email = %safe_email_log(&user.email),
            "OAuth login completed"
        );

        Ok(FlowCompletion {
            user,
            token: session_token,
        })
    }
}
