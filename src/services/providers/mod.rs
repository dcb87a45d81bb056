// src/services/providers/mod.rs
//! OAuth provider clients.
//!
//! Each supported provider implements [`ProviderClient`]: building the
//! authorization URL, trading an authorization code for an access token, and
//! fetching the remote profile normalized into a [`ProviderProfile`].

pub mod facebook;
pub mod github;
pub mod google;

pub use facebook::FacebookClient;
pub use github::GitHubClient;
pub use google::GoogleClient;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::common::config::ProviderConfig;
use crate::common::validation::{is_valid_email, ValidationResult, Validator};

/// User agent sent on every outbound provider call (GitHub rejects requests without one)
pub const USER_AGENT: &str = "claims-auth/0.1";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("could not decode provider response: {0}")]
    Decode(String),

    #[error("provider profile is invalid: {0}")]
    InvalidProfile(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::RequestFailed(format!("timed out: {}", e))
        } else if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::RequestFailed(e.to_string())
        }
    }
}

/// The closed set of supported identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Facebook,
    GitHub,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Google, Provider::Facebook, Provider::GitHub];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Facebook => "facebook",
            Provider::GitHub => "github",
        }
    }

    /// Prefix of this provider's environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Provider::Google => "GOOGLE",
            Provider::Facebook => "FACEBOOK",
            Provider::GitHub => "GITHUB",
        }
    }

    pub fn default_scopes(&self) -> &'static [&'static str] {
        match self {
            Provider::Google => &["openid", "email", "profile"],
            Provider::Facebook => &["email", "public_profile"],
            Provider::GitHub => &["read:user", "user:email"],
        }
    }

    /// Separator the provider expects between scopes
    pub fn scope_separator(&self) -> &'static str {
        match self {
            Provider::Facebook => ",",
            Provider::Google | Provider::GitHub => " ",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "facebook" => Ok(Provider::Facebook),
            "github" => Ok(Provider::GitHub),
            other => Err(format!("unsupported provider: {}", other)),
        }
    }
}

/// Token endpoint response, shared by all three providers.
///
/// GitHub answers failed exchanges with HTTP 200 and an `error` field, so
/// `access_token` is optional here and checked in [`TokenResponse::into_token`].
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl TokenResponse {
    pub fn into_token(self) -> Result<ProviderToken, ProviderError> {
        if let Some(error) = self.error {
            let detail = match self.error_description {
                Some(description) => format!("{}: {}", error, description),
                None => error,
            };
            return Err(ProviderError::Rejected(detail));
        }

        match self.access_token.filter(|t| !t.is_empty()) {
            Some(access_token) => Ok(ProviderToken {
                access_token,
                token_type: self.token_type,
                expires_in: self.expires_in,
                scope: self.scope,
            }),
            None => Err(ProviderError::Decode(
                "token response has no access_token".to_string(),
            )),
        }
    }
}

/// Access token obtained from a successful code exchange
#[derive(Debug, Clone)]
pub struct ProviderToken {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

/// Remote profile normalized across providers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderProfile {
    pub provider: Provider,
    pub provider_user_id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl ProviderProfile {
    /// Normalizes raw provider fields and validates the result.
    ///
    /// The email is trimmed and lowercased; a blank name falls back to
    /// `fallback_name` and then to the local part of the email.
    pub fn normalize(
        provider: Provider,
        provider_user_id: Option<String>,
        email: Option<String>,
        name: Option<String>,
        fallback_name: Option<String>,
        avatar_url: Option<String>,
    ) -> Result<Self, ProviderError> {
        let email = email
            .map(|e| e.trim().to_lowercase())
            .unwrap_or_default();
        let non_blank = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let name = non_blank(name)
            .or_else(|| non_blank(fallback_name))
            .or_else(|| email.split('@').next().map(str::to_string))
            .unwrap_or_default();

        let profile = ProviderProfile {
            provider,
            provider_user_id: provider_user_id.unwrap_or_default().trim().to_string(),
            email,
            name,
            avatar_url: non_blank(avatar_url),
        };

        let result = ProfileValidator.validate(&profile);
        if !result.is_valid {
            warn!(
                provider = %provider,
                errors = %result.summary(),
                "Provider returned an unusable profile"
            );
            return Err(ProviderError::InvalidProfile(result.summary()));
        }

        Ok(profile)
    }
}

/// Checks that a normalized profile can identify a local account
pub struct ProfileValidator;

impl Validator<ProviderProfile> for ProfileValidator {
    fn validate(&self, data: &ProviderProfile) -> ValidationResult {
        let mut result = ValidationResult::new();

        if data.provider_user_id.is_empty() {
            result.add_error("provider_user_id", "is required");
        }

        if data.email.is_empty() {
            result.add_error("email", "is required");
        } else if !is_valid_email(&data.email) {
            result.add_error("email", "is not a valid email address");
        }

        if data.name.is_empty() {
            result.add_error("name", "is required");
        }

        result
    }
}

/// Capability set every provider implements
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Authorization URL carrying `state` verbatim. Performs no I/O.
    fn authorization_url(&self, state: &str) -> String;

    /// Trades a single-use authorization code for an access token. Never retries.
    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, ProviderError>;

    /// Fetches and normalizes the remote profile
    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError>;
}

/// Builds `base?k=v&...` with every value percent-encoded
pub(crate) fn build_url(base: &str, params: &[(&str, &str)]) -> String {
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", base, query)
}

/// Maps a non-2xx response to [`ProviderError::Status`], keeping the body for logs
pub(crate) async fn ensure_success(
    provider: Provider,
    step: &'static str,
    response: Response,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        debug!(provider = %provider, step, http_status = %status, "Provider call succeeded");
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    warn!(
        provider = %provider,
        step,
        http_status = %status,
        error = %body,
        "Provider call failed"
    );
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Shared HTTP client with the configured timeout applied to every call
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

/// Provider clients enabled in this deployment
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client for every configured provider
    pub fn from_config(configs: &[ProviderConfig], http: Client) -> Self {
        let mut registry = Self::new();
        for config in configs {
            let client: Arc<dyn ProviderClient> = match config.provider {
                Provider::Google => Arc::new(GoogleClient::new(config.clone(), http.clone())),
                Provider::Facebook => Arc::new(FacebookClient::new(config.clone(), http.clone())),
                Provider::GitHub => Arc::new(GitHubClient::new(config.clone(), http.clone())),
            };
            registry.register(client);
        }
        registry
    }

    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.provider(), client);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(&provider).cloned()
    }

    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.clients.contains_key(&provider)
    }
}
