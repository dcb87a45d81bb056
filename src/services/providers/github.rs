// src/services/providers/github.rs
use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    build_url, ensure_success, Provider, ProviderClient, ProviderError, ProviderProfile,
    ProviderToken, TokenResponse,
};
use crate::common::config::ProviderConfig;

/// GitHub OAuth app endpoints
#[derive(Debug, Clone)]
pub struct GitHubEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub user_url: String,
    pub emails_url: String,
}

impl Default for GitHubEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            user_url: "https://api.github.com/user".to_string(),
            emails_url: "https://api.github.com/user/emails".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: Option<u64>,
    login: Option<String>,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub verified: bool,
}

/// Picks the account email: primary and verified, then primary, then the
/// first listed address.
pub fn select_email(emails: &[GitHubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.primary))
        .or_else(|| emails.first())
        .map(|e| e.email.clone())
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    config: ProviderConfig,
    endpoints: GitHubEndpoints,
    client: Client,
}

impl GitHubClient {
    pub fn new(config: ProviderConfig, client: Client) -> Self {
        Self::with_endpoints(config, client, GitHubEndpoints::default())
    }

    pub fn with_endpoints(config: ProviderConfig, client: Client, endpoints: GitHubEndpoints) -> Self {
        Self {
            config,
            endpoints,
            client,
        }
    }

    async fn get_api<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        step: &'static str,
        access_token: &str,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = ensure_success(Provider::GitHub, step, response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ProviderClient for GitHubClient {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }

    fn authorization_url(&self, state: &str) -> String {
        let redirect_uri = self.config.redirect_uri();
        let scope = self.config.scopes.join(Provider::GitHub.scope_separator());

        build_url(
            &self.endpoints.authorize_url,
            &[
                ("client_id", &self.config.client_id),
                ("redirect_uri", &redirect_uri),
                ("response_type", "code"),
                ("scope", &scope),
                ("state", state),
            ],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        let redirect_uri = self.config.redirect_uri();
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
        ];

        debug!("Exchanging GitHub authorization code for tokens");

        // Without the Accept header GitHub answers form-encoded
        let response = self
            .client
            .post(&self.endpoints.token_url)
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;
        let response = ensure_success(Provider::GitHub, "token_exchange", response).await?;

        let token = response.json::<TokenResponse>().await?.into_token()?;
        info!("GitHub token exchange successful");
        Ok(token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let user: GitHubUser = self
            .get_api(&self.endpoints.user_url, "user", access_token)
            .await?;

        // The public profile email is often null; the emails endpoint is authoritative
        let emails: Vec<GitHubEmail> = self
            .get_api(&self.endpoints.emails_url, "user_emails", access_token)
            .await?;

        let email = select_email(&emails).or(user.email);
        if email.is_none() {
            warn!(github_id = ?user.id, "GitHub account exposes no email address");
        }

        ProviderProfile::normalize(
            Provider::GitHub,
            user.id.map(|id| id.to_string()),
            email,
            user.name,
            user.login,
            user.avatar_url,
        )
    }
}
