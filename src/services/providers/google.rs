// src/services/providers/google.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    build_url, ensure_success, Provider, ProviderClient, ProviderError, ProviderProfile,
    ProviderToken, TokenResponse,
};
use crate::common::config::ProviderConfig;

/// Google OAuth 2.0 endpoints
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GoogleClient {
    config: ProviderConfig,
    endpoints: GoogleEndpoints,
    client: Client,
}

impl GoogleClient {
    pub fn new(config: ProviderConfig, client: Client) -> Self {
        Self::with_endpoints(config, client, GoogleEndpoints::default())
    }

    pub fn with_endpoints(config: ProviderConfig, client: Client, endpoints: GoogleEndpoints) -> Self {
        Self {
            config,
            endpoints,
            client,
        }
    }
}

#[async_trait]
impl ProviderClient for GoogleClient {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorization_url(&self, state: &str) -> String {
        let redirect_uri = self.config.redirect_uri();
        let scope = self.config.scopes.join(Provider::Google.scope_separator());

        build_url(
            &self.endpoints.authorize_url,
            &[
                ("client_id", &self.config.client_id),
                ("redirect_uri", &redirect_uri),
                ("response_type", "code"),
                ("scope", &scope),
                ("access_type", "offline"),
                ("prompt", "select_account"),
                ("state", state),
            ],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        let redirect_uri = self.config.redirect_uri();
        let params = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        debug!("Exchanging Google authorization code for tokens");

        let response = self
            .client
            .post(&self.endpoints.token_url)
            .form(&params)
            .send()
            .await?;
        let response = ensure_success(Provider::Google, "token_exchange", response).await?;

        let token = response.json::<TokenResponse>().await?.into_token()?;
        info!("Google token exchange successful");
        Ok(token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .client
            .get(&self.endpoints.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = ensure_success(Provider::Google, "userinfo", response).await?;

        let info = response.json::<GoogleUserInfo>().await?;

        ProviderProfile::normalize(
            Provider::Google,
            info.id,
            info.email,
            info.name,
            None,
            info.picture,
        )
    }
}
