// src/services/providers/facebook.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    build_url, ensure_success, Provider, ProviderClient, ProviderError, ProviderProfile,
    ProviderToken, TokenResponse,
};
use crate::common::config::ProviderConfig;

/// Facebook Graph API endpoints (v18.0)
#[derive(Debug, Clone)]
pub struct FacebookEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
}

impl Default for FacebookEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://www.facebook.com/v18.0/dialog/oauth".to_string(),
            token_url: "https://graph.facebook.com/v18.0/oauth/access_token".to_string(),
            profile_url: "https://graph.facebook.com/me".to_string(),
        }
    }
}

const PROFILE_FIELDS: &str = "id,name,email,picture.type(large)";

#[derive(Debug, Deserialize)]
struct FacebookUser {
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    picture: Option<FacebookPicture>,
}

#[derive(Debug, Deserialize)]
struct FacebookPicture {
    data: Option<FacebookPictureData>,
}

#[derive(Debug, Deserialize)]
struct FacebookPictureData {
    url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FacebookClient {
    config: ProviderConfig,
    endpoints: FacebookEndpoints,
    client: Client,
}

impl FacebookClient {
    pub fn new(config: ProviderConfig, client: Client) -> Self {
        Self::with_endpoints(config, client, FacebookEndpoints::default())
    }

    pub fn with_endpoints(
        config: ProviderConfig,
        client: Client,
        endpoints: FacebookEndpoints,
    ) -> Self {
        Self {
            config,
            endpoints,
            client,
        }
    }
}

#[async_trait]
impl ProviderClient for FacebookClient {
    fn provider(&self) -> Provider {
        Provider::Facebook
    }

    fn authorization_url(&self, state: &str) -> String {
        let redirect_uri = self.config.redirect_uri();
        let scope = self.config.scopes.join(Provider::Facebook.scope_separator());

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

        debug!("Exchanging Facebook authorization code for tokens");

        // Graph API takes the exchange as a GET with query parameters
        let response = self
            .client
            .get(&self.endpoints.token_url)
            .query(&params)
            .send()
            .await?;
        let response = ensure_success(Provider::Facebook, "token_exchange", response).await?;

        let token = response.json::<TokenResponse>().await?.into_token()?;
        info!("Facebook token exchange successful");
        Ok(token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .client
            .get(&self.endpoints.profile_url)
            .query(&[("fields", PROFILE_FIELDS), ("access_token", access_token)])
            .send()
            .await?;
        let response = ensure_success(Provider::Facebook, "profile", response).await?;

        let user = response.json::<FacebookUser>().await?;
        let avatar = user.picture.and_then(|p| p.data).and_then(|d| d.url);

        ProviderProfile::normalize(Provider::Facebook, user.id, user.email, user.name, None, avatar)
    }
}
