//! Authentication data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::services::providers::Provider;

/// JWT claims structure
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

/// Row of the `users` table
#[derive(FromRow, Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub login_count: i64,
    pub last_login_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Row of the `user_providers` table
#[derive(FromRow, Debug, Clone)]
pub struct ProviderLinkRow {
    pub provider: String,
    pub provider_user_id: String,
    pub linked_at: String,
}

/// One OAuth identity linked to a local account
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLink {
    pub provider: Provider,
    pub provider_user_id: String,
    pub linked_at: String,
}

/// Local account with its linked identities
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub login_count: i64,
    pub last_login_at: String,
    pub created_at: String,
    pub updated_at: String,
    pub providers: Vec<ProviderLink>,
}

impl User {
    pub fn from_row(row: UserRow, providers: Vec<ProviderLink>) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            avatar: row.avatar,
            is_active: row.is_active,
            is_email_verified: row.is_email_verified,
            login_count: row.login_count,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            providers,
        }
    }

    /// Names of linked providers, in link order
    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.provider.as_str().to_string())
            .collect()
    }

    pub fn has_provider(&self, provider: Provider) -> bool {
        self.providers.iter().any(|p| p.provider == provider)
    }

    /// Profile safe to return to the frontend
    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            providers: self.provider_names(),
            last_login: self.last_login_at.clone(),
            created_at: self.created_at.clone(),
            is_email_verified: self.is_email_verified,
            login_count: self.login_count,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub providers: Vec<String>,
    pub last_login: String,
    pub created_at: String,
    pub is_email_verified: bool,
    pub login_count: i64,
}

/// Query parameters the provider appends to the callback redirect
#[derive(Deserialize, Debug, Default, Clone)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Aggregate account counts
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_users: i64,
    pub active_users: i64,
    pub google_users: i64,
    pub facebook_users: i64,
    pub github_users: i64,
}
