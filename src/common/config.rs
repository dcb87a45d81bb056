// src/common/config.rs
//! Process configuration loaded once at startup.
//!
//! Every required value is checked here so that a misconfigured deployment
//! fails before the listener is bound instead of on the first login attempt.

use std::collections::HashSet;
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::services::providers::Provider;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error("no OAuth provider is configured (set at least one *_CLIENT_ID)")]
    NoProviders,
}

/// Signing parameters for session credentials
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl: Duration,
    pub issuer: String,
    pub audience: String,
}

/// Credentials and scopes registered with one OAuth provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_base_url: String,
    pub scopes: Vec<String>,
}

impl ProviderConfig {
    /// Callback URI registered with the provider. Used verbatim both when
    /// building the authorization URL and when exchanging the code.
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}/auth/{}/callback",
            self.redirect_base_url.trim_end_matches('/'),
            self.provider.as_str()
        )
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub reset_db: bool,
    pub frontend_url: String,
    pub base_url: String,
    pub cors_origins: Vec<String>,
    pub admin_emails: HashSet<String>,
    pub jwt: JwtConfig,
    pub providers: Vec<ProviderConfig>,
    pub http_timeout: Duration,
    pub state_ttl: Duration,
    pub cookie_secure: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match get("PORT") {
            Some(raw) => parse_number::<u16>("PORT", &raw)?,
            None => 8080,
        };

        let base_url = get("BASE_URL").unwrap_or_else(|| format!("http://localhost:{}", port));
        let frontend_url = get("FRONTEND_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let secret = get("JWT_SECRET").ok_or_else(|| ConfigError::Missing("JWT_SECRET".into()))?;
        let ttl = match get("JWT_EXPIRES_IN") {
            Some(raw) => parse_duration(&raw).map_err(|reason| ConfigError::Invalid {
                var: "JWT_EXPIRES_IN".into(),
                reason,
            })?,
            None => Duration::from_secs(7 * 24 * 60 * 60),
        };

        let jwt = JwtConfig {
            secret,
            ttl,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "oauth-backend".to_string()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| "oauth-frontend".to_string()),
        };

        let mut providers = Vec::new();
        for provider in Provider::ALL {
            let prefix = provider.env_prefix();
            let id_key = format!("{}_CLIENT_ID", prefix);
            let secret_key = format!("{}_CLIENT_SECRET", prefix);
            let scopes_key = format!("{}_SCOPES", prefix);

            let Some(client_id) = get(&id_key) else {
                continue;
            };
            let client_secret = get(&secret_key).ok_or(ConfigError::Missing(secret_key))?;
            let scopes = match get(&scopes_key) {
                Some(raw) => raw
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => provider
                    .default_scopes()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            };

            providers.push(ProviderConfig {
                provider,
                client_id,
                client_secret,
                redirect_base_url: base_url.clone(),
                scopes,
            });
        }

        if providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let http_timeout = match get("OAUTH_HTTP_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number::<u64>("OAUTH_HTTP_TIMEOUT_SECS", &raw)?),
            None => Duration::from_secs(10),
        };
        let state_ttl = match get("OAUTH_STATE_TTL_SECS") {
            Some(raw) => Duration::from_secs(parse_number::<u64>("OAUTH_STATE_TTL_SECS", &raw)?),
            None => Duration::from_secs(600),
        };

        let cors_origins = get("CORS_ORIGINS")
            .unwrap_or_else(|| frontend_url.clone())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let admin_emails = get("ADMIN_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            port,
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://claims_auth.db".to_string()),
            reset_db: flag(get("RESET_DB")),
            frontend_url,
            base_url,
            cors_origins,
            admin_emails,
            jwt,
            providers,
            http_timeout,
            state_ttl,
            cookie_secure: flag(get("COOKIE_SECURE")),
        })
    }

    pub fn provider(&self, provider: Provider) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.provider == provider)
    }
}

fn flag(value: Option<String>) -> bool {
    matches!(
        value.map(|v| v.to_lowercase()).as_deref(),
        Some("true") | Some("1") | Some("yes")
    )
}

fn parse_number<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::Invalid {
        var: var.to_string(),
        reason: format!("'{}' is not a valid number", raw),
    })
}

/// Parses `30s`, `15m`, `12h`, `7d` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.chars().last() {
        Some('s') => (&raw[..raw.len() - 1], 1),
        Some('m') => (&raw[..raw.len() - 1], 60),
        Some('h') => (&raw[..raw.len() - 1], 60 * 60),
        Some('d') => (&raw[..raw.len() - 1], 24 * 60 * 60),
        Some(c) if c.is_ascii_digit() => (raw, 1),
        _ => return Err(format!("'{}' is not a duration", raw)),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a duration", raw))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    // Token expiry is computed in signed seconds
    let secs = value
        .checked_mul(multiplier)
        .filter(|secs| i64::try_from(*secs).is_ok())
        .ok_or_else(|| format!("'{}' is too large", raw))?;

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "secret"),
            ("GOOGLE_CLIENT_ID", "gid"),
            ("GOOGLE_CLIENT_SECRET", "gsecret"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt.ttl, Duration::from_secs(604_800));
        assert_eq!(config.jwt.issuer, "oauth-backend");
        assert_eq!(config.jwt.audience, "oauth-frontend");
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(
            config.providers[0].scopes,
            vec!["openid", "email", "profile"]
        );
        assert!(config.provider(Provider::GitHub).is_none());
    }

    #[test]
    fn test_missing_jwt_secret_is_fatal() {
        let result = AppConfig::from_lookup(lookup(&[
            ("GOOGLE_CLIENT_ID", "gid"),
            ("GOOGLE_CLIENT_SECRET", "gsecret"),
        ]));
        assert_eq!(result.unwrap_err(), ConfigError::Missing("JWT_SECRET".into()));

        let blank = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "  "),
            ("GOOGLE_CLIENT_ID", "gid"),
            ("GOOGLE_CLIENT_SECRET", "gsecret"),
        ]));
        assert!(matches!(blank, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_client_id_without_secret_is_fatal() {
        let result = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "secret"),
            ("GITHUB_CLIENT_ID", "ghid"),
        ]));
        assert_eq!(
            result.unwrap_err(),
            ConfigError::Missing("GITHUB_CLIENT_SECRET".into())
        );
    }

    #[test]
    fn test_no_providers_is_fatal() {
        let result = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "secret")]));
        assert_eq!(result.unwrap_err(), ConfigError::NoProviders);
    }

    #[test]
    fn test_redirect_uri_matches_callback_route() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "secret"),
            ("BASE_URL", "https://api.example.com/"),
            ("FACEBOOK_CLIENT_ID", "fid"),
            ("FACEBOOK_CLIENT_SECRET", "fsecret"),
            ("FACEBOOK_SCOPES", "email, public_profile"),
        ]))
        .unwrap();

        let facebook = config.provider(Provider::Facebook).unwrap();
        assert_eq!(
            facebook.redirect_uri(),
            "https://api.example.com/auth/facebook/callback"
        );
        assert_eq!(facebook.scopes, vec!["email", "public_profile"]);
    }

    #[test]
    fn test_admin_emails_are_normalized() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "secret"),
            ("GOOGLE_CLIENT_ID", "gid"),
            ("GOOGLE_CLIENT_SECRET", "gsecret"),
            ("ADMIN_EMAILS", " Admin@Example.com ,,ops@example.com"),
        ]))
        .unwrap();

        assert!(config.admin_emails.contains("admin@example.com"));
        assert!(config.admin_emails.contains("ops@example.com"));
        assert_eq!(config.admin_emails.len(), 2);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("12h").unwrap(), Duration::from_secs(43_200));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("3600").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("7w").is_err());
        assert!(parse_duration("d").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        assert!(parse_duration("213503982334602d").is_err());
        assert!(parse_duration("18446744073709551615").is_err());
        assert!(parse_duration("9223372036854775808").is_err());
        assert_eq!(
            parse_duration("9223372036854775807").unwrap(),
            Duration::from_secs(i64::MAX as u64)
        );
    }

    #[test]
    fn test_oversized_token_lifetime_is_fatal() {
        let result = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "secret"),
            ("GOOGLE_CLIENT_ID", "gid"),
            ("GOOGLE_CLIENT_SECRET", "gsecret"),
            ("JWT_EXPIRES_IN", "18446744073709551615"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_invalid_timeout_is_fatal() {
        let result = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "secret"),
            ("GOOGLE_CLIENT_ID", "gid"),
            ("GOOGLE_CLIENT_SECRET", "gsecret"),
            ("OAUTH_HTTP_TIMEOUT_SECS", "ten"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
