//! Configuration for reaching the profile server.

use std::path::PathBuf;

use crate::error::ProfileError;

pub const ENV_PROFILE_SERVER_URL: &str = "PROFILE_SERVER_URL";
pub const ENV_PROFILE_SERVER_KEY: &str = "PROFILE_SERVER_KEY";
pub const ENV_PROFILE_SERVER_SECRET: &str = "PROFILE_SERVER_SECRET";
pub const ENV_PROFILE_SERVER_CA_FILE: &str = "PROFILE_SERVER_CA_FILE";
pub const ENV_PROFILE_SERVER_ADMINABLE_APPS: &str = "PROFILE_SERVER_ADMINABLE_APPS";

/// Connection settings for the profile server.
///
/// The access key doubles as the current application key: it selects which
/// subscription flag on a user record is "ours".
#[derive(Debug, Clone)]
pub struct ProfileServerConfig {
    pub base_url: String,
    pub key: String,
    pub secret: String,
    /// PEM trust anchor for TLS verification, when the server certificate is
    /// not signed by a system root.
    pub ca_file: Option<PathBuf>,
    /// Application keys whose subscription flags this caller may view and
    /// manage beyond its own.
    pub adminable_apps: Vec<String>,
}

impl ProfileServerConfig {
    pub fn new(
        base_url: impl Into<String>,
        key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, ProfileError> {
        Ok(Self {
            base_url: normalize_base_url(&base_url.into())?,
            key: key.into(),
            secret: secret.into(),
            ca_file: None,
            adminable_apps: Vec::new(),
        })
    }

    /// Read the configuration from `PROFILE_SERVER_*` environment variables.
    pub fn from_env() -> Result<Self, ProfileError> {
        let base_url = require_env(ENV_PROFILE_SERVER_URL)?;
        let key = require_env(ENV_PROFILE_SERVER_KEY)?;
        let secret = require_env(ENV_PROFILE_SERVER_SECRET)?;

        let mut config = Self::new(base_url, key, secret)?;
        config.ca_file = env_non_empty(ENV_PROFILE_SERVER_CA_FILE).map(PathBuf::from);
        if let Some(apps) = env_non_empty(ENV_PROFILE_SERVER_ADMINABLE_APPS) {
            config.adminable_apps = apps
                .split(',')
                .map(str::trim)
                .filter(|app| !app.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(config)
    }

    /// The current application key.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.key
    }
}

/// Trim the base URL, require an http(s) scheme with a host, and drop any
/// trailing slash so paths can be appended directly.
pub fn normalize_base_url(raw: &str) -> Result<String, ProfileError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ProfileError::Config {
            message: "base url must not be empty".to_string(),
        });
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ProfileError::Config {
            message: format!("base url must use http:// or https://: {trimmed}"),
        });
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(ProfileError::Config {
            message: format!("base url must include a host: {trimmed}"),
        });
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ProfileError::Config {
            message: format!("base url must include a host: {trimmed}"),
        });
    }
    Ok(trimmed.to_string())
}

fn require_env(key: &str) -> Result<String, ProfileError> {
    env_non_empty(key).ok_or_else(|| ProfileError::Config {
        message: format!("{key} is not set"),
    })
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let config =
            ProfileServerConfig::new("https://profiles.example.com/", "app1", "secret").unwrap();
        assert_eq!(config.base_url, "https://profiles.example.com");
        assert_eq!(config.app(), "app1");
    }

    #[test]
    fn base_url_requires_scheme_and_host() {
        for bad in ["", "   ", "profiles.example.com", "https:///nohost"] {
            assert!(
                ProfileServerConfig::new(bad, "app1", "secret").is_err(),
                "accepted {bad:?}"
            );
        }
    }
}
