//! Runtime configuration for the sync engine and the remote backend.
//!
//! Values come from the environment (`NOTESYNC_*`); every reader also accepts a
//! lookup closure so tests can exercise parsing without touching process state.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::remote::Session;
use crate::util::is_http_url;

pub const REMOTE_URL_VAR: &str = "NOTESYNC_REMOTE_URL";
pub const API_KEY_VAR: &str = "NOTESYNC_API_KEY";
pub const HTTP_TIMEOUT_VAR: &str = "NOTESYNC_HTTP_TIMEOUT_SECS";
pub const OWNER_ID_VAR: &str = "NOTESYNC_OWNER_ID";
pub const ACCESS_TOKEN_VAR: &str = "NOTESYNC_ACCESS_TOKEN";
pub const SYNC_INTERVAL_VAR: &str = "NOTESYNC_SYNC_INTERVAL_SECS";
pub const BACKOFF_BASE_VAR: &str = "NOTESYNC_BACKOFF_BASE_MS";
pub const BACKOFF_MAX_VAR: &str = "NOTESYNC_BACKOFF_MAX_SECS";
pub const PULL_PAGE_SIZE_VAR: &str = "NOTESYNC_PULL_PAGE_SIZE";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;
const DEFAULT_PULL_PAGE_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Scheduler and pull tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// `None` disables the periodic trigger
    pub periodic_interval: Option<Duration>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Rows requested per `list_since` call
    pub pull_page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            periodic_interval: Some(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS)),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            pull_page_size: DEFAULT_PULL_PAGE_SIZE,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let periodic_interval = match parse_u64(&lookup, SYNC_INTERVAL_VAR)? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.periodic_interval,
        };
        let backoff_base = parse_u64(&lookup, BACKOFF_BASE_VAR)?
            .map_or(defaults.backoff_base, Duration::from_millis);
        let backoff_max = parse_u64(&lookup, BACKOFF_MAX_VAR)?
            .map_or(defaults.backoff_max, Duration::from_secs);
        if backoff_base.is_zero() || backoff_max < backoff_base {
            return Err(ConfigError::Invalid(format!(
                "{BACKOFF_BASE_VAR} must be positive and not exceed {BACKOFF_MAX_VAR}"
            )));
        }

        let pull_page_size = match parse_u64(&lookup, PULL_PAGE_SIZE_VAR)? {
            Some(0) => {
                return Err(ConfigError::Invalid(format!(
                    "{PULL_PAGE_SIZE_VAR} must be positive"
                )))
            }
            Some(size) => usize::try_from(size)
                .map_err(|_| ConfigError::Invalid(format!("{PULL_PAGE_SIZE_VAR} is too large")))?,
            None => defaults.pull_page_size,
        };

        Ok(Self {
            periodic_interval,
            backoff_base,
            backoff_max,
            pull_page_size,
        })
    }

    #[must_use]
    pub fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn without_periodic_sync(mut self) -> Self {
        self.periodic_interval = None;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn with_pull_page_size(mut self, size: usize) -> Self {
        self.pull_page_size = size.max(1);
        self
    }
}

/// Remote backend endpoint and public key.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Project base URL without trailing slash
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let base_url = base_url.into();
        let base_url = base_url.trim();
        if !is_http_url(base_url) {
            return Err(ConfigError::Invalid(format!(
                "{REMOTE_URL_VAR} must start with http:// or https://"
            )));
        }
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(ConfigError::MissingVar(API_KEY_VAR));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            request_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = required_trimmed(&lookup, REMOTE_URL_VAR)?;
        let api_key = required_trimmed(&lookup, API_KEY_VAR)?;
        let mut config = Self::new(base_url, api_key)?;

        if let Some(secs) = parse_u64(&lookup, HTTP_TIMEOUT_VAR)? {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{HTTP_TIMEOUT_VAR} must be positive"
                )));
            }
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

impl Session {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self::new(
            required_trimmed(&lookup, OWNER_ID_VAR)?,
            required_trimmed(&lookup, ACCESS_TOKEN_VAR)?,
        ))
    }
}

fn parse_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    optional_trimmed(lookup, name)
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid(format!("{name} must be a whole number")))
        })
        .transpose()
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.periodic_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_max, Duration::from_secs(300));
    }

    #[test]
    fn sync_interval_zero_disables_periodic_trigger() {
        let config = SyncConfig::from_lookup(lookup(&[(SYNC_INTERVAL_VAR, "0")])).unwrap();
        assert_eq!(config.periodic_interval, None);
    }

    #[test]
    fn sync_config_rejects_inverted_backoff() {
        let err = SyncConfig::from_lookup(lookup(&[
            (BACKOFF_BASE_VAR, "10000"),
            (BACKOFF_MAX_VAR, "5"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(BACKOFF_BASE_VAR));
    }

    #[test]
    fn sync_config_rejects_non_numeric_values() {
        let err = SyncConfig::from_lookup(lookup(&[(PULL_PAGE_SIZE_VAR, "lots")])).unwrap_err();
        assert!(err.to_string().contains(PULL_PAGE_SIZE_VAR));
    }

    #[test]
    fn remote_config_requires_url_and_key() {
        let err = RemoteConfig::from_lookup(lookup(&[(API_KEY_VAR, "anon")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(REMOTE_URL_VAR)));

        let err = RemoteConfig::from_lookup(lookup(&[
            (REMOTE_URL_VAR, "project.example.com"),
            (API_KEY_VAR, "anon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn remote_config_trims_trailing_slash_and_redacts_key() {
        let config = RemoteConfig::from_lookup(lookup(&[
            (REMOTE_URL_VAR, " https://project.example.com/ "),
            (API_KEY_VAR, "anon-secret"),
            (HTTP_TIMEOUT_VAR, "3"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://project.example.com");
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert!(!format!("{config:?}").contains("anon-secret"));
    }

    #[test]
    fn session_reads_owner_and_token() {
        let session = Session::from_lookup(lookup(&[
            (OWNER_ID_VAR, "user-1"),
            (ACCESS_TOKEN_VAR, "token"),
        ]))
        .unwrap();
        assert_eq!(session.owner_id, "user-1");
        assert!(session.is_complete());

        let err = Session::from_lookup(lookup(&[(OWNER_ID_VAR, "user-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ACCESS_TOKEN_VAR)));
    }
}
