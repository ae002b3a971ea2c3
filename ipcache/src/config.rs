//! Client configuration.
//!
//! ```yaml
//! name: epo_ops
//! base_url: https://ops.epo.org/3.2/rest-services
//! ttl: 12h
//! rate_limit:
//!   capacity: 5
//!   refill_per_second: 0.5
//! retry:
//!   max_retries: 4
//!   base_delay: 500ms
//! credentials:
//!   type: client_credentials
//!   token_url: https://ops.epo.org/3.2/auth/accesstoken
//!   key: my-key
//!   secret: my-secret
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use ipcache_core::Headers;
use serde::{Deserialize, Serialize};

use crate::credential::CredentialConfig;
use crate::error::BuildError;
use crate::ratelimit::RateLimitConfig;
use crate::retry::RetryConfig;

/// Overrides the default cache directory.
pub const CACHE_DIR_ENV: &str = "IPCACHE_DIR";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

const fn enabled() -> bool {
    true
}

/// Settings of one client instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Client name; names the cache file and labels logs and metrics.
    pub name: String,
    /// Root that relative request paths are joined onto.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Whether responses are cached.
    #[serde(default = "enabled")]
    pub cache_enabled: bool,
    /// Directory holding the cache file. See [`default_cache_dir`].
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Lifetime of responses that carry no caching headers (e.g. "6h").
    #[serde(default, with = "humantime_serde")]
    pub ttl: Option<Duration>,
    /// Request budget. Unlimited when absent.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Retry behaviour.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Authentication scheme.
    #[serde(default)]
    pub credentials: CredentialConfig,
    /// Extra headers sent with every request, overriding the defaults.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Deadline for a single network attempt.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    /// Defaults for a client called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: None,
            cache_enabled: true,
            cache_dir: None,
            ttl: None,
            rate_limit: None,
            retry: RetryConfig::default(),
            credentials: CredentialConfig::None,
            headers: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, BuildError> {
        let config: Self =
            serde_saphyr::from_str(yaml).map_err(|e| BuildError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<(), BuildError> {
        let name = self.name.as_str();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(BuildError::InvalidConfig(format!(
                "client name `{name}` must be non-empty and contain only letters, digits, '_' or '-'"
            )));
        }
        if let Some(limit) = &self.rate_limit {
            limit.validate().map_err(BuildError::InvalidConfig)?;
        }
        self.retry.validate().map_err(BuildError::InvalidConfig)?;
        if self.timeout == Some(Duration::ZERO) {
            return Err(BuildError::InvalidConfig("timeout must be positive".to_owned()));
        }
        Ok(())
    }

    /// Headers sent with every request: a browser-like `User-Agent` and
    /// `Accept-Language`, then the configured extras.
    pub fn default_headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert("user-agent", USER_AGENT);
        headers.insert("accept-language", ACCEPT_LANGUAGE);
        for (name, value) in &self.headers {
            headers.insert(name, value.clone());
        }
        headers
    }

    /// The configured cache directory, or [`default_cache_dir`].
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

/// `$IPCACHE_DIR`, else the platform cache directory plus `ip_tools`, else
/// `~/.cache/ip_tools`.
pub fn default_cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = dirs::cache_dir() {
        return dir.join("ip_tools");
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".cache")
        .join("ip_tools")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_yaml_uses_defaults() {
        let config = ClientConfig::from_yaml("name: uspto_odp\n").unwrap();
        assert_eq!(config, ClientConfig::new("uspto_odp"));
    }

    #[test]
    fn full_yaml() {
        let yaml = r#"
name: jpo
base_url: https://ip-data.jpo.go.jp
cache_enabled: false
cache_dir: /var/cache/ipcache
ttl: 6h
timeout: 30s
rate_limit:
  capacity: 2
  refill_per_second: 0.2
retry:
  max_retries: 5
  base_delay: 250ms
credentials:
  type: password
  token_url: https://ip-data.jpo.go.jp/auth/token
  username: alice
  password: hunter2
headers:
  Accept: application/json
"#;
        let config = ClientConfig::from_yaml(yaml).unwrap();

        assert!(!config.cache_enabled);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/ipcache")));
        assert_eq!(config.ttl, Some(Duration::from_secs(6 * 3600)));
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.rate_limit.map(|r| r.capacity), Some(2));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert!(matches!(
            config.credentials,
            CredentialConfig::Password { ref username, .. } if username == "alice"
        ));
        let headers = config.default_headers();
        assert_eq!(headers.get("accept"), Some("application/json"));
        assert_eq!(headers.get("accept-language"), Some(ACCEPT_LANGUAGE));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            ClientConfig::from_yaml("name: epo\nttl: soon\n"),
            Err(BuildError::Parse(_))
        ));
        assert!(matches!(
            ClientConfig::from_yaml("name: ../escape\n"),
            Err(BuildError::InvalidConfig(_))
        ));
        assert!(matches!(
            ClientConfig::from_yaml("name: epo\nrate_limit:\n  capacity: 0\n  refill_per_second: 1.0\n"),
            Err(BuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let mut config = ClientConfig::new("x");
        config.cache_dir = Some(PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.resolved_cache_dir(), PathBuf::from("/tmp/elsewhere"));
    }
}
