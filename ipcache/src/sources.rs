//! Defaults for the patent-office sources the connectors talk to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::credential::CredentialConfig;
use crate::error::BuildError;
use crate::ratelimit::RateLimitConfig;

/// A known upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// USPTO Open Data Portal.
    UsptoOdp,
    /// USPTO patent assignment search.
    UsptoAssignments,
    /// USPTO patent public search.
    UsptoPublications,
    /// EPO Open Patent Services.
    EpoOps,
    /// Japan Patent Office patent information API.
    Jpo,
    /// Google Patents.
    GooglePatents,
}

impl Source {
    /// Every known source.
    pub const ALL: [Source; 6] = [
        Source::UsptoOdp,
        Source::UsptoAssignments,
        Source::UsptoPublications,
        Source::EpoOps,
        Source::Jpo,
        Source::GooglePatents,
    ];

    /// Cache name, also the database file stem.
    pub fn cache_name(self) -> &'static str {
        match self {
            Source::UsptoOdp => "uspto_odp",
            Source::UsptoAssignments => "uspto_assignments",
            Source::UsptoPublications => "uspto_publications",
            Source::EpoOps => "epo_ops",
            Source::Jpo => "jpo",
            Source::GooglePatents => "google_patents",
        }
    }

    /// Default API root.
    pub fn base_url(self) -> &'static str {
        match self {
            Source::UsptoOdp => "https://api.uspto.gov",
            Source::UsptoAssignments => "https://assignment-api.uspto.gov",
            Source::UsptoPublications => "https://ppubs.uspto.gov",
            Source::EpoOps => "https://ops.epo.org/3.2/rest-services",
            Source::Jpo => "https://ip-data.jpo.go.jp",
            Source::GooglePatents => "https://patents.google.com",
        }
    }

    /// Default request budget.
    pub fn rate_limit(self) -> RateLimitConfig {
        match self {
            Source::UsptoOdp => RateLimitConfig::per_minute(60).with_burst(10),
            Source::UsptoAssignments => RateLimitConfig::per_minute(60).with_burst(5),
            Source::UsptoPublications => RateLimitConfig::per_minute(30).with_burst(5),
            Source::EpoOps => RateLimitConfig::per_minute(30).with_burst(5),
            Source::Jpo | Source::GooglePatents => RateLimitConfig::per_minute(10).with_burst(2),
        }
    }

    /// Credentials, read from the source's environment variables.
    pub fn credentials_from_env(self) -> Result<CredentialConfig, BuildError> {
        match self {
            Source::UsptoOdp => CredentialConfig::api_key_from_env("X-API-KEY", "USPTO_ODP_API_KEY"),
            Source::EpoOps => CredentialConfig::client_credentials_from_env(
                "https://ops.epo.org/3.2/auth/accesstoken",
                "EPO_OPS_KEY",
                "EPO_OPS_SECRET",
            ),
            Source::Jpo => CredentialConfig::password_from_env(
                "https://ip-data.jpo.go.jp/auth/token",
                "JPO_API_USERNAME",
                "JPO_API_PASSWORD",
            ),
            Source::UsptoAssignments | Source::UsptoPublications | Source::GooglePatents => {
                Ok(CredentialConfig::None)
            }
        }
    }

    /// Client configuration with this source's defaults and credentials from
    /// the environment.
    pub fn config(self) -> Result<ClientConfig, BuildError> {
        let mut config = ClientConfig::new(self.cache_name());
        config.base_url = Some(self.base_url().to_owned());
        config.rate_limit = Some(self.rate_limit());
        config.credentials = self.credentials_from_env()?;
        Ok(config)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cache_name())
    }
}

impl FromStr for Source {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.cache_name() == s)
            .ok_or_else(|| BuildError::InvalidConfig(format!("unknown source `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for source in Source::ALL {
            assert_eq!(source.cache_name().parse::<Source>().unwrap(), source);
        }
        assert!("uspto".parse::<Source>().is_err());
    }

    #[test]
    fn presets_are_valid() {
        for source in Source::ALL {
            source.rate_limit().validate().unwrap();
        }
    }

    #[test]
    fn open_sources_need_no_credentials() {
        let config = Source::GooglePatents.config().unwrap();
        assert_eq!(config.name, "google_patents");
        assert_eq!(config.credentials, CredentialConfig::None);
        assert_eq!(config.rate_limit, Some(RateLimitConfig::per_minute(10).with_burst(2)));
    }
}
