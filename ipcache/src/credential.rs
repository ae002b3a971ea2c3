//! Credential and token lifecycle.
//!
//! ```text
//! Unauthenticated ──► Authenticating ──► Valid ──► Expired ──► Authenticating ──► …
//!        ▲                  │
//!        └──── failure ─────┘
//! ```
//!
//! Static schemes (no credentials, API-key header) are always valid. Token
//! schemes exchange a key/secret or username/password for a bearer token
//! and refresh it shortly before it expires. Concurrent callers that need a
//! token while an exchange is running wait for that exchange instead of
//! starting their own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, TimeDelta, Utc};
use ipcache_core::{FetchRequest, Headers};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::concurrency::SingleFlight;
use crate::error::{BuildError, FetchError};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::transport::Transport;

/// Tokens are treated as expired this long before their declared expiry.
pub const DEFAULT_REFRESH_LEEWAY: Duration = Duration::from_secs(30);

/// Lifetime assumed when a token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// How a client authenticates.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialConfig {
    /// No credentials.
    #[default]
    None,
    /// A static key sent in a header on every request.
    ApiKey {
        /// Header name, e.g. `X-API-KEY`.
        header: String,
        /// Key value.
        key: String,
    },
    /// OAuth2 client-credentials grant, key and secret sent as HTTP Basic auth.
    ClientCredentials {
        /// Token endpoint.
        token_url: String,
        /// Consumer key.
        key: String,
        /// Consumer secret.
        secret: String,
    },
    /// OAuth2 resource-owner password grant.
    Password {
        /// Token endpoint.
        token_url: String,
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("key", &"<redacted>")
                .finish(),
            Self::ClientCredentials { token_url, .. } => f
                .debug_struct("ClientCredentials")
                .field("token_url", token_url)
                .field("key", &"<redacted>")
                .field("secret", &"<redacted>")
                .finish(),
            Self::Password {
                token_url,
                username,
                ..
            } => f
                .debug_struct("Password")
                .field("token_url", token_url)
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

fn env_var(name: &str) -> Result<String, BuildError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(BuildError::MissingCredential(name.to_owned())),
    }
}

impl CredentialConfig {
    /// API key read from the environment variable `var`.
    pub fn api_key_from_env(header: impl Into<String>, var: &str) -> Result<Self, BuildError> {
        Ok(Self::ApiKey {
            header: header.into(),
            key: env_var(var)?,
        })
    }

    /// Client-credentials grant with key and secret read from the environment.
    pub fn client_credentials_from_env(
        token_url: impl Into<String>,
        key_var: &str,
        secret_var: &str,
    ) -> Result<Self, BuildError> {
        Ok(Self::ClientCredentials {
            token_url: token_url.into(),
            key: env_var(key_var)?,
            secret: env_var(secret_var)?,
        })
    }

    /// Password grant with username and password read from the environment.
    pub fn password_from_env(
        token_url: impl Into<String>,
        username_var: &str,
        password_var: &str,
    ) -> Result<Self, BuildError> {
        Ok(Self::Password {
            token_url: token_url.into(),
            username: env_var(username_var)?,
            password: env_var(password_var)?,
        })
    }

    /// Whether this scheme uses exchanged bearer tokens.
    pub fn is_token_based(&self) -> bool {
        matches!(self, Self::ClientCredentials { .. } | Self::Password { .. })
    }
}

/// A bearer token and its validity window.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// Token issued at `issued_at` and valid for `lifetime`.
    pub fn new(secret: impl Into<String>, issued_at: DateTime<Utc>, lifetime: Duration) -> Self {
        let lifetime = TimeDelta::from_std(lifetime).unwrap_or(TimeDelta::MAX);
        Self {
            secret: secret.into(),
            issued_at,
            expires_at: issued_at
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// The token value.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// When the token was issued.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Declared expiry.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token can still be used at `now`, `leeway` before expiry.
    ///
    /// The leeway never exceeds half the token's lifetime, so short-lived
    /// tokens are still used before being refreshed.
    pub fn is_usable_at(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        let lifetime = self.expires_at.signed_duration_since(self.issued_at);
        let leeway = TimeDelta::from_std(leeway)
            .unwrap_or(TimeDelta::MAX)
            .min(lifetime / 2);
        match now.checked_add_signed(leeway) {
            Some(deadline) => deadline < self.expires_at,
            None => false,
        }
    }
}

/// Lifecycle state of a [`CredentialManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No token held.
    Unauthenticated,
    /// An exchange is running.
    Authenticating,
    /// A usable token is held.
    Valid,
    /// The held token expired or was rejected.
    Expired,
}

/// Credential attached to one outgoing request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Nothing to attach.
    None,
    /// A static header.
    Header {
        /// Header name.
        name: String,
        /// Header value.
        value: String,
    },
    /// `Authorization: Bearer <token>`.
    Bearer(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Header { name, .. } => write!(f, "Header({name}: <redacted>)"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

impl Credential {
    /// Adds the credential to `headers`.
    pub fn apply(&self, headers: &mut Headers) {
        match self {
            Self::None => {}
            Self::Header { name, value } => headers.insert(name, value.clone()),
            Self::Bearer(token) => headers.insert("authorization", format!("Bearer {token}")),
        }
    }

    /// Whether this is an exchanged bearer token.
    pub fn is_bearer(&self) -> bool {
        matches!(self, Self::Bearer(_))
    }
}

/// Exchanges configured credentials for a token.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Performs one exchange.
    async fn exchange(&self) -> Result<AccessToken, FetchError>;
}

enum Grant {
    ClientCredentials { key: String, secret: String },
    Password { username: String, password: String },
}

/// OAuth2 token endpoint client running over the client's [`Transport`].
pub struct OAuthExchange {
    transport: Arc<dyn Transport>,
    token_url: String,
    grant: Grant,
}

impl fmt::Debug for OAuthExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let grant = match self.grant {
            Grant::ClientCredentials { .. } => "client_credentials",
            Grant::Password { .. } => "password",
        };
        f.debug_struct("OAuthExchange")
            .field("token_url", &self.token_url)
            .field("grant", &grant)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default, deserialize_with = "seconds_from_number_or_string")]
    expires_in: Option<u64>,
}

fn seconds_from_number_or_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Number(n)) => Ok(Some(n)),
        Some(Seconds::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl OAuthExchange {
    /// Builds the exchange for a token-based `config`; `None` for static schemes.
    pub fn from_config(config: &CredentialConfig, transport: Arc<dyn Transport>) -> Option<Self> {
        let (token_url, grant) = match config {
            CredentialConfig::ClientCredentials {
                token_url,
                key,
                secret,
            } => (
                token_url.clone(),
                Grant::ClientCredentials {
                    key: key.clone(),
                    secret: secret.clone(),
                },
            ),
            CredentialConfig::Password {
                token_url,
                username,
                password,
            } => (
                token_url.clone(),
                Grant::Password {
                    username: username.clone(),
                    password: password.clone(),
                },
            ),
            CredentialConfig::None | CredentialConfig::ApiKey { .. } => return None,
        };
        Some(Self {
            transport,
            token_url,
            grant,
        })
    }

    fn request(&self) -> Result<FetchRequest, FetchError> {
        let request = FetchRequest::post(&self.token_url).header("accept", "application/json");
        let request = match &self.grant {
            Grant::ClientCredentials { key, secret } => request
                .header(
                    "authorization",
                    format!("Basic {}", BASE64.encode(format!("{key}:{secret}"))),
                )
                .form(&[("grant_type", "client_credentials")]),
            Grant::Password { username, password } => request.form(&[
                ("grant_type", "password"),
                ("username", username.as_str()),
                ("password", password.as_str()),
            ]),
        };
        request.map_err(|e| FetchError::InvalidRequest(format!("token request: {e}")))
    }
}

#[async_trait]
impl TokenExchange for OAuthExchange {
    async fn exchange(&self) -> Result<AccessToken, FetchError> {
        let issued_at = Utc::now();
        let response = self.transport.send(self.request()?).await?;

        if !response.is_success() {
            let error = FetchError::from_response(&response, issued_at.into());
            if error.is_retryable() {
                return Err(error);
            }
            return Err(FetchError::Authentication(format!(
                "token endpoint rejected credentials (HTTP {})",
                response.status
            )));
        }

        let token: TokenResponse = response
            .json()
            .map_err(|e| FetchError::MalformedResponse(format!("token response: {e}")))?;
        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        Ok(AccessToken::new(token.access_token, issued_at, lifetime))
    }
}

#[derive(Debug)]
struct Slot {
    token: Option<AccessToken>,
    state: TokenState,
}

/// Supplies the credential for each request of one client.
pub struct CredentialManager {
    config: CredentialConfig,
    exchange: Option<Arc<dyn TokenExchange>>,
    retry: RetryPolicy,
    leeway: Duration,
    slot: Arc<RwLock<Slot>>,
    flight: SingleFlight<(), Result<AccessToken, FetchError>>,
    label: String,
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("label", &self.label)
            .finish()
    }
}

impl CredentialManager {
    /// Manager for `config`. Token-based schemes exchange through `transport`.
    pub fn new(config: CredentialConfig, transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        let exchange = OAuthExchange::from_config(&config, transport)
            .map(|exchange| Arc::new(exchange) as Arc<dyn TokenExchange>);
        Self::from_parts(config, exchange, retry)
    }

    /// Manager using a custom token exchange.
    pub fn with_exchange<E>(config: CredentialConfig, exchange: E, retry: RetryPolicy) -> Self
    where
        E: TokenExchange + 'static,
    {
        Self::from_parts(config, Some(Arc::new(exchange)), retry)
    }

    fn from_parts(
        config: CredentialConfig,
        exchange: Option<Arc<dyn TokenExchange>>,
        retry: RetryPolicy,
    ) -> Self {
        let state = if config.is_token_based() {
            TokenState::Unauthenticated
        } else {
            TokenState::Valid
        };
        Self {
            config,
            exchange,
            retry,
            leeway: DEFAULT_REFRESH_LEEWAY,
            slot: Arc::new(RwLock::new(Slot { token: None, state })),
            flight: SingleFlight::new("token"),
            label: "default".to_owned(),
        }
    }

    /// Sets how long before expiry a token is refreshed.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Names the manager in logs and metrics.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The configured scheme.
    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TokenState {
        let slot = self.slot.read();
        match (&slot.token, slot.state) {
            (Some(token), TokenState::Valid) if !token.is_usable_at(Utc::now(), self.leeway) => {
                TokenState::Expired
            }
            (_, state) => state,
        }
    }

    /// Installs a previously issued token, e.g. one restored from disk.
    pub fn set_token(&self, token: AccessToken) {
        let mut slot = self.slot.write();
        slot.token = Some(token);
        slot.state = TokenState::Valid;
    }

    /// Marks the held token as expired if it is still `rejected`, forcing a
    /// refresh on the next request.
    ///
    /// A rejection of a token that has already been replaced is ignored.
    pub fn invalidate(&self, rejected: &str) {
        let mut slot = self.slot.write();
        let held = slot
            .token
            .as_ref()
            .is_some_and(|token| token.secret() == rejected);
        if held && slot.state == TokenState::Valid {
            debug!(credentials = %self.label, "Bearer token rejected, marking expired");
            slot.state = TokenState::Expired;
        }
    }

    /// Credential for the next request, exchanging or refreshing a token if needed.
    pub async fn credential(&self) -> Result<Credential, FetchError> {
        match &self.config {
            CredentialConfig::None => Ok(Credential::None),
            CredentialConfig::ApiKey { header, key } => Ok(Credential::Header {
                name: header.clone(),
                value: key.clone(),
            }),
            CredentialConfig::ClientCredentials { .. } | CredentialConfig::Password { .. } => {
                if let Some(token) = self.usable_token() {
                    return Ok(Credential::Bearer(token.secret));
                }
                let token = self.refresh().await?;
                Ok(Credential::Bearer(token.secret))
            }
        }
    }

    fn usable_token(&self) -> Option<AccessToken> {
        usable(&self.slot.read(), self.leeway)
    }

    async fn refresh(&self) -> Result<AccessToken, FetchError> {
        let Some(exchange) = self.exchange.clone() else {
            return Err(FetchError::Authentication(
                "no token exchange configured".to_owned(),
            ));
        };
        let slot = Arc::clone(&self.slot);
        let retry = self.retry;
        let leeway = self.leeway;
        let label = self.label.clone();

        let outcome = self
            .flight
            .run((), async move {
                // A refresh may have completed between the caller's check and now.
                if let Some(token) = usable(&slot.read(), leeway) {
                    return Ok(token);
                }
                slot.write().state = TokenState::Authenticating;
                debug!(credentials = %label, "Exchanging credentials for a token");

                let result = retry.run(|| exchange.exchange()).await;
                metrics::record_token_refresh(&label, result.is_ok());

                let mut slot = slot.write();
                match result {
                    Ok(token) => {
                        info!(
                            credentials = %label,
                            expires_at = %token.expires_at(),
                            "Obtained access token"
                        );
                        slot.token = Some(token.clone());
                        slot.state = TokenState::Valid;
                        Ok(token)
                    }
                    Err(error) => {
                        warn!(credentials = %label, %error, "Token exchange failed");
                        slot.token = None;
                        slot.state = TokenState::Unauthenticated;
                        Err(match error {
                            FetchError::Authentication(_) => error,
                            other => FetchError::Authentication(format!(
                                "token exchange failed: {other}"
                            )),
                        })
                    }
                }
            })
            .await;

        outcome.unwrap_or(Err(FetchError::Aborted))
    }
}

fn usable(slot: &Slot, leeway: Duration) -> Option<AccessToken> {
    match (&slot.token, slot.state) {
        (Some(token), TokenState::Valid) if token.is_usable_at(Utc::now(), leeway) => {
            Some(token.clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ipcache_core::FetchResponse;
    use parking_lot::Mutex;

    use crate::retry::RetryConfig;

    struct CannedTransport {
        responses: Mutex<Vec<FetchResponse>>,
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl CannedTransport {
        fn new(responses: Vec<FetchResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
            self.requests.lock().push(request);
            Ok(self.responses.lock().remove(0))
        }
    }

    fn json(status: u16, body: &str) -> FetchResponse {
        FetchResponse::new(
            status,
            [("content-type", "application/json")].into_iter().collect(),
            body.to_owned(),
        )
    }

    fn epo() -> CredentialConfig {
        CredentialConfig::ClientCredentials {
            token_url: "https://ops.epo.org/3.2/auth/accesstoken".to_owned(),
            key: "consumer".to_owned(),
            secret: "s3cret".to_owned(),
        }
    }

    #[tokio::test]
    async fn client_credentials_exchange() {
        let transport = CannedTransport::new(vec![json(
            200,
            r#"{"access_token":"tok-1","expires_in":"1199","token_type":"BearerToken"}"#,
        )]);
        let manager = CredentialManager::new(epo(), transport.clone(), RetryPolicy::default());

        let credential = manager.credential().await.unwrap();

        assert_eq!(credential, Credential::Bearer("tok-1".to_owned()));
        assert_eq!(manager.state(), TokenState::Valid);
        let requests = transport.requests.lock();
        let request = &requests[0];
        assert_eq!(
            request.headers().get("authorization"),
            Some(format!("Basic {}", BASE64.encode("consumer:s3cret")).as_str())
        );
        assert_eq!(
            request.body_bytes().map(|b| b.as_ref()),
            Some(&b"grant_type=client_credentials"[..])
        );
    }

    #[tokio::test]
    async fn password_grant_sends_form_credentials() {
        let transport = CannedTransport::new(vec![json(200, r#"{"access_token":"j","expires_in":60}"#)]);
        let config = CredentialConfig::Password {
            token_url: "https://example.jpo.go.jp/auth/token".to_owned(),
            username: "user".to_owned(),
            password: "p&ss".to_owned(),
        };
        let manager = CredentialManager::new(config, transport.clone(), RetryPolicy::default());

        manager.credential().await.unwrap();

        let requests = transport.requests.lock();
        assert_eq!(
            requests[0].body_bytes().map(|b| b.as_ref()),
            Some(&b"grant_type=password&username=user&password=p%26ss"[..])
        );
    }

    #[tokio::test]
    async fn rejected_credentials_surface_as_authentication_error() {
        let transport = CannedTransport::new(vec![json(401, r#"{"error":"invalid_client"}"#)]);
        let manager = CredentialManager::new(epo(), transport, RetryPolicy::default());

        let error = manager.credential().await.unwrap_err();

        assert!(matches!(error, FetchError::Authentication(_)));
        assert_eq!(manager.state(), TokenState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_exchange_is_retried() {
        let transport = CannedTransport::new(vec![
            json(503, ""),
            json(200, r#"{"access_token":"after-retry"}"#),
        ]);
        let manager = CredentialManager::new(epo(), transport, RetryPolicy::default());

        let credential = manager.credential().await.unwrap();

        assert_eq!(credential, Credential::Bearer("after-retry".to_owned()));
    }

    #[tokio::test]
    async fn static_schemes_need_no_exchange() {
        let none = CredentialManager::with_exchange(
            CredentialConfig::None,
            FailingExchange,
            RetryPolicy::default(),
        );
        assert_eq!(none.credential().await.unwrap(), Credential::None);

        let api_key = CredentialConfig::ApiKey {
            header: "X-API-KEY".to_owned(),
            key: "abc".to_owned(),
        };
        let manager = CredentialManager::with_exchange(api_key, FailingExchange, RetryPolicy::default());
        let mut headers = Headers::new();
        manager.credential().await.unwrap().apply(&mut headers);
        assert_eq!(headers.get("x-api-key"), Some("abc"));
        assert_eq!(manager.state(), TokenState::Valid);
    }

    struct FailingExchange;

    #[async_trait]
    impl TokenExchange for FailingExchange {
        async fn exchange(&self) -> Result<AccessToken, FetchError> {
            Err(FetchError::Authentication("unexpected exchange".to_owned()))
        }
    }

    struct CountingExchange(Arc<AtomicUsize>);

    #[async_trait]
    impl TokenExchange for CountingExchange {
        async fn exchange(&self) -> Result<AccessToken, FetchError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken::new(format!("tok-{n}"), Utc::now(), Duration::from_secs(600)))
        }
    }

    #[tokio::test]
    async fn invalidated_token_is_refreshed() {
        let exchanges = Arc::new(AtomicUsize::new(0));
        let manager = CredentialManager::with_exchange(
            epo(),
            CountingExchange(exchanges.clone()),
            RetryPolicy::new(RetryConfig::disabled()),
        );

        assert_eq!(manager.credential().await.unwrap(), Credential::Bearer("tok-1".into()));
        assert_eq!(manager.credential().await.unwrap(), Credential::Bearer("tok-1".into()));
        manager.invalidate("tok-1");
        assert_eq!(manager.state(), TokenState::Expired);
        assert_eq!(manager.credential().await.unwrap(), Credential::Bearer("tok-2".into()));
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn secrets_are_redacted() {
        let rendered = format!("{:?}", epo());
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("consumer"));
        let token = AccessToken::new("tok-xyz", Utc::now(), Duration::from_secs(1));
        assert!(!format!("{token:?}").contains("tok-xyz"));
        assert!(!format!("{:?}", Credential::Bearer("tok-xyz".into())).contains("tok-xyz"));
    }

    #[test]
    fn leeway_counts_as_expired() {
        let now = Utc::now();
        let token = AccessToken::new("t", now, Duration::from_secs(600));
        let late = now + TimeDelta::seconds(580);
        assert!(token.is_usable_at(late, Duration::from_secs(10)));
        assert!(!token.is_usable_at(late, DEFAULT_REFRESH_LEEWAY));
    }

    #[test]
    fn leeway_is_capped_at_half_the_lifetime() {
        let now = Utc::now();
        let token = AccessToken::new("t", now, Duration::from_secs(20));
        assert!(token.is_usable_at(now, DEFAULT_REFRESH_LEEWAY));
        assert!(token.is_usable_at(now + TimeDelta::seconds(9), DEFAULT_REFRESH_LEEWAY));
        assert!(!token.is_usable_at(now + TimeDelta::seconds(10), DEFAULT_REFRESH_LEEWAY));
    }

    struct ShortLivedExchange(Arc<AtomicUsize>);

    #[async_trait]
    impl TokenExchange for ShortLivedExchange {
        async fn exchange(&self) -> Result<AccessToken, FetchError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken::new(format!("tok-{n}"), Utc::now(), Duration::from_secs(20)))
        }
    }

    #[tokio::test]
    async fn short_lived_token_is_reused() {
        let exchanges = Arc::new(AtomicUsize::new(0));
        let manager = CredentialManager::with_exchange(
            epo(),
            ShortLivedExchange(exchanges.clone()),
            RetryPolicy::new(RetryConfig::disabled()),
        );

        for _ in 0..5 {
            assert_eq!(manager.credential().await.unwrap(), Credential::Bearer("tok-1".into()));
        }
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), TokenState::Valid);
    }

    #[tokio::test]
    async fn rejection_of_replaced_token_is_ignored() {
        let exchanges = Arc::new(AtomicUsize::new(0));
        let manager = CredentialManager::with_exchange(
            epo(),
            CountingExchange(exchanges.clone()),
            RetryPolicy::new(RetryConfig::disabled()),
        );

        manager.credential().await.unwrap();
        manager.invalidate("tok-1");
        assert_eq!(manager.credential().await.unwrap(), Credential::Bearer("tok-2".into()));

        manager.invalidate("tok-1");
        assert_eq!(manager.state(), TokenState::Valid);
        assert_eq!(manager.credential().await.unwrap(), Credential::Bearer("tok-2".into()));
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    }
}
