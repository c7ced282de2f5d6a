use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use oauth2::basic::{BasicClient, BasicRequestTokenError, BasicTokenType};
use oauth2::{
    ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError, TokenResponse, TokenUrl,
};
use reqwest::{RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tokens are renewed this long before they expire.
const EXPIRY_LEEWAY: Duration = Duration::from_secs(30);

/// Lifetime assumed for tokens issued without `expires_in`.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);

type TokenClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    TokenRequest(#[from] BasicRequestTokenError<HttpClientError<reqwest::Error>>),
    #[error("unsupported token type {0:?}")]
    UnsupportedTokenType(String),
}

/// How push requests authenticate against the upstream collector.
/// Chosen once at startup.
#[derive(Debug)]
pub enum Auth {
    Basic {
        username: String,
        password: SecretString,
    },
    OAuth2(ClientCredentials),
}

impl Auth {
    pub fn basic(username: &str, password: &str) -> Self {
        Auth::Basic {
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
        }
    }

    /// Attaches credentials to an outgoing request.
    pub async fn apply(&self, req: RequestBuilder) -> Result<RequestBuilder, AuthError> {
        match self {
            Auth::Basic { username, password } => {
                Ok(req.basic_auth(username, Some(password.expose_secret())))
            }
            Auth::OAuth2(cc) => {
                let token = cc.bearer_token().await?;
                Ok(req.bearer_auth(token.expose_secret()))
            }
        }
    }

    /// Called when upstream rejects our credentials.
    pub fn invalidate(&self) {
        if let Auth::OAuth2(cc) = self {
            cc.invalidate();
        }
    }
}

struct CachedToken {
    access_token: Arc<SecretString>,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + EXPIRY_LEEWAY < self.expires_at
    }
}

/// OAuth2 client-credentials grant with an in-memory token cache.
///
/// The exchange itself is done by [`oauth2`]; this only decides when to ask
/// for a new token. The current one sits in an [`ArcSwapOption`] so pushes
/// read it without locking, and only a refresh takes the mutex, which keeps
/// concurrent callers from fetching more than one token at a time.
pub struct ClientCredentials {
    oauth: TokenClient,
    client_id: String,
    token_url: Url,
    http: reqwest::Client,
    default_ttl: Duration,
    cached: ArcSwapOption<CachedToken>,
    refresh: Mutex<()>,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ClientCredentials {
    /// `http` is used as is; build it without redirects, as
    /// [`token_client`](super::pusher::token_client) does.
    pub fn new(
        http: reqwest::Client,
        client_id: &str,
        client_secret: &str,
        token_url: Url,
    ) -> Self {
        let oauth = BasicClient::new(ClientId::new(client_id.to_string()))
            .set_client_secret(ClientSecret::new(client_secret.to_string()))
            .set_token_uri(TokenUrl::from_url(token_url.clone()));
        ClientCredentials {
            oauth,
            client_id: client_id.to_string(),
            token_url,
            http,
            default_ttl: DEFAULT_TOKEN_TTL,
            cached: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
        }
    }

    /// Overrides [`DEFAULT_TOKEN_TTL`].
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub async fn bearer_token(&self) -> Result<Arc<SecretString>, AuthError> {
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;
        // another caller may have refreshed while we waited
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        self.cached.store(Some(Arc::new(token)));
        Ok(access_token)
    }

    pub fn invalidate(&self) {
        debug!("Dropping cached OAuth2 token");
        self.cached.store(None);
    }

    fn fresh_token(&self) -> Option<Arc<SecretString>> {
        let cached = self.cached.load();
        cached
            .as_ref()
            .filter(|t| t.is_fresh(Instant::now()))
            .map(|t| t.access_token.clone())
    }

    async fn request_token(&self) -> Result<CachedToken, AuthError> {
        info!("Requesting OAuth2 token from {}", self.token_url);
        let requested_at = Instant::now();
        let token = self
            .oauth
            .exchange_client_credentials()
            .request_async(&self.http)
            .await?;

        match token.token_type() {
            BasicTokenType::Bearer => {}
            other => {
                return Err(AuthError::UnsupportedTokenType(
                    format!("{other:?}").to_lowercase(),
                ))
            }
        }

        let ttl = token.expires_in().unwrap_or(self.default_ttl);
        Ok(CachedToken {
            access_token: Arc::new(SecretString::from(token.access_token().secret().clone())),
            expires_at: requested_at + ttl,
        })
    }
}
