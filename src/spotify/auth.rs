use std::{io, sync::Arc};

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::AuthConfig,
    error::{AuthenticationError, RedirectError, StoreError, TokenError},
    management::CredentialStore,
    server::RedirectServer,
    spotify::token::{SpotifyTokenClient, TokenExchanger},
    types::{Credentials, FlowState, join_scopes},
    utils, warning,
};

/// Access tokens are treated as expired this long before `expires_in` runs out.
const EXPIRY_MARGIN_SECS: i64 = 240;

/// Sends the user to the authorization page.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &Url) -> io::Result<()>;
}

/// Opens the system's default browser. When none can be launched the URL is
/// printed for manual navigation and the flow keeps waiting.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> io::Result<()> {
        if webbrowser::open(url.as_str()).is_err() {
            warning!(
                "Failed to open browser. Please navigate to the following URL manually:\n{}",
                url
            );
        }
        Ok(())
    }
}

/// Why the stored credentials could not simply be refreshed.
#[derive(Debug, Error)]
enum RefreshSkipped {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stored credentials have no refresh token")]
    NoRefreshToken,
    #[error(transparent)]
    Token(#[from] TokenError),
}

struct CachedCredentials {
    credentials: Credentials,
    obtained_at: DateTime<Utc>,
}

impl CachedCredentials {
    /// A lifetime past what `DateTime` can represent never expires.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let expires_at = i64::try_from(self.credentials.expires_in)
            .ok()
            .and_then(|secs| TimeDelta::try_seconds(secs - EXPIRY_MARGIN_SECS))
            .and_then(|lifetime| self.obtained_at.checked_add_signed(lifetime));

        match expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}

/// Runs the OAuth 2.0 Authorization Code Flow with PKCE.
///
/// [`PkceAuthenticator::get_credentials`] first tries to refresh the stored
/// credentials. Any failure on that path (missing or corrupt file, missing
/// refresh token, rejected refresh, network error) falls through to a full
/// browser authorization:
///
/// 1. A fresh code verifier/challenge pair and CSRF `state` are generated
/// 2. The redirect listener is bound at the redirect URI's address
/// 3. The authorization URL is opened in the browser
/// 4. The listener captures the authorization code from the redirect
/// 5. The code and verifier are exchanged for credentials
///
/// Credentials from either path are persisted before they are returned. Only a
/// failed full authorization surfaces as an error, including failing to save
/// its credentials. A refresh that cannot be saved is logged and still returned.
///
/// Methods take `&mut self`, so one instance never runs two attempts at once.
pub struct PkceAuthenticator {
    config: AuthConfig,
    exchanger: Arc<dyn TokenExchanger>,
    browser: Box<dyn BrowserLauncher>,
    store: CredentialStore,
    cached: Option<CachedCredentials>,
}

impl PkceAuthenticator {
    pub fn new(config: AuthConfig) -> Result<Self, AuthenticationError> {
        let exchanger = SpotifyTokenClient::new(config.token_url.clone())?;
        let store = CredentialStore::new(config.credentials_path.clone());

        Ok(Self {
            config,
            exchanger: Arc::new(exchanger),
            browser: Box::new(SystemBrowser),
            store,
            cached: None,
        })
    }

    pub fn with_exchanger(mut self, exchanger: impl TokenExchanger + 'static) -> Self {
        self.exchanger = Arc::new(exchanger);
        self
    }

    pub fn with_browser(mut self, browser: impl BrowserLauncher + 'static) -> Self {
        self.browser = Box::new(browser);
        self
    }

    pub fn with_store(mut self, store: CredentialStore) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Credentials obtained by the last successful [`Self::get_credentials`].
    pub fn cached_credentials(&self) -> Option<&Credentials> {
        self.cached.as_ref().map(|c| &c.credentials)
    }

    pub async fn get_credentials(&mut self) -> Result<Credentials, AuthenticationError> {
        let credentials = match self.refresh_stored_credentials().await {
            Ok(credentials) => {
                debug!("refreshed stored credentials");
                // The refreshed token is still good for this process.
                if let Err(e) = self.store.save(&credentials).await {
                    warn!(error = %e, "cannot persist refreshed credentials");
                }
                credentials
            }
            Err(reason) => {
                warn!(%reason, "cannot refresh stored credentials, starting authorization");
                let credentials = self.authorize().await?;
                self.store.save(&credentials).await?;
                credentials
            }
        };

        self.cached = Some(CachedCredentials {
            credentials: credentials.clone(),
            obtained_at: Utc::now(),
        });

        Ok(credentials)
    }

    /// `Bearer <access_token>` for API requests. Served from memory while the
    /// cached token is valid, otherwise runs [`Self::get_credentials`].
    pub async fn get_authorization_header(&mut self) -> Result<String, AuthenticationError> {
        if let Some(cached) = &self.cached {
            if !cached.is_expired(Utc::now()) {
                return Ok(cached.credentials.authorization_header());
            }
        }

        Ok(self.get_credentials().await?.authorization_header())
    }

    /// Authorization page URL for one attempt.
    pub fn authorization_url(&self, code_challenge: &str, state: &str) -> Url {
        let mut url = self.config.authorize_url.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("response_type", "code");
            params.append_pair("redirect_uri", self.config.redirect_uri.as_str());
            params.append_pair("code_challenge_method", "S256");
            params.append_pair("code_challenge", code_challenge);
            params.append_pair("state", state);
            if !self.config.scopes.is_empty() {
                params.append_pair("scope", &join_scopes(&self.config.scopes));
            }
        }
        url
    }

    async fn refresh_stored_credentials(&self) -> Result<Credentials, RefreshSkipped> {
        let stored = self.store.load().await?;
        let refresh_token = stored
            .refresh_token()
            .ok_or(RefreshSkipped::NoRefreshToken)?
            .to_string();

        let mut refreshed = self
            .exchanger
            .refresh(&refresh_token, &self.config.client_id)
            .await?;

        // Spotify does not always rotate the refresh token.
        if refreshed.refresh_token().is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        if refreshed.scope.is_empty() {
            refreshed.scope = stored.scope;
        }

        Ok(refreshed)
    }

    async fn authorize(&self) -> Result<Credentials, AuthenticationError> {
        let (code_verifier, code_challenge) = utils::generate_code_verifier_and_challenge();

        let server = RedirectServer::bind(
            self.config.redirect_address()?,
            self.config.redirect_path(),
        )
        .await?;

        let mut flow = FlowState {
            state_token: utils::generate_state_token(),
            authorization_code: None,
            server_address: server.local_addr(),
        };

        let url = self.authorization_url(&code_challenge, &flow.state_token);
        debug!(addr = %flow.server_address, "opening authorization page");
        self.browser.open(&url).map_err(AuthenticationError::Browser)?;

        flow.authorization_code = Some(
            server
                .await_code(&flow.state_token, self.config.callback_timeout)
                .await?,
        );

        self.exchange(&flow, &code_verifier).await
    }

    async fn exchange(
        &self,
        flow: &FlowState,
        code_verifier: &str,
    ) -> Result<Credentials, AuthenticationError> {
        let code = flow
            .authorization_code
            .as_deref()
            .ok_or(RedirectError::MalformedRedirect("code"))?;

        let credentials = self
            .exchanger
            .exchange_code_for_token(
                code,
                code_verifier,
                self.config.redirect_uri.as_str(),
                &self.config.client_id,
            )
            .await?;

        Ok(credentials)
    }
}
