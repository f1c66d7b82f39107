//! Configuration management for the Spotify PKCE client.
//!
//! This module handles loading configuration values from environment variables
//! and `.env` files and turns them into an [`AuthConfig`] for the
//! authentication flow.
//!
//! The configuration system follows a hierarchical approach:
//! 1. Environment variables (highest priority)
//! 2. `.env` file in the local data directory
//! 3. Application defaults (where applicable)

use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

use url::Url;

use crate::{
    error::ConfigError,
    types::{Scope, parse_scopes},
};

pub const APP_DIR: &str = "spotify-pkce";
pub const DEFAULT_AUTH_URL: &str = "https://accounts.spotify.com/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/callback";
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

pub const ENV_CLIENT_ID: &str = "SPOTIFY_API_AUTH_CLIENT_ID";
pub const ENV_REDIRECT_URI: &str = "SPOTIFY_API_REDIRECT_URI";
pub const ENV_SCOPE: &str = "SPOTIFY_API_AUTH_SCOPE";
pub const ENV_AUTH_URL: &str = "SPOTIFY_API_AUTH_URL";
pub const ENV_TOKEN_URL: &str = "SPOTIFY_API_TOKEN_URL";
pub const ENV_CREDENTIALS_PATH: &str = "SPOTIFY_CREDENTIALS_PATH";
pub const ENV_TIMEOUT_SECS: &str = "SPOTIFY_AUTH_TIMEOUT_SECS";

/// Returns the application's directory inside the platform data directory.
///
/// - Linux: `~/.local/share/spotify-pkce`
/// - macOS: `~/Library/Application Support/spotify-pkce`
/// - Windows: `%LOCALAPPDATA%/spotify-pkce`
pub fn app_data_dir() -> PathBuf {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path
}

/// Loads environment variables from a `.env` file in the local data directory.
///
/// Creates the application directory if it doesn't exist. A missing `.env`
/// file is not an error, since every value can also come from the process
/// environment.
///
/// # Errors
///
/// This function will return an error if:
/// - The application directory cannot be created
/// - The `.env` file exists but cannot be read or parsed
///
/// # Example
///
/// ```
/// use spotify_pkce::config;
///
/// #[tokio::main]
/// async fn main() {
///     if let Err(e) = config::load_env().await {
///         eprintln!("Configuration error: {}", e);
///     }
/// }
/// ```
pub async fn load_env() -> Result<(), String> {
    let dir = app_data_dir();
    async_fs::create_dir_all(&dir)
        .await
        .map_err(|e| e.to_string())?;

    let path = dir.join(".env");
    if path.is_file() {
        dotenv::from_path(&path).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn env_var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn default_url(value: &str) -> Url {
    Url::parse(value).expect("built-in URL constant is valid")
}

/// Everything the PKCE flow needs to know about the client registration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    /// Must match the redirect URI registered with Spotify exactly.
    pub redirect_uri: Url,
    pub authorize_url: Url,
    pub token_url: Url,
    pub scopes: Vec<Scope>,
    pub credentials_path: PathBuf,
    pub callback_timeout: Duration,
}

impl AuthConfig {
    /// Configuration with Spotify's endpoints, the default redirect URI, no
    /// scopes and the default credential file.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: default_url(DEFAULT_REDIRECT_URI),
            authorize_url: default_url(DEFAULT_AUTH_URL),
            token_url: default_url(DEFAULT_TOKEN_URL),
            scopes: Vec::new(),
            credentials_path: app_data_dir().join("credentials.json"),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    /// Builds the configuration from the process environment.
    ///
    /// Only `SPOTIFY_API_AUTH_CLIENT_ID` is required; every other variable
    /// falls back to its default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = env_var(ENV_CLIENT_ID).ok_or(ConfigError::Missing(ENV_CLIENT_ID))?;
        let mut config = Self::new(client_id);

        if let Some(uri) = env_var(ENV_REDIRECT_URI) {
            config = config.with_redirect_uri(&uri)?;
        }
        if let Some(url) = env_var(ENV_AUTH_URL) {
            config.authorize_url = parse_url(ENV_AUTH_URL, &url)?;
        }
        if let Some(url) = env_var(ENV_TOKEN_URL) {
            config.token_url = parse_url(ENV_TOKEN_URL, &url)?;
        }
        if let Some(scope) = env_var(ENV_SCOPE) {
            config.scopes = parse_scopes(&scope).map_err(|reason| ConfigError::Invalid {
                name: ENV_SCOPE,
                reason,
            })?;
        }
        if let Some(path) = env_var(ENV_CREDENTIALS_PATH) {
            config.credentials_path = PathBuf::from(path);
        }
        if let Some(secs) = env_var(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| ConfigError::Invalid {
                name: ENV_TIMEOUT_SECS,
                reason: format!("'{}' is not a number of seconds", secs),
            })?;
            config.callback_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Sets the redirect URI. Only plain `http` URIs are accepted because the
    /// redirect is captured by a local, non-TLS listener.
    pub fn with_redirect_uri(mut self, uri: &str) -> Result<Self, ConfigError> {
        let url = parse_url(ENV_REDIRECT_URI, uri)?;
        if url.scheme() != "http" {
            return Err(ConfigError::Invalid {
                name: ENV_REDIRECT_URI,
                reason: format!("scheme must be http, got {}", url.scheme()),
            });
        }
        if url.host_str().is_none() {
            return Err(ConfigError::Invalid {
                name: ENV_REDIRECT_URI,
                reason: "missing host".to_string(),
            });
        }
        self.redirect_uri = url;
        Ok(self)
    }

    pub fn with_authorize_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.authorize_url = parse_url(ENV_AUTH_URL, url)?;
        Ok(self)
    }

    pub fn with_token_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.token_url = parse_url(ENV_TOKEN_URL, url)?;
        Ok(self)
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = path.into();
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Socket address the redirect listener binds, derived from the redirect
    /// URI. Hostnames resolving to several addresses prefer IPv4.
    pub fn redirect_address(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            name: ENV_REDIRECT_URI,
            reason,
        };

        let host = self
            .redirect_uri
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']');
        let port = self
            .redirect_uri
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port".to_string()))?;

        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| invalid(format!("{} does not resolve", host)))
    }

    /// Path component of the redirect URI served by the listener.
    pub fn redirect_path(&self) -> &str {
        self.redirect_uri.path()
    }
}
