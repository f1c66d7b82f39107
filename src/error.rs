//! Error types for the authentication flow.
//!
//! Each component reports its own error enum. [`AuthenticationError`] is what
//! callers of [`crate::spotify::auth::PkceAuthenticator`] see, with the
//! component error kept as its source.

use std::{path::PathBuf, time::Duration};

use reqwest::StatusCode;
use thiserror::Error;

use crate::types::Scope;

/// Failures talking to the token endpoint.
#[derive(Debug, Error)]
pub enum TokenError {
    /// DNS, connect, TLS or timeout failure. Retrying is up to the caller.
    #[error("network error while contacting the token endpoint: {0}")]
    Network(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status.
    #[error("token endpoint rejected the request ({status}): {}", rejection_reason(.error, .description))]
    Rejected {
        status: StatusCode,
        error: Option<String>,
        description: Option<String>,
    },

    /// 2xx answer whose body is not a usable credential record.
    #[error("token endpoint returned an invalid credential record: {0}")]
    InvalidResponse(String),
}

fn rejection_reason(error: &Option<String>, description: &Option<String>) -> String {
    match (error, description) {
        (Some(e), Some(d)) => format!("{e}: {d}"),
        (Some(e), None) => e.clone(),
        (None, Some(d)) => d.clone(),
        (None, None) => "no error payload".to_string(),
    }
}

impl TokenError {
    /// True for transport-level failures as opposed to API rejections.
    pub fn is_transient(&self) -> bool {
        matches!(self, TokenError::Network(_))
    }
}

/// Failures of the local redirect capture server.
#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("redirect state did not match the issued state (possible CSRF attack)")]
    StateMismatch,

    #[error("redirect is missing the `{0}` query parameter")]
    MalformedRedirect(&'static str),

    #[error("authorization was denied: {0}")]
    AuthorizationDenied(String),

    #[error("no authorization redirect received within {}s", .0.as_secs())]
    AuthorizationTimeout(Duration),

    #[error("failed to bind redirect listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("redirect listener failed: {0}")]
    Server(#[source] std::io::Error),

    #[error("redirect listener stopped before a redirect was handled")]
    Closed,
}

/// Failures reading or writing the persisted credential record.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored credentials at {}", .0.display())]
    NotFound(PathBuf),

    #[error("stored credentials at {} are corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize credentials: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Invalid or missing configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Granted scopes do not cover what an operation needs.
#[derive(Debug, Error)]
#[error("missing required scopes: {}", crate::types::join_scopes(.0))]
pub struct MissingScopes(pub Vec<Scope>);

/// Terminal failure of [`crate::spotify::auth::PkceAuthenticator::get_credentials`].
#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("authorization redirect failed")]
    Redirect(#[from] RedirectError),

    #[error("token exchange failed")]
    Token(#[from] TokenError),

    #[error("credential store failed")]
    Store(#[from] StoreError),

    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    #[error("failed to open the authorization page")]
    Browser(#[source] std::io::Error),
}
