//! # CLI Module
//!
//! User-facing commands of the `spotify-pkce` binary.
//!
//! - [`auth`] - runs the PKCE flow (refresh, or full browser authorization)
//!   and stores the resulting credentials
//! - [`header`] - prints a valid `Authorization` header value, for scripting
//!
//! Fatal problems are reported with the crate's `error!` macro, which exits
//! the process.

mod auth;

use std::error::Error;

pub use auth::{auth, header};

use crate::{config::AuthConfig, error};

fn load_config() -> AuthConfig {
    match AuthConfig::from_env() {
        Ok(config) => config,
        Err(e) => error!("Invalid configuration: {}", e),
    }
}

/// Renders an error and all of its sources on one line.
pub fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
