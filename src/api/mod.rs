//! # API Module
//!
//! HTTP endpoints served by the local redirect listener during the OAuth 2.0
//! PKCE flow.
//!
//! - [`callback`] - receives Spotify's authorization redirect, validates the
//!   CSRF `state` and hands the authorization code to the waiting flow. Only
//!   the first redirect is handled; later ones get `410 Gone`.
//!
//! The router itself is assembled in [`crate::server`].

mod callback;

pub use callback::{CallbackState, RedirectOutcome, callback, parse_redirect};
