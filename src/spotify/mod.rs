//! # Spotify Integration Module
//!
//! Authentication against Spotify's accounts service using the OAuth 2.0
//! Authorization Code Flow with PKCE (Proof Key for Code Exchange).
//!
//! ## Architecture
//!
//! ```text
//! REST layer (get_authorization_header)
//!          ↓
//! PkceAuthenticator (auth)
//!     ├── CredentialStore      (management)
//!     ├── TokenExchanger       (token)
//!     ├── RedirectServer       (server, api)
//!     └── verifier / challenge (utils)
//!          ↓
//! accounts.spotify.com
//! ```
//!
//! ## Flow Implementation
//! 1. **Refresh**: stored credentials are refreshed with their refresh token
//! 2. **Fallback**: any refresh failure starts a full authorization
//! 3. **Challenge Creation**: a random verifier and its S256 challenge
//! 4. **Authorization Request**: the user is sent to Spotify with the challenge
//! 5. **Local Callback**: a single-use listener captures the authorization code
//! 6. **Token Exchange**: code + verifier are exchanged for credentials
//! 7. **Token Storage**: credentials are persisted atomically for the next run

pub mod auth;
pub mod token;

pub use auth::{BrowserLauncher, PkceAuthenticator, SystemBrowser};
pub use token::{SpotifyTokenClient, TokenExchanger};
