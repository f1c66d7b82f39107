use std::{fmt, net::SocketAddr, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::MissingScopes;

/// Bearer-token record returned by the token endpoint and persisted between runs.
///
/// Field names match the provider's JSON response so the record can be
/// deserialized straight from the token endpoint and written back unchanged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Space-separated scope identifiers granted to `access_token`.
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_expires_in() -> u64 {
    3600
}

impl Credentials {
    /// A record is only usable with a non-empty access token.
    pub fn is_usable(&self) -> bool {
        !self.access_token.trim().is_empty()
    }

    /// Refresh token, if the provider issued a non-empty one.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Value for the `Authorization` header of API requests.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Iterates the granted scope identifiers as sent by the provider.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes().any(|s| s == scope.as_str())
    }

    /// Fails with every scope from `required` that was not granted.
    pub fn require_scopes(&self, required: &[Scope]) -> Result<(), MissingScopes> {
        let missing: Vec<Scope> = required
            .iter()
            .copied()
            .filter(|s| !self.has_scope(*s))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingScopes(missing))
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

/// Permission identifiers understood by the Spotify Web API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    UgcImageUpload,
    UserReadRecentlyPlayed,
    UserTopRead,
    UserReadPlaybackPosition,
    UserReadPlaybackState,
    UserModifyPlaybackState,
    UserReadCurrentlyPlaying,
    AppRemoteControl,
    Streaming,
    PlaylistModifyPublic,
    PlaylistModifyPrivate,
    PlaylistReadPrivate,
    PlaylistReadCollaborative,
    UserFollowModify,
    UserFollowRead,
    UserLibraryModify,
    UserLibraryRead,
    UserReadEmail,
    UserReadPrivate,
}

impl Scope {
    pub const ALL: [Scope; 19] = [
        Scope::UgcImageUpload,
        Scope::UserReadRecentlyPlayed,
        Scope::UserTopRead,
        Scope::UserReadPlaybackPosition,
        Scope::UserReadPlaybackState,
        Scope::UserModifyPlaybackState,
        Scope::UserReadCurrentlyPlaying,
        Scope::AppRemoteControl,
        Scope::Streaming,
        Scope::PlaylistModifyPublic,
        Scope::PlaylistModifyPrivate,
        Scope::PlaylistReadPrivate,
        Scope::PlaylistReadCollaborative,
        Scope::UserFollowModify,
        Scope::UserFollowRead,
        Scope::UserLibraryModify,
        Scope::UserLibraryRead,
        Scope::UserReadEmail,
        Scope::UserReadPrivate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::UgcImageUpload => "ugc-image-upload",
            Scope::UserReadRecentlyPlayed => "user-read-recently-played",
            Scope::UserTopRead => "user-top-read",
            Scope::UserReadPlaybackPosition => "user-read-playback-position",
            Scope::UserReadPlaybackState => "user-read-playback-state",
            Scope::UserModifyPlaybackState => "user-modify-playback-state",
            Scope::UserReadCurrentlyPlaying => "user-read-currently-playing",
            Scope::AppRemoteControl => "app-remote-control",
            Scope::Streaming => "streaming",
            Scope::PlaylistModifyPublic => "playlist-modify-public",
            Scope::PlaylistModifyPrivate => "playlist-modify-private",
            Scope::PlaylistReadPrivate => "playlist-read-private",
            Scope::PlaylistReadCollaborative => "playlist-read-collaborative",
            Scope::UserFollowModify => "user-follow-modify",
            Scope::UserFollowRead => "user-follow-read",
            Scope::UserLibraryModify => "user-library-modify",
            Scope::UserLibraryRead => "user-library-read",
            Scope::UserReadEmail => "user-read-email",
            Scope::UserReadPrivate => "user-read-private",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .iter()
            .copied()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| format!("unknown scope '{}'", s))
    }
}

/// Space-separated request form of a scope list.
pub fn join_scopes(scopes: &[Scope]) -> String {
    scopes
        .iter()
        .map(Scope::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a space-separated scope list, rejecting unknown identifiers.
pub fn parse_scopes(value: &str) -> Result<Vec<Scope>, String> {
    value.split_whitespace().map(Scope::from_str).collect()
}

/// State of a single full authorization attempt.
#[derive(Debug, Clone)]
pub struct FlowState {
    pub state_token: String,
    pub authorization_code: Option<String>,
    pub server_address: SocketAddr,
}
