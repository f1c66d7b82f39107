use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{error::TokenError, types::Credentials};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The two token-bearing calls of the PKCE flow.
///
/// Neither call is idempotent: authorization codes are single use, and some
/// providers rotate refresh tokens on every refresh.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Trades an authorization code plus its PKCE verifier for credentials.
    async fn exchange_code_for_token(
        &self,
        authorization_code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        client_id: &str,
    ) -> Result<Credentials, TokenError>;

    /// Obtains a new access token. The returned record may lack a
    /// `refresh_token`; keeping the previous one is the caller's job.
    async fn refresh(&self, refresh_token: &str, client_id: &str)
    -> Result<Credentials, TokenError>;
}

/// OAuth error payload, e.g. `{"error":"invalid_grant","error_description":"..."}`.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// [`TokenExchanger`] talking to Spotify's token endpoint over HTTPS.
#[derive(Debug, Clone)]
pub struct SpotifyTokenClient {
    client: Client,
    token_url: Url,
}

impl SpotifyTokenClient {
    pub fn new(token_url: Url) -> Result<Self, TokenError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, token_url))
    }

    pub fn with_client(client: Client, token_url: Url) -> Self {
        Self { client, token_url }
    }

    async fn post_form(&self, params: &[(&str, &str)]) -> Result<Credentials, TokenError> {
        let res = self
            .client
            .post(self.token_url.clone())
            .form(params)
            .send()
            .await?;

        parse_token_response(res).await
    }
}

#[async_trait]
impl TokenExchanger for SpotifyTokenClient {
    async fn exchange_code_for_token(
        &self,
        authorization_code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        client_id: &str,
    ) -> Result<Credentials, TokenError> {
        debug!(url = %self.token_url, "exchanging authorization code");
        self.post_form(&[
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("code", authorization_code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &str,
    ) -> Result<Credentials, TokenError> {
        debug!(url = %self.token_url, "refreshing access token");
        self.post_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ])
        .await
    }
}

async fn parse_token_response(res: Response) -> Result<Credentials, TokenError> {
    let status = res.status();
    let body = res.text().await?;

    if !status.is_success() {
        let payload = serde_json::from_str::<OAuthErrorBody>(&body).ok();
        let (error, description) = match payload {
            Some(p) => (p.error, p.error_description),
            None => (None, Some(body).filter(|b| !b.trim().is_empty())),
        };
        return Err(TokenError::Rejected {
            status,
            error,
            description,
        });
    }

    let credentials: Credentials =
        serde_json::from_str(&body).map_err(|e| TokenError::InvalidResponse(e.to_string()))?;

    if !credentials.is_usable() {
        return Err(TokenError::InvalidResponse(
            "empty access_token".to_string(),
        ));
    }

    Ok(credentials)
}
