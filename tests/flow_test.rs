use std::{
    io,
    net::TcpListener,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use spotify_pkce::{
    AuthConfig, AuthenticationError, BrowserLauncher, CredentialStore, Credentials,
    PkceAuthenticator, RedirectError, Scope, SpotifyTokenClient, StoreError, TokenError,
    TokenExchanger, utils::generate_code_challenge,
};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Refresh {
        refresh_token: String,
    },
    Exchange {
        code: String,
        verifier: String,
        redirect_uri: String,
        client_id: String,
    },
}

/// Token endpoint stand-in. `None` responses answer with HTTP 400.
#[derive(Clone, Default)]
struct MockExchanger {
    refresh_response: Option<Credentials>,
    exchange_response: Option<Credentials>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockExchanger {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

fn rejected() -> TokenError {
    TokenError::Rejected {
        status: StatusCode::BAD_REQUEST,
        error: Some("invalid_grant".to_string()),
        description: None,
    }
}

#[async_trait]
impl TokenExchanger for MockExchanger {
    async fn exchange_code_for_token(
        &self,
        authorization_code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        client_id: &str,
    ) -> Result<Credentials, TokenError> {
        self.calls.lock().unwrap().push(Call::Exchange {
            code: authorization_code.to_string(),
            verifier: code_verifier.to_string(),
            redirect_uri: redirect_uri.to_string(),
            client_id: client_id.to_string(),
        });
        self.exchange_response.clone().ok_or_else(rejected)
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        _client_id: &str,
    ) -> Result<Credentials, TokenError> {
        self.calls.lock().unwrap().push(Call::Refresh {
            refresh_token: refresh_token.to_string(),
        });
        self.refresh_response.clone().ok_or_else(rejected)
    }
}

/// Plays the user's browser: records the authorization URL and follows the
/// redirect back to the local listener.
#[derive(Clone, Default)]
struct RedirectingBrowser {
    opened: Arc<Mutex<Vec<Url>>>,
    /// Replaces the `state` echoed back, to simulate a forged redirect.
    forged_state: Option<String>,
    /// Record the URL but never redirect.
    stay_idle: bool,
}

impl RedirectingBrowser {
    fn opened(&self) -> Vec<Url> {
        self.opened.lock().unwrap().clone()
    }
}

fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

impl BrowserLauncher for RedirectingBrowser {
    fn open(&self, url: &Url) -> io::Result<()> {
        self.opened.lock().unwrap().push(url.clone());
        if self.stay_idle {
            return Ok(());
        }

        let redirect_uri = query_param(url, "redirect_uri").unwrap_or_default();
        let state = self
            .forged_state
            .clone()
            .or_else(|| query_param(url, "state"))
            .unwrap_or_default();

        let mut redirect = Url::parse(&redirect_uri).unwrap();
        redirect
            .query_pairs_mut()
            .append_pair("code", "auth-code")
            .append_pair("state", &state);

        tokio::spawn(async move {
            let client = reqwest::Client::builder().no_proxy().build().unwrap();
            let _ = client.get(redirect).send().await;
        });
        Ok(())
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn test_config(dir: &Path, port: u16) -> AuthConfig {
    AuthConfig::new("client-1")
        .with_redirect_uri(&format!("http://127.0.0.1:{}/callback", port))
        .unwrap()
        .with_scopes([Scope::UserFollowRead, Scope::PlaylistReadPrivate])
        .with_credentials_path(dir.join("credentials.json"))
        .with_callback_timeout(Duration::from_secs(10))
}

fn credentials(access: &str, refresh: Option<&str>) -> Credentials {
    Credentials {
        access_token: access.to_string(),
        token_type: "Bearer".to_string(),
        scope: "a b".to_string(),
        expires_in: 3600,
        refresh_token: refresh.map(str::to_string),
    }
}

async fn seed_store(dir: &Path, creds: &Credentials) {
    CredentialStore::new(dir.join("credentials.json"))
        .save(creds)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_refresh_path_skips_browser_and_listener() {
    let dir = TempDir::new().unwrap();
    seed_store(dir.path(), &credentials("old", Some("abc"))).await;

    // Occupy the redirect port: a full authorization would fail to bind it.
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let exchanger = MockExchanger {
        refresh_response: Some(credentials("new", None)),
        ..Default::default()
    };
    let browser = RedirectingBrowser::default();

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), port))
        .unwrap()
        .with_exchanger(exchanger.clone())
        .with_browser(browser.clone());

    let creds = auth.get_credentials().await.unwrap();

    assert_eq!(creds.access_token, "new");
    // refresh response had no refresh token, the stored one is kept
    assert_eq!(creds.refresh_token.as_deref(), Some("abc"));

    assert_eq!(
        exchanger.calls(),
        vec![Call::Refresh {
            refresh_token: "abc".to_string()
        }]
    );
    assert!(browser.opened().is_empty());

    assert_eq!(auth.store().load().await.unwrap(), creds);
}

#[tokio::test]
async fn test_missing_store_runs_full_authorization() {
    let dir = TempDir::new().unwrap();
    let port = free_port();

    let issued = credentials("X", Some("Y"));
    let exchanger = MockExchanger {
        exchange_response: Some(issued.clone()),
        ..Default::default()
    };
    let browser = RedirectingBrowser::default();

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), port))
        .unwrap()
        .with_exchanger(exchanger.clone())
        .with_browser(browser.clone());

    let creds = auth.get_credentials().await.unwrap();
    assert_eq!(creds, issued);

    let opened = browser.opened();
    assert_eq!(opened.len(), 1);
    let url = &opened[0];
    assert_eq!(url.host_str(), Some("accounts.spotify.com"));
    assert_eq!(url.path(), "/authorize");
    assert_eq!(query_param(url, "code_challenge_method").as_deref(), Some("S256"));
    assert_eq!(query_param(url, "response_type").as_deref(), Some("code"));
    assert_eq!(query_param(url, "client_id").as_deref(), Some("client-1"));
    assert_eq!(
        query_param(url, "scope").as_deref(),
        Some("user-follow-read playlist-read-private")
    );
    assert!(query_param(url, "state").is_some_and(|s| !s.is_empty()));

    let redirect_uri = format!("http://127.0.0.1:{}/callback", port);
    assert_eq!(query_param(url, "redirect_uri"), Some(redirect_uri.clone()));

    let calls = exchanger.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        Call::Exchange {
            code,
            verifier,
            redirect_uri: sent_uri,
            client_id,
        } => {
            assert_eq!(code, "auth-code");
            assert_eq!(sent_uri, &redirect_uri);
            assert_eq!(client_id, "client-1");
            // the verifier sent to the token endpoint matches the challenge
            assert_eq!(
                query_param(url, "code_challenge"),
                Some(generate_code_challenge(verifier))
            );
        }
        other => panic!("unexpected call: {:?}", other),
    }

    assert_eq!(auth.store().load().await.unwrap(), issued);
}

#[tokio::test]
async fn test_rejected_refresh_falls_back_to_authorization() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    seed_store(dir.path(), &credentials("stale", Some("abc"))).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "X",
            "refresh_token": "Y",
            "scope": "a b",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token_url = Url::parse(&format!("{}/api/token", server.uri())).unwrap();
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    let browser = RedirectingBrowser::default();

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), port))
        .unwrap()
        .with_exchanger(SpotifyTokenClient::with_client(http, token_url))
        .with_browser(browser.clone());

    let creds = auth.get_credentials().await.unwrap();

    let expected = credentials("X", Some("Y"));
    assert_eq!(creds, expected);
    assert_eq!(browser.opened().len(), 1);
    assert_eq!(auth.store().load().await.unwrap(), expected);
}

#[tokio::test]
async fn test_corrupt_store_falls_back_to_authorization() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    std::fs::write(dir.path().join("credentials.json"), "{not json").unwrap();

    let exchanger = MockExchanger {
        exchange_response: Some(credentials("X", Some("Y"))),
        ..Default::default()
    };

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), port))
        .unwrap()
        .with_exchanger(exchanger.clone())
        .with_browser(RedirectingBrowser::default());

    let creds = auth.get_credentials().await.unwrap();
    assert_eq!(creds.access_token, "X");
    // no refresh was attempted with unreadable credentials
    assert!(matches!(exchanger.calls().as_slice(), [Call::Exchange { .. }]));
}

#[tokio::test]
async fn test_stored_record_without_refresh_token_reauthorizes() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    seed_store(dir.path(), &credentials("old", None)).await;

    let exchanger = MockExchanger {
        exchange_response: Some(credentials("X", Some("Y"))),
        ..Default::default()
    };

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), port))
        .unwrap()
        .with_exchanger(exchanger.clone())
        .with_browser(RedirectingBrowser::default());

    assert_eq!(auth.get_credentials().await.unwrap().access_token, "X");
    assert!(matches!(exchanger.calls().as_slice(), [Call::Exchange { .. }]));
}

#[tokio::test]
async fn test_state_mismatch_is_fatal() {
    let dir = TempDir::new().unwrap();
    let port = free_port();

    let exchanger = MockExchanger {
        exchange_response: Some(credentials("X", Some("Y"))),
        ..Default::default()
    };
    let browser = RedirectingBrowser {
        forged_state: Some("forged".to_string()),
        ..Default::default()
    };

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), port))
        .unwrap()
        .with_exchanger(exchanger.clone())
        .with_browser(browser);

    let err = auth.get_credentials().await.unwrap_err();
    assert!(matches!(
        err,
        AuthenticationError::Redirect(RedirectError::StateMismatch)
    ));

    // the code from the forged redirect was never exchanged or stored
    assert!(exchanger.calls().is_empty());
    assert!(matches!(
        auth.store().load().await,
        Err(StoreError::NotFound(_))
    ));
    assert!(auth.cached_credentials().is_none());
}

#[tokio::test]
async fn test_rejected_code_exchange_is_fatal() {
    let dir = TempDir::new().unwrap();
    let port = free_port();

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), port))
        .unwrap()
        .with_exchanger(MockExchanger::default())
        .with_browser(RedirectingBrowser::default());

    let err = auth.get_credentials().await.unwrap_err();
    assert!(matches!(
        err,
        AuthenticationError::Token(TokenError::Rejected { .. })
    ));
    assert!(std::error::Error::source(&err).is_some());
    assert!(matches!(
        auth.store().load().await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_abandoned_browser_flow_times_out() {
    let dir = TempDir::new().unwrap();
    let port = free_port();

    let config = test_config(dir.path(), port).with_callback_timeout(Duration::from_millis(200));
    let mut auth = PkceAuthenticator::new(config)
        .unwrap()
        .with_exchanger(MockExchanger::default())
        .with_browser(RedirectingBrowser {
            stay_idle: true,
            ..Default::default()
        });

    let err = auth.get_credentials().await.unwrap_err();
    assert!(matches!(
        err,
        AuthenticationError::Redirect(RedirectError::AuthorizationTimeout(_))
    ));

    // the redirect port is free again
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
}

#[tokio::test]
async fn test_authorization_header_uses_cached_token() {
    let dir = TempDir::new().unwrap();
    seed_store(dir.path(), &credentials("old", Some("abc"))).await;

    let exchanger = MockExchanger {
        refresh_response: Some(credentials("new", Some("abc"))),
        ..Default::default()
    };

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), free_port()))
        .unwrap()
        .with_exchanger(exchanger.clone())
        .with_browser(RedirectingBrowser::default());

    assert_eq!(auth.get_authorization_header().await.unwrap(), "Bearer new");
    assert_eq!(auth.get_authorization_header().await.unwrap(), "Bearer new");
    assert_eq!(exchanger.calls().len(), 1);
}

#[tokio::test]
async fn test_authorization_header_refreshes_expired_token() {
    let dir = TempDir::new().unwrap();
    seed_store(dir.path(), &credentials("old", Some("abc"))).await;

    let mut short_lived = credentials("new", Some("abc"));
    short_lived.expires_in = 60;
    let exchanger = MockExchanger {
        refresh_response: Some(short_lived),
        ..Default::default()
    };

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), free_port()))
        .unwrap()
        .with_exchanger(exchanger.clone())
        .with_browser(RedirectingBrowser::default());

    auth.get_authorization_header().await.unwrap();
    auth.get_authorization_header().await.unwrap();
    // a 60s token is inside the expiry margin, so every call refreshes
    assert_eq!(exchanger.calls().len(), 2);
}

#[tokio::test]
async fn test_authorization_header_with_huge_lifetime() {
    for expires_in in [10_000_000_000_000, u64::MAX] {
        let dir = TempDir::new().unwrap();
        seed_store(dir.path(), &credentials("old", Some("abc"))).await;

        let mut long_lived = credentials("new", Some("abc"));
        long_lived.expires_in = expires_in;
        let exchanger = MockExchanger {
            refresh_response: Some(long_lived),
            ..Default::default()
        };

        let mut auth = PkceAuthenticator::new(test_config(dir.path(), free_port()))
            .unwrap()
            .with_exchanger(exchanger.clone())
            .with_browser(RedirectingBrowser::default());

        assert_eq!(auth.get_authorization_header().await.unwrap(), "Bearer new");
        assert_eq!(auth.get_authorization_header().await.unwrap(), "Bearer new");
        // a lifetime beyond the calendar is served from the cache
        assert_eq!(exchanger.calls().len(), 1);
    }
}

#[tokio::test]
async fn test_unsaved_refresh_is_still_returned() {
    let dir = TempDir::new().unwrap();
    seed_store(dir.path(), &credentials("old", Some("abc"))).await;
    // a directory in the temp file's place makes every save fail
    std::fs::create_dir(dir.path().join("credentials.json.tmp")).unwrap();

    let exchanger = MockExchanger {
        refresh_response: Some(credentials("new", None)),
        ..Default::default()
    };
    let browser = RedirectingBrowser::default();

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), free_port()))
        .unwrap()
        .with_exchanger(exchanger.clone())
        .with_browser(browser.clone());

    let creds = auth.get_credentials().await.unwrap();
    assert_eq!(creds.access_token, "new");
    assert_eq!(auth.cached_credentials(), Some(&creds));
    assert!(browser.opened().is_empty());

    // the previous record is left in place
    assert_eq!(auth.store().load().await.unwrap().access_token, "old");
}

#[tokio::test]
async fn test_unsaved_authorization_is_fatal() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("credentials.json.tmp")).unwrap();

    let exchanger = MockExchanger {
        exchange_response: Some(credentials("X", Some("Y"))),
        ..Default::default()
    };

    let mut auth = PkceAuthenticator::new(test_config(dir.path(), free_port()))
        .unwrap()
        .with_exchanger(exchanger.clone())
        .with_browser(RedirectingBrowser::default());

    let err = auth.get_credentials().await.unwrap_err();
    assert!(matches!(err, AuthenticationError::Store(StoreError::Io(_))));
    assert!(auth.cached_credentials().is_none());
    assert!(matches!(exchanger.calls().as_slice(), [Call::Exchange { .. }]));
}

#[test]
fn test_authorization_url() {
    let dir = TempDir::new().unwrap();
    let auth = PkceAuthenticator::new(test_config(dir.path(), 8080)).unwrap();

    let url = auth.authorization_url("challenge-1", "state-1");
    assert_eq!(
        url.as_str(),
        "https://accounts.spotify.com/authorize?client_id=client-1&response_type=code\
         &redirect_uri=http%3A%2F%2F127.0.0.1%3A8080%2Fcallback\
         &code_challenge_method=S256&code_challenge=challenge-1&state=state-1\
         &scope=user-follow-read+playlist-read-private"
    );
}
