use std::{collections::HashMap, sync::Arc};

use axum::{Extension, extract::Query, http::StatusCode, response::Html};
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

use crate::error::RedirectError;

pub type RedirectOutcome = Result<String, RedirectError>;

const SUCCESS_PAGE: &str =
    "<h2>Authentication successful.</h2><p>You may close this browser window.</p>";
const DENIED_PAGE: &str = "<h2>Authorization was denied.</h2><p>You may close this browser window.</p>";
const REJECTED_PAGE: &str = "<h4>Login failed: invalid authorization redirect.</h4>";
const ALREADY_HANDLED_PAGE: &str = "<h4>This authorization request was already handled.</h4>";

/// Shared between the redirect route and the waiting flow. The outcome sender
/// is taken by the first request, so only one redirect is ever handled.
#[derive(Clone)]
pub struct CallbackState {
    expected_state: Arc<str>,
    outcome: Arc<Mutex<Option<oneshot::Sender<RedirectOutcome>>>>,
}

impl CallbackState {
    pub fn new(expected_state: &str, outcome: oneshot::Sender<RedirectOutcome>) -> Self {
        Self {
            expected_state: Arc::from(expected_state),
            outcome: Arc::new(Mutex::new(Some(outcome))),
        }
    }
}

pub async fn callback(
    Query(params): Query<HashMap<String, String>>,
    Extension(shared_state): Extension<CallbackState>,
) -> (StatusCode, Html<&'static str>) {
    let Some(sender) = shared_state.outcome.lock().await.take() else {
        debug!("ignoring redirect after the first one was handled");
        return (StatusCode::GONE, Html(ALREADY_HANDLED_PAGE));
    };

    let outcome = parse_redirect(&params, &shared_state.expected_state);
    let response = match &outcome {
        Ok(_) => (StatusCode::OK, Html(SUCCESS_PAGE)),
        Err(RedirectError::AuthorizationDenied(_)) => (StatusCode::OK, Html(DENIED_PAGE)),
        Err(_) => (StatusCode::BAD_REQUEST, Html(REJECTED_PAGE)),
    };

    // The flow may have given up already; the browser still gets its page.
    let _ = sender.send(outcome);
    response
}

/// Extracts the authorization code from the redirect query.
///
/// `state` is checked before anything else so that nothing from a forged
/// redirect, including its `error`, is trusted.
pub fn parse_redirect(
    params: &HashMap<String, String>,
    expected_state: &str,
) -> Result<String, RedirectError> {
    let state = params
        .get("state")
        .ok_or(RedirectError::MalformedRedirect("state"))?;
    if state != expected_state {
        return Err(RedirectError::StateMismatch);
    }

    if let Some(reason) = params.get("error") {
        return Err(RedirectError::AuthorizationDenied(reason.clone()));
    }

    match params.get("code") {
        Some(code) if !code.is_empty() => Ok(code.clone()),
        _ => Err(RedirectError::MalformedRedirect("code")),
    }
}
