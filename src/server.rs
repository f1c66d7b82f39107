use std::{io, net::SocketAddr, time::Duration};

use axum::{Extension, Router, routing::get};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::debug;

use crate::{api, error::RedirectError};

/// How long in-flight connections may take to drain after the redirect.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Single-use listener that captures one authorization redirect.
///
/// Binding is separate from waiting so the socket is ready before the user's
/// browser is sent to the authorization page.
pub struct RedirectServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    path: String,
}

impl RedirectServer {
    pub async fn bind(addr: SocketAddr, path: &str) -> Result<Self, RedirectError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RedirectError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(RedirectError::Server)?;

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        debug!(%local_addr, %path, "redirect listener bound");
        Ok(Self {
            listener,
            local_addr,
            path,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until one redirect arrives on the path or `timeout` elapses,
    /// then shuts the listener down and returns the authorization code.
    pub async fn await_code(
        self,
        expected_state: &str,
        timeout: Duration,
    ) -> Result<String, RedirectError> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = Router::new().route(
            &self.path,
            get(api::callback).layer(Extension(api::CallbackState::new(
                expected_state,
                outcome_tx,
            ))),
        );

        let listener = self.listener;
        let task = ServerTask(Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        })));

        let outcome = tokio::time::timeout(timeout, outcome_rx).await;

        let _ = shutdown_tx.send(());
        let served = task.join().await;
        debug!(addr = %self.local_addr, "redirect listener closed");

        match outcome {
            Ok(Ok(result)) => result,
            Err(_) => Err(RedirectError::AuthorizationTimeout(timeout)),
            Ok(Err(_)) => Err(served.err().unwrap_or(RedirectError::Closed)),
        }
    }
}

/// Binds `bind_address` and waits for a single redirect on `path`.
pub async fn await_authorization_redirect(
    expected_state: &str,
    bind_address: SocketAddr,
    path: &str,
    timeout: Duration,
) -> Result<String, RedirectError> {
    RedirectServer::bind(bind_address, path)
        .await?
        .await_code(expected_state, timeout)
        .await
}

/// Owns the serving task; aborting it on drop releases the bound port when the
/// waiting future is cancelled.
struct ServerTask(Option<JoinHandle<io::Result<()>>>);

impl ServerTask {
    async fn join(mut self) -> Result<(), RedirectError> {
        let Some(mut handle) = self.0.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(result)) => result.map_err(RedirectError::Server),
            Ok(Err(join_err)) => Err(RedirectError::Server(io::Error::other(join_err))),
            Err(_) => {
                debug!("redirect listener did not drain in time, aborting");
                handle.abort();
                let _ = handle.await;
                Ok(())
            }
        }
    }
}

impl Drop for ServerTask {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}
