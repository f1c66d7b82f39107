use std::{io, time::Duration};

use indicatif::{ProgressBar, ProgressStyle};
use url::Url;

use crate::{
    cli::{error_chain, load_config},
    error, info,
    spotify::{BrowserLauncher, PkceAuthenticator},
    success, warning,
};

/// Opens the browser and keeps a spinner running while the flow waits for
/// the redirect.
struct SpinnerBrowser {
    pb: ProgressBar,
}

impl BrowserLauncher for SpinnerBrowser {
    fn open(&self, url: &Url) -> io::Result<()> {
        if webbrowser::open(url.as_str()).is_err() {
            self.pb.suspend(|| {
                warning!(
                    "Failed to open browser. Please navigate to the following URL manually:\n{}",
                    url
                )
            });
        }

        self.pb
            .set_message("Waiting for authorization in the browser...");
        self.pb.enable_steady_tick(Duration::from_millis(100));
        Ok(())
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    pb
}

pub async fn auth() {
    let config = load_config();
    let pb = spinner();

    let mut authenticator = match PkceAuthenticator::new(config) {
        Ok(a) => a.with_browser(SpinnerBrowser { pb: pb.clone() }),
        Err(e) => error!("Cannot set up authentication: {}", error_chain(&e)),
    };

    match authenticator.get_credentials().await {
        Ok(credentials) => {
            pb.finish_and_clear();
            success!("Authentication successful!");
            if credentials.scope.is_empty() {
                info!("No scopes granted.");
            } else {
                info!("Granted scopes: {}", credentials.scope);
            }
            info!(
                "Credentials stored at {}",
                authenticator.store().path().display()
            );
        }
        Err(e) => {
            pb.finish_and_clear();
            error!("Authentication failed: {}", error_chain(&e));
        }
    }
}

pub async fn header() {
    let config = load_config();

    let mut authenticator = match PkceAuthenticator::new(config) {
        Ok(a) => a,
        Err(e) => error!("Cannot set up authentication: {}", error_chain(&e)),
    };

    match authenticator.get_authorization_header().await {
        Ok(header) => println!("{}", header),
        Err(e) => error!("Authentication failed: {}", error_chain(&e)),
    }
}
