use std::{sync::mpsc::Sender, thread::JoinHandle};

use log::debug;
use rouille::{Request, Response};

use super::listen_addrs;
use crate::challenge::{ChallengeProvider, ProviderError};

pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Answers HTTP-01 challenges from a small server of its own. The server
/// only runs between `present` and `clean_up`.
pub struct HttpServerProvider {
    host: String,
    port: u16,
    running: Option<(JoinHandle<()>, Sender<()>)>,
}

impl HttpServerProvider {
    pub fn new<T: Into<String>>(host: T, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            running: None,
        }
    }

    fn stop(&mut self) {
        if let Some((handle, stop)) = self.running.take() {
            let _ = stop.send(());
            let _ = handle.join();
        }
    }
}

impl ChallengeProvider for HttpServerProvider {
    fn present(&mut self, domain: &str, token: &str, key_auth: &str) -> Result<(), ProviderError> {
        self.stop();

        let addrs = listen_addrs(&self.host, self.port)?;
        let path = format!("{}{}", ACME_CHALLENGE_PREFIX, token);
        let body = key_auth.to_owned();
        let server = rouille::Server::new(addrs.as_slice(), move |request: &Request| {
            if request.url() == path {
                debug!("Served HTTP-01 challenge to {}", request.remote_addr());
                Response::text(body.clone())
            } else {
                Response::empty_404()
            }
        })
        .map_err(|e| ProviderError::Server(e.to_string()))?;

        debug!(
            "Serving HTTP-01 challenge for {} on {}",
            domain,
            server.server_addr()
        );
        self.running = Some(server.stoppable());
        Ok(())
    }

    fn clean_up(&mut self, _: &str, _: &str, _: &str) -> Result<(), ProviderError> {
        self.stop();
        Ok(())
    }
}

impl Drop for HttpServerProvider {
    fn drop(&mut self) {
        self.stop();
    }
}
