use std::{path::PathBuf, process::ExitStatus};

use log::{debug, warn};
use openssl::error::ErrorStack;
use thiserror::Error;

use crate::{
    client::CaClient,
    config::{ChallengeBinding, ChallengeConfig},
    error::Error,
    providers::{DnsProviderRegistry, HttpServerProvider, TlsAlpnServerProvider, WebRootProvider},
};

/// Makes a challenge response available where the CA will look for it.
pub trait ChallengeProvider: Send {
    fn present(&mut self, domain: &str, token: &str, key_auth: &str) -> Result<(), ProviderError>;
    fn clean_up(&mut self, domain: &str, token: &str, key_auth: &str)
        -> Result<(), ProviderError>;
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("webroot path {0:?} does not exist")]
    WebRootMissing(PathBuf),
    #[error("unrecognized DNS provider: {0}")]
    UnknownDnsProvider(String),
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("could not start challenge server: {0}")]
    Server(String),
    #[error("openssl: {0}")]
    Openssl(#[from] ErrorStack),
    #[error("{program:?} exited with {status}: {stderr}")]
    Exec {
        program: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
}

/// Attaches every provider `config` asks for to `client`.
///
/// All providers are constructed before the first one is bound, so a
/// construction failure (an unknown DNS provider, a missing web root)
/// leaves the client untouched. A binding failure aborts on the spot; the
/// caller is expected to drop the client in that case.
pub fn configure<C: CaClient>(
    mut client: C,
    config: &ChallengeConfig,
    dns_providers: &DnsProviderRegistry,
) -> Result<C, Error> {
    if config.http01_overridden() {
        warn!("Both an HTTP challenge port and web root are configured, the web root takes precedence");
    }

    let mut providers = Vec::new();
    for binding in config.bindings() {
        let provider = build_provider(&binding, dns_providers)
            .map_err(|e| Error::configuration(contexts(&binding).0, e))?;
        providers.push((binding, provider));
    }

    for (binding, provider) in providers {
        let bound = match binding {
            ChallengeBinding::Http01Port(_) | ChallengeBinding::Http01WebRoot(_) => {
                client.set_http01_provider(provider)
            }
            ChallengeBinding::TlsAlpn01Port(_) => client.set_tls_alpn01_provider(provider),
            ChallengeBinding::Dns01(_) => client.set_dns01_provider(provider),
        };
        bound.map_err(|e| Error::configuration(contexts(&binding).1, e))?;
        debug!("Bound {} challenge provider: {:?}", binding.challenge_type(), binding);
    }

    Ok(client)
}

fn build_provider(
    binding: &ChallengeBinding,
    dns_providers: &DnsProviderRegistry,
) -> Result<Box<dyn ChallengeProvider>, ProviderError> {
    let provider: Box<dyn ChallengeProvider> = match binding {
        // we usually can't bind to 80/443 ourselves, so the caller proxies
        // challenge traffic to these ports
        ChallengeBinding::Http01Port(port) => Box::new(HttpServerProvider::new("", *port)),
        ChallengeBinding::Http01WebRoot(root) => Box::new(WebRootProvider::new(root)?),
        ChallengeBinding::TlsAlpn01Port(port) => Box::new(TlsAlpnServerProvider::new("", *port)),
        ChallengeBinding::Dns01(name) => dns_providers.lookup(name)?,
    };
    Ok(provider)
}

/// (construction context, binding context)
fn contexts(binding: &ChallengeBinding) -> (&'static str, &'static str) {
    match binding {
        ChallengeBinding::Http01Port(_) | ChallengeBinding::Http01WebRoot(_) => (
            "Getting HTTP01 challenge provider",
            "Setting up HTTP01 challenge provider",
        ),
        ChallengeBinding::TlsAlpn01Port(_) => (
            "Getting TLSALPN01 challenge provider",
            "Setting up TLSALPN01 challenge provider",
        ),
        ChallengeBinding::Dns01(_) => (
            "Getting DNS01 challenge provider",
            "Setting up DNS01 challenge provider",
        ),
    }
}
