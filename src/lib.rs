//! This crate keeps a process supplied with a certificate issued by an `ACME` certificate authority
//! (see [RFC8555](https://tools.ietf.org/html/rfc8555)) for a certificate signing request (CSR) the
//! caller already holds.
//!
//! ## Features
//! - Adopts the account already registered for the account key, registers a new one (optionally with
//!   external account binding) or skips registration for accounts set up out of band. <br>
//! - HTTP-01 challenges on a port of its own or through the web root of an existing server, TLS-ALPN-01
//!   challenges on a port of its own and DNS-01 challenges through a named provider. <br>
//! - The port based challenges are meant to run unprivileged, so challenge traffic for port 80/443 has to
//!   be proxied to the configured ports.
//!
//! # Usage
//! Setup happens once through [`new_cert_fetcher`] (or [`CertFetcher::new`] with your own client
//! factory). It completes the following steps:
//! - Build an ACME client and attach the configured challenge providers.
//! - Look up the account for the key, or register one, or skip registration.
//! - Bind client, account and CSR into a [`CertFetcher`].
//!
//! [`CertFetcher::fetch_new_cert`] then submits the CSR and returns the parsed chain whenever a fresh
//! certificate is needed. Renewal timing, storage and the terms of service prompt are left to the caller:
//! registration always agrees to the CA's terms of service.
//!
//! ## Example
//! ```ignore,rust
//! use certfetcher::{new_cert_fetcher, ChallengeConfig, LETS_ENCRYPT_STAGING};
//!
//! let mut fetcher = new_cert_fetcher(
//!     "max@mustermann.de",
//!     "",
//!     "",
//!     csr,
//!     account_key,
//!     LETS_ENCRYPT_STAGING,
//!     ChallengeConfig {
//!         http_challenge_port: Some(5002),
//!         ..ChallengeConfig::default()
//!     },
//!     true,
//! )?;
//!
//! let chain = fetcher.fetch_new_cert()?;
//! ```

use openssl::{
    pkey::{PKey, Private},
    x509::X509Req,
};

/// A blocking ACME client used by default.
pub mod acme;
/// Account settlement: skip, adopt or register.
pub mod account;
pub mod cert;
/// Attaching challenge providers to a client.
pub mod challenge;
/// The client capability the state machine drives, and its test seams.
pub mod client;
pub mod config;
/// The module which encapsulates the error enumeration
/// and related code and types.
pub mod error;
mod fetcher;
pub mod providers;
mod util;

#[cfg(test)]
mod testing;

pub use account::{AccountManager, AccountRegistration};
pub use acme::{AcmeClient, AcmeClientFactory};
pub use challenge::{configure, ChallengeProvider, ProviderError};
pub use client::{CaClient, ClientError, ClientFactory, Identity};
pub use config::{
    ChallengeBinding, ChallengeConfig, FetcherConfig, RegistrationMode, LETS_ENCRYPT_SERVER,
    LETS_ENCRYPT_STAGING,
};
pub use error::Error;
pub use fetcher::CertFetcher;
pub use providers::DnsProviderRegistry;

/// Sets up a [`CertFetcher`] against the CA at `directory_url` using the bundled ACME client and the
/// default DNS provider registry.
///
/// Empty `eab_kid` and `eab_hmac` select plain registration; `should_register == false` skips it.
#[allow(clippy::too_many_arguments)]
pub fn new_cert_fetcher<T: Into<String>>(
    email: T,
    eab_kid: T,
    eab_hmac: T,
    csr: X509Req,
    private_key: PKey<Private>,
    directory_url: T,
    challenges: ChallengeConfig,
    should_register: bool,
) -> Result<CertFetcher<AcmeClient>, Error> {
    let config = FetcherConfig {
        eab_key_id: eab_kid.into(),
        eab_hmac_key: eab_hmac.into(),
        challenges,
        should_register,
        ..FetcherConfig::new(directory_url)
    };
    CertFetcher::new(
        &config,
        Identity::new(email, private_key),
        csr,
        &AcmeClientFactory::default(),
        &DnsProviderRegistry::default(),
    )
}
