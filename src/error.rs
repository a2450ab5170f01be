use thiserror::Error;

use crate::{cert::ParseError, client::ClientError};

/// Boxed source for failures that may come from either a provider
/// constructor or the client it was bound to.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure surfaced by the setup and fetch calls.
///
/// None of these are retried internally. Setup failures never leave a
/// handle behind, fetch failures leave the handle usable.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Setting up ACME challenges: {context}: {source}")]
    Configuration {
        context: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("Setting up ACME challenges: obtaining ACME client: {0}")]
    ClientConstruction(#[source] ClientError),
    #[error("ACME CA client registration: {0}")]
    Registration(#[source] ClientError),
    #[error("ACME certificate issuance: {0}")]
    Issuance(#[source] ClientError),
    #[error("No resource returned")]
    NoResource,
    #[error("No certificates were returned")]
    NoCertificateBytes,
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl Error {
    pub(crate) fn configuration<E>(context: &'static str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Configuration {
            context,
            source: source.into(),
        }
    }
}
