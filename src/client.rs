use openssl::{
    error::ErrorStack,
    pkey::{PKey, Private},
    x509::X509Req,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::challenge::{ChallengeProvider, ProviderError};

/// The ACME account credential: a contact email and the key that signs
/// every request. The key is never generated or persisted here.
#[derive(Clone, Debug)]
pub struct Identity {
    pub email: String,
    key: PKey<Private>,
}

impl Identity {
    pub fn new<T: Into<String>>(email: T, key: PKey<Private>) -> Self {
        Self {
            email: email.into(),
            key,
        }
    }

    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }
}

/// An account object as returned by the CA.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBody {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    #[serde(default)]
    pub terms_of_service_agreed: Option<bool>,
    #[serde(default)]
    pub orders: Option<String>,
}

/// A CA-issued registration record: the account URL (the `kid` used in
/// later requests) and the account body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub uri: String,
    pub body: AccountBody,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterOptions {
    pub terms_of_service_agreed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterEabOptions {
    pub terms_of_service_agreed: bool,
    pub kid: String,
    pub hmac_encoded: String,
}

pub struct ObtainForCsrRequest<'a> {
    pub csr: &'a X509Req,
    /// Ask for leaf plus intermediates instead of the leaf alone.
    pub bundle: bool,
}

/// What an issuance call hands back. `certificate` holds PEM bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateResource {
    pub domain: String,
    pub cert_url: String,
    pub certificate: Option<Vec<u8>>,
    pub issuer_certificate: Option<Vec<u8>>,
    pub csr: Option<Vec<u8>>,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("openssl: {0}")]
    Openssl(#[from] ErrorStack),
    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::ToStrError),
    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),
    #[error("{status} {kind}: {detail}")]
    Problem {
        status: u16,
        kind: String,
        detail: String,
    },
    #[error("unsupported account key type")]
    UnsupportedKey,
    #[error("invalid EAB HMAC key: {0}")]
    InvalidHmacKey(#[from] base64::DecodeError),
    #[error("invalid CSR: {0}")]
    Csr(String),
    #[error("no challenge provider bound for {domain} (offered: {offered:?})")]
    NoSolver { domain: String, offered: Vec<String> },
    #[error("{kind} challenge for {domain} failed: {detail}")]
    ChallengeFailed {
        kind: String,
        domain: String,
        detail: String,
    },
    #[error("challenge provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("order is {0}")]
    OrderInvalid(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl ClientError {
    /// The CA answered an `onlyReturnExisting` lookup with no account.
    pub fn is_account_missing(&self) -> bool {
        matches!(self, ClientError::Problem { kind, .. } if kind.ends_with(":accountDoesNotExist"))
    }

    pub(crate) fn is_bad_nonce(&self) -> bool {
        matches!(self, ClientError::Problem { kind, .. } if kind.ends_with(":badNonce"))
    }
}

/// The operations this crate needs from an ACME CA client.
///
/// Setting a provider replaces any provider of the same challenge type.
pub trait CaClient {
    fn set_http01_provider(&mut self, provider: Box<dyn ChallengeProvider>)
        -> Result<(), ClientError>;
    fn set_tls_alpn01_provider(
        &mut self,
        provider: Box<dyn ChallengeProvider>,
    ) -> Result<(), ClientError>;
    fn set_dns01_provider(&mut self, provider: Box<dyn ChallengeProvider>)
        -> Result<(), ClientError>;

    /// The CA's terms of service URL, when its directory names one.
    fn terms_of_service(&self) -> Option<&str> {
        None
    }

    /// Looks up the account registered for the identity's public key.
    fn resolve_account_by_key(&mut self) -> Result<Registration, ClientError>;
    fn register(&mut self, options: RegisterOptions) -> Result<Registration, ClientError>;
    fn register_with_external_account_binding(
        &mut self,
        options: RegisterEabOptions,
    ) -> Result<Registration, ClientError>;

    /// Runs a full order for the identifiers named in the CSR. `Ok(None)`
    /// means the CA call completed without yielding a resource.
    fn obtain_for_csr(
        &mut self,
        request: ObtainForCsrRequest<'_>,
    ) -> Result<Option<CertificateResource>, ClientError>;
}

/// Builds fresh, unauthenticated clients for an identity.
pub trait ClientFactory {
    type Client: CaClient;

    fn build(&self, identity: &Identity, directory_url: &str) -> Result<Self::Client, ClientError>;
}
