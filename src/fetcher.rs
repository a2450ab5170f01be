use log::{debug, info};
use openssl::x509::{X509Req, X509};

use crate::{
    account::{AccountManager, AccountRegistration},
    cert::parse_certificates,
    client::{CaClient, ClientFactory, Identity, ObtainForCsrRequest},
    config::FetcherConfig,
    error::Error,
    providers::DnsProviderRegistry,
};

/// A client bound to a settled account and a single CSR.
///
/// Every [`fetch_new_cert`](CertFetcher::fetch_new_cert) resubmits the
/// same CSR. The handle takes `&mut self` for fetching, so one handle
/// serves one caller at a time; build separate handles for parallel use.
pub struct CertFetcher<C> {
    directory_url: String,
    identity: Identity,
    registration: AccountRegistration,
    client: C,
    csr: X509Req,
}

impl<C: CaClient> CertFetcher<C> {
    /// Builds a client, settles the account and binds both to `csr`.
    /// Nothing is returned unless the account step succeeded.
    pub fn new<F>(
        config: &FetcherConfig,
        identity: Identity,
        csr: X509Req,
        factory: &F,
        dns_providers: &DnsProviderRegistry,
    ) -> Result<Self, Error>
    where
        F: ClientFactory<Client = C>,
    {
        let (client, registration) =
            AccountManager::new(factory, dns_providers).resolve_account(&identity, config)?;

        Ok(Self {
            directory_url: config.directory_url.clone(),
            identity,
            registration,
            client,
            csr,
        })
    }

    /// Submits the CSR and returns the issued chain, leaf first.
    pub fn fetch_new_cert(&mut self) -> Result<Vec<X509>, Error> {
        info!("Requesting certificate from {}", self.directory_url);
        let resource = self
            .client
            .obtain_for_csr(ObtainForCsrRequest {
                csr: &self.csr,
                bundle: true,
            })
            .map_err(Error::Issuance)?
            .ok_or(Error::NoResource)?;

        let bytes = resource.certificate.ok_or(Error::NoCertificateBytes)?;
        debug!("Received certificate for {} from {}", resource.domain, resource.cert_url);

        Ok(parse_certificates(&bytes)?)
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn registration(&self) -> &AccountRegistration {
        &self.registration
    }

    pub fn csr(&self) -> &X509Req {
        &self.csr
    }

    /// The terms of service the account agreed to, if the CA publishes them.
    pub fn terms_of_service(&self) -> Option<&str> {
        self.client.terms_of_service()
    }
}
