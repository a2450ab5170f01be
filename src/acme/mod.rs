//! A blocking RFC 8555 client implementing [`CaClient`].

mod jose;
/// Serializable ACME resource types.
pub mod types;

use std::{thread, time::Duration};

use log::{debug, info, warn};
use openssl::x509::X509Req;
use reqwest::{
    blocking::{Client, Response},
    header::{ACCEPT, CONTENT_TYPE},
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use x509_parser::prelude::{FromDer, GeneralName, ParsedExtension, X509CertificationRequest};

use self::{
    jose::AccountKey,
    types::{Authorization, Directory, Identifier, Order, Problem, StatusType},
};
use crate::{
    cert::split_leaf,
    challenge::ChallengeProvider,
    client::{
        AccountBody, CaClient, CertificateResource, ClientError, ClientFactory, Identity,
        ObtainForCsrRequest, RegisterEabOptions, RegisterOptions, Registration,
    },
    util::{b64, header},
};

const JOSE_JSON: &str = "application/jose+json";
const PEM_CHAIN: &str = "application/pem-certificate-chain";

/// Settings shared by every client the factory builds.
#[derive(Clone, Debug)]
pub struct AcmeClientFactory {
    pub user_agent: String,
    pub timeout: Duration,
    /// Pause between two polls of a pending authorization or order.
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

impl Default for AcmeClientFactory {
    fn default() -> Self {
        Self {
            user_agent: concat!("acme-certfetcher/", env!("CARGO_PKG_VERSION")).to_owned(),
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            poll_attempts: 30,
        }
    }
}

impl ClientFactory for AcmeClientFactory {
    type Client = AcmeClient;

    fn build(&self, identity: &Identity, directory_url: &str) -> Result<AcmeClient, ClientError> {
        AcmeClient::new(self, identity, directory_url)
    }
}

/// Which provider slot a challenge type maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Http01,
    TlsAlpn01,
    Dns01,
}

impl Slot {
    fn for_challenge(kind: &str) -> Option<Slot> {
        match kind {
            "http-01" => Some(Slot::Http01),
            "tls-alpn-01" => Some(Slot::TlsAlpn01),
            "dns-01" => Some(Slot::Dns01),
            _ => None,
        }
    }
}

pub struct AcmeClient {
    http: Client,
    directory: Directory,
    email: String,
    key: AccountKey,
    /// Account URL once the account is known; requests are signed with the
    /// bare JWK until then.
    kid: Option<String>,
    nonce: Option<String>,
    http01: Option<Box<dyn ChallengeProvider>>,
    tls_alpn01: Option<Box<dyn ChallengeProvider>>,
    dns01: Option<Box<dyn ChallengeProvider>>,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl AcmeClient {
    /// Fetches the directory and prepares a client signing with the
    /// identity's key.
    pub fn new(
        settings: &AcmeClientFactory,
        identity: &Identity,
        directory_url: &str,
    ) -> Result<Self, ClientError> {
        let key = AccountKey::new(identity.key())?;
        let http = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .build()?;
        let directory: Directory = http.get(directory_url).send()?.error_for_status()?.json()?;
        debug!(
            "Fetched ACME directory from {}, signing with {:?}",
            directory_url,
            key.alg()
        );

        Ok(Self {
            http,
            directory,
            email: identity.email.clone(),
            key,
            kid: None,
            nonce: None,
            http01: None,
            tls_alpn01: None,
            dns01: None,
            poll_interval: settings.poll_interval,
            poll_attempts: settings.poll_attempts,
        })
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn account_url(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    fn nonce(&mut self) -> Result<String, ClientError> {
        if let Some(nonce) = self.nonce.take() {
            return Ok(nonce);
        }
        let response = self.http.head(&self.directory.new_nonce).send()?;
        header(&response, "replay-nonce")
    }

    fn post(&mut self, url: &str, payload: Option<&Value>) -> Result<Response, ClientError> {
        self.post_with(url, payload, false, JOSE_JSON)
    }

    /// Sends a signed request, retrying once when the CA rejects the nonce.
    fn post_with(
        &mut self,
        url: &str,
        payload: Option<&Value>,
        force_jwk: bool,
        accept: &str,
    ) -> Result<Response, ClientError> {
        let mut retried = false;
        loop {
            let mut protected = json!({
                "nonce": self.nonce()?,
                "url": url,
            });
            match &self.kid {
                Some(kid) if !force_jwk => protected["kid"] = json!(kid),
                _ => protected["jwk"] = self.key.jwk().clone(),
            }
            let body = self.key.sign(protected, payload)?;

            let response = self
                .http
                .post(url)
                .header(CONTENT_TYPE, JOSE_JSON)
                .header(ACCEPT, accept)
                .body(serde_json::to_string(&body)?)
                .send()?;
            self.nonce = header(&response, "replay-nonce").ok();

            if response.status().is_success() {
                return Ok(response);
            }
            let err = problem(response);
            if err.is_bad_nonce() && !retried {
                debug!("Retrying request to {} after bad nonce", url);
                retried = true;
                continue;
            }
            return Err(err);
        }
    }

    fn post_as_get<T: DeserializeOwned>(&mut self, url: &str) -> Result<T, ClientError> {
        Ok(self.post(url, None)?.json()?)
    }

    fn new_account(&mut self, payload: Value) -> Result<Registration, ClientError> {
        let url = self.directory.new_account.clone();
        let response = self.post_with(&url, Some(&payload), true, JOSE_JSON)?;
        let uri = header(&response, "location")?;
        let body: AccountBody = response.json()?;
        self.kid = Some(uri.clone());
        Ok(Registration { uri, body })
    }

    fn registration_payload(&self, terms_of_service_agreed: bool) -> Value {
        let mut payload = json!({ "termsOfServiceAgreed": terms_of_service_agreed });
        if !self.email.is_empty() {
            payload["contact"] = json!([format!("mailto:{}", self.email)]);
        }
        payload
    }

    fn has_provider(&self, slot: Slot) -> bool {
        match slot {
            Slot::Http01 => self.http01.is_some(),
            Slot::TlsAlpn01 => self.tls_alpn01.is_some(),
            Slot::Dns01 => self.dns01.is_some(),
        }
    }

    fn slot(&mut self, slot: Slot) -> &mut Option<Box<dyn ChallengeProvider>> {
        match slot {
            Slot::Http01 => &mut self.http01,
            Slot::TlsAlpn01 => &mut self.tls_alpn01,
            Slot::Dns01 => &mut self.dns01,
        }
    }

    /// Polls `url` until `done` holds or the attempt budget runs out.
    fn poll<T, F>(&mut self, url: &str, what: &str, done: F) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        for _ in 0..self.poll_attempts {
            let resource: T = self.post_as_get(url)?;
            if done(&resource) {
                return Ok(resource);
            }
            thread::sleep(self.poll_interval);
        }
        Err(ClientError::Timeout(what.to_owned()))
    }

    fn authorize(&mut self, url: &str) -> Result<(), ClientError> {
        let authz: Authorization = self.post_as_get(url)?;
        let domain = authz.identifier.value.clone();
        if authz.status == StatusType::Valid {
            debug!("Authorization for {} is already valid", domain);
            return Ok(());
        }

        let no_solver = || ClientError::NoSolver {
            domain: domain.clone(),
            offered: authz.challenges.iter().map(|c| c.kind.clone()).collect(),
        };
        // first challenge the CA offers that we have a provider for
        let (slot, challenge) = authz
            .challenges
            .iter()
            .find_map(|c| {
                Slot::for_challenge(&c.kind)
                    .filter(|slot| self.has_provider(*slot))
                    .map(|slot| (slot, c.clone()))
            })
            .ok_or_else(no_solver)?;
        let mut provider = self.slot(slot).take().ok_or_else(no_solver)?;
        let key_auth = self.key.key_authorization(&challenge.token)?;

        info!("Solving {} challenge for {}", challenge.kind, domain);
        let validated = provider
            .present(&domain, &challenge.token, &key_auth)
            .map_err(ClientError::from)
            .and_then(|_| self.validate(url, &challenge.url, &challenge.kind, &domain));
        if let Err(e) = provider.clean_up(&domain, &challenge.token, &key_auth) {
            warn!("Cleaning up {} challenge for {} failed: {}", challenge.kind, domain, e);
        }
        *self.slot(slot) = Some(provider);
        validated
    }

    fn validate(
        &mut self,
        authz_url: &str,
        challenge_url: &str,
        kind: &str,
        domain: &str,
    ) -> Result<(), ClientError> {
        self.post(challenge_url, Some(&json!({})))?;
        let authz: Authorization = self.poll(authz_url, "authorization", |a: &Authorization| {
            a.status != StatusType::Pending && a.status != StatusType::Processing
        })?;
        if authz.status == StatusType::Valid {
            return Ok(());
        }

        let detail = authz
            .challenges
            .iter()
            .find_map(|c| c.error.as_ref())
            .map(|p| format!("{}: {}", p.kind, p.detail))
            .unwrap_or_else(|| format!("authorization is {:?}", authz.status));
        Err(ClientError::ChallengeFailed {
            kind: kind.to_owned(),
            domain: domain.to_owned(),
            detail,
        })
    }
}

impl CaClient for AcmeClient {
    fn set_http01_provider(
        &mut self,
        provider: Box<dyn ChallengeProvider>,
    ) -> Result<(), ClientError> {
        self.http01 = Some(provider);
        Ok(())
    }

    fn set_tls_alpn01_provider(
        &mut self,
        provider: Box<dyn ChallengeProvider>,
    ) -> Result<(), ClientError> {
        self.tls_alpn01 = Some(provider);
        Ok(())
    }

    fn set_dns01_provider(&mut self, provider: Box<dyn ChallengeProvider>) -> Result<(), ClientError> {
        self.dns01 = Some(provider);
        Ok(())
    }

    fn terms_of_service(&self) -> Option<&str> {
        self.directory
            .meta
            .as_ref()
            .and_then(|meta| meta.terms_of_service.as_deref())
    }

    fn resolve_account_by_key(&mut self) -> Result<Registration, ClientError> {
        self.new_account(json!({ "onlyReturnExisting": true }))
    }

    fn register(&mut self, options: RegisterOptions) -> Result<Registration, ClientError> {
        let payload = self.registration_payload(options.terms_of_service_agreed);
        self.new_account(payload)
    }

    fn register_with_external_account_binding(
        &mut self,
        options: RegisterEabOptions,
    ) -> Result<Registration, ClientError> {
        let mut payload = self.registration_payload(options.terms_of_service_agreed);
        payload["externalAccountBinding"] = self.key.external_account_binding(
            &options.kid,
            &options.hmac_encoded,
            &self.directory.new_account,
        )?;
        self.new_account(payload)
    }

    fn obtain_for_csr(
        &mut self,
        request: ObtainForCsrRequest<'_>,
    ) -> Result<Option<CertificateResource>, ClientError> {
        let domains = csr_identifiers(request.csr)?;
        let csr_der = request.csr.to_der()?;
        info!("Ordering certificate for {}", domains.join(", "));

        let new_order = self.directory.new_order.clone();
        let identifiers: Vec<Identifier> = domains.iter().map(Identifier::dns).collect();
        let response = self.post(&new_order, Some(&json!({ "identifiers": identifiers })))?;
        let order_url = header(&response, "location")?;
        let order: Order = response.json()?;

        for authz_url in &order.authorizations {
            self.authorize(authz_url)?;
        }

        self.post(&order.finalize, Some(&json!({ "csr": b64(&csr_der) })))?;
        let order: Order = self.poll(&order_url, "order", |o: &Order| {
            o.status != StatusType::Pending
                && o.status != StatusType::Ready
                && o.status != StatusType::Processing
        })?;
        if order.status != StatusType::Valid {
            let status = order.status;
            let reason = order
                .error
                .map(|p| format!("{:?} ({}: {})", status, p.kind, p.detail))
                .unwrap_or_else(|| format!("{:?}", status));
            return Err(ClientError::OrderInvalid(reason));
        }
        let cert_url = match order.certificate {
            Some(url) => url,
            None => return Ok(None),
        };

        let chain = self
            .post_with(&cert_url, None, false, PEM_CHAIN)?
            .bytes()?
            .to_vec();
        let (leaf, issuer) = split_leaf(&chain);
        let certificate = if request.bundle { chain } else { leaf };

        Ok(Some(CertificateResource {
            domain: domains[0].clone(),
            cert_url,
            certificate: Some(certificate),
            issuer_certificate: Some(issuer).filter(|i| !i.is_empty()),
            csr: Some(request.csr.to_pem()?),
        }))
    }
}

fn problem(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let problem: Problem = response.json().unwrap_or_default();
    ClientError::Problem {
        status,
        kind: problem.kind,
        detail: problem.detail,
    }
}

/// The DNS names a CSR asks for: subject common name first, then SANs.
pub(crate) fn csr_identifiers(csr: &X509Req) -> Result<Vec<String>, ClientError> {
    let der = csr.to_der()?;
    let (_, parsed) =
        X509CertificationRequest::from_der(&der).map_err(|e| ClientError::Csr(e.to_string()))?;

    let mut names: Vec<String> = Vec::new();
    let mut add = |name: &str| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_owned());
        }
    };
    for cn in parsed.certification_request_info.subject.iter_common_name() {
        if let Ok(cn) = cn.as_str() {
            add(cn);
        }
    }
    if let Some(extensions) = parsed.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        add(*dns);
                    }
                }
            }
        }
    }

    if names.is_empty() {
        return Err(ClientError::Csr("no DNS identifiers".to_owned()));
    }
    Ok(names)
}
