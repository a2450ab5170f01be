//! Test doubles and fixtures shared by the unit tests.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, Once},
};

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req, X509ReqBuilder, X509},
};

use crate::{
    challenge::{ChallengeProvider, ProviderError},
    client::{
        AccountBody, CaClient, CertificateResource, ClientError, ClientFactory, Identity,
        ObtainForCsrRequest, RegisterEabOptions, RegisterOptions, Registration,
    },
};

pub(crate) fn init_logger() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = flexi_logger::Logger::with_str("debug").start();
    });
}

pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("certfetcher-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub(crate) fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub(crate) fn identity() -> Identity {
    Identity::new("a@example.com", ec_key())
}

pub(crate) fn self_signed(common_name: &str) -> X509 {
    let key = ec_key();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(90).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    builder.build()
}

pub(crate) fn pem_chain(certs: &[X509]) -> Vec<u8> {
    certs
        .iter()
        .flat_map(|cert| cert.to_pem().unwrap())
        .collect()
}

pub(crate) fn common_name(cert: &X509) -> String {
    let data = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_slice()
        .to_vec();
    String::from_utf8(data).unwrap()
}

pub(crate) fn csr(common_name: &str, alt_names: &[&str]) -> X509Req {
    let key = ec_key();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    let name = name.build();

    let mut builder = X509ReqBuilder::new().unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    if !alt_names.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for alt in alt_names {
            san.dns(alt);
        }
        let san = san.build(&builder.x509v3_context(None)).unwrap();
        let mut extensions = Stack::new().unwrap();
        extensions.push(san).unwrap();
        builder.add_extensions(&extensions).unwrap();
    }
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    builder.build()
}

pub(crate) fn registration(uri: &str) -> Registration {
    Registration {
        uri: uri.to_owned(),
        body: AccountBody {
            status: "valid".to_owned(),
            ..AccountBody::default()
        },
    }
}

pub(crate) struct NoopProvider;

impl ChallengeProvider for NoopProvider {
    fn present(&mut self, _: &str, _: &str, _: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    fn clean_up(&mut self, _: &str, _: &str, _: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Build,
    SetHttp01,
    SetTlsAlpn01,
    SetDns01,
    ResolveAccount,
    Register { terms_of_service_agreed: bool },
    RegisterEab(RegisterEabOptions),
    Obtain { bundle: bool },
}

/// What the CA double answers to an issuance call.
#[derive(Clone, Debug)]
pub(crate) enum Issued {
    Nothing,
    NoBytes,
    Pem(Vec<u8>),
    Rejected,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<(usize, Call)>>>);

impl CallLog {
    fn record(&self, client: usize, call: Call) {
        self.0.lock().unwrap().push((client, call));
    }

    /// Calls from every client, in order.
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub(crate) fn calls_for(&self, client: usize) -> Vec<Call> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == client)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Behavior {
    pub existing_account: Option<Registration>,
    pub reject_registration: bool,
    /// Construction fails for clients numbered at or above this.
    pub fail_build_from: Option<usize>,
    pub terms_of_service: Option<String>,
    /// Consumed front to back, the last entry repeats.
    pub issued: Arc<Mutex<Vec<Issued>>>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            existing_account: None,
            reject_registration: false,
            fail_build_from: None,
            terms_of_service: None,
            issued: Arc::new(Mutex::new(vec![Issued::Nothing])),
        }
    }
}

impl Behavior {
    pub(crate) fn issuing(mut self, outcomes: Vec<Issued>) -> Self {
        self.issued = Arc::new(Mutex::new(outcomes));
        self
    }
}

/// Hands out [`MockClient`]s numbered from 1 that share one call log.
#[derive(Clone, Default)]
pub(crate) struct MockFactory {
    pub log: CallLog,
    pub behavior: Behavior,
    built: Arc<Mutex<usize>>,
}

impl MockFactory {
    pub(crate) fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    pub(crate) fn client(&self) -> MockClient {
        self.build(&identity(), "https://ca.test/dir").unwrap()
    }

    pub(crate) fn built(&self) -> usize {
        *self.built.lock().unwrap()
    }
}

impl ClientFactory for MockFactory {
    type Client = MockClient;

    fn build(&self, _: &Identity, _: &str) -> Result<MockClient, ClientError> {
        let id = {
            let mut built = self.built.lock().unwrap();
            *built += 1;
            *built
        };
        self.log.record(id, Call::Build);
        if self.behavior.fail_build_from.map_or(false, |n| id >= n) {
            return Err(problem("serverInternal", "directory unavailable"));
        }
        Ok(MockClient {
            id,
            log: self.log.clone(),
            behavior: self.behavior.clone(),
            fail_provider_binding: false,
        })
    }
}

#[derive(Debug)]
pub(crate) struct MockClient {
    pub id: usize,
    log: CallLog,
    behavior: Behavior,
    pub fail_provider_binding: bool,
}

impl MockClient {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.log
            .calls_for(self.id)
            .into_iter()
            .filter(|c| *c != Call::Build)
            .collect()
    }

    pub(crate) fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn bind(&self, call: Call) -> Result<(), ClientError> {
        if self.fail_provider_binding {
            return Err(problem("malformed", "provider rejected"));
        }
        self.log.record(self.id, call);
        Ok(())
    }

    fn registered(&self) -> Result<Registration, ClientError> {
        if self.behavior.reject_registration {
            Err(problem("unauthorized", "account creation refused"))
        } else {
            Ok(registration(&format!("https://ca.test/acct/{}", self.id)))
        }
    }
}

pub(crate) fn problem(kind: &str, detail: &str) -> ClientError {
    ClientError::Problem {
        status: 400,
        kind: format!("urn:ietf:params:acme:error:{}", kind),
        detail: detail.to_owned(),
    }
}

impl CaClient for MockClient {
    fn set_http01_provider(&mut self, _: Box<dyn ChallengeProvider>) -> Result<(), ClientError> {
        self.bind(Call::SetHttp01)
    }

    fn set_tls_alpn01_provider(
        &mut self,
        _: Box<dyn ChallengeProvider>,
    ) -> Result<(), ClientError> {
        self.bind(Call::SetTlsAlpn01)
    }

    fn set_dns01_provider(&mut self, _: Box<dyn ChallengeProvider>) -> Result<(), ClientError> {
        self.bind(Call::SetDns01)
    }

    fn terms_of_service(&self) -> Option<&str> {
        self.behavior.terms_of_service.as_deref()
    }

    fn resolve_account_by_key(&mut self) -> Result<Registration, ClientError> {
        self.log.record(self.id, Call::ResolveAccount);
        self.behavior
            .existing_account
            .clone()
            .ok_or_else(|| problem("accountDoesNotExist", "no account for this key"))
    }

    fn register(&mut self, options: RegisterOptions) -> Result<Registration, ClientError> {
        self.log.record(
            self.id,
            Call::Register {
                terms_of_service_agreed: options.terms_of_service_agreed,
            },
        );
        self.registered()
    }

    fn register_with_external_account_binding(
        &mut self,
        options: RegisterEabOptions,
    ) -> Result<Registration, ClientError> {
        self.log.record(self.id, Call::RegisterEab(options));
        self.registered()
    }

    fn obtain_for_csr(
        &mut self,
        request: ObtainForCsrRequest<'_>,
    ) -> Result<Option<CertificateResource>, ClientError> {
        self.log.record(
            self.id,
            Call::Obtain {
                bundle: request.bundle,
            },
        );
        let outcome = {
            let mut issued = self.behavior.issued.lock().unwrap();
            if issued.len() > 1 {
                issued.remove(0)
            } else {
                issued[0].clone()
            }
        };
        let resource = |certificate| {
            Some(CertificateResource {
                domain: "example.com".to_owned(),
                cert_url: "https://ca.test/cert/1".to_owned(),
                certificate,
                ..CertificateResource::default()
            })
        };
        match outcome {
            Issued::Nothing => Ok(None),
            Issued::NoBytes => Ok(resource(None)),
            Issued::Pem(bytes) => Ok(resource(Some(bytes))),
            Issued::Rejected => Err(problem("rejectedIdentifier", "not allowed")),
        }
    }
}
