use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const LETS_ENCRYPT_SERVER: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Reusable setup parameters. One value can back any number of
/// [`CertFetcher`](crate::CertFetcher) handles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetcherConfig {
    /// URL of the CA's ACME directory resource.
    pub directory_url: String,
    #[serde(default)]
    pub eab_key_id: String,
    /// Base64url encoded MAC key handed out by the CA next to the key id.
    #[serde(default)]
    pub eab_hmac_key: String,
    #[serde(default)]
    pub challenges: ChallengeConfig,
    /// When false the account is assumed to exist out of band and no
    /// registration request is ever sent.
    #[serde(default = "default_should_register")]
    pub should_register: bool,
}

fn default_should_register() -> bool {
    true
}

impl FetcherConfig {
    pub fn new<T: Into<String>>(directory_url: T) -> Self {
        Self {
            directory_url: directory_url.into(),
            eab_key_id: String::new(),
            eab_hmac_key: String::new(),
            challenges: ChallengeConfig::default(),
            should_register: true,
        }
    }

    /// Picks the registration call used when no existing account is found.
    /// Either EAB field being set selects the binding path, and both fields
    /// are then passed through as given.
    pub fn registration_mode(&self) -> RegistrationMode {
        if self.eab_key_id.is_empty() && self.eab_hmac_key.is_empty() {
            RegistrationMode::Standard
        } else {
            RegistrationMode::ExternalAccountBinding {
                key_id: self.eab_key_id.clone(),
                hmac_key: self.eab_hmac_key.clone(),
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationMode {
    Standard,
    ExternalAccountBinding { key_id: String, hmac_key: String },
}

/// Where the CA should expect to find challenge responses. Every field is
/// optional and any combination may be set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeConfig {
    pub http_challenge_port: Option<u16>,
    pub http_challenge_web_root: Option<PathBuf>,
    pub tls_challenge_port: Option<u16>,
    pub dns_provider: Option<String>,
}

/// A single provider to attach to the CA client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChallengeBinding {
    Http01Port(u16),
    Http01WebRoot(PathBuf),
    TlsAlpn01Port(u16),
    Dns01(String),
}

impl ChallengeBinding {
    pub fn challenge_type(&self) -> &'static str {
        match self {
            ChallengeBinding::Http01Port(_) | ChallengeBinding::Http01WebRoot(_) => "http-01",
            ChallengeBinding::TlsAlpn01Port(_) => "tls-alpn-01",
            ChallengeBinding::Dns01(_) => "dns-01",
        }
    }
}

impl ChallengeConfig {
    /// The providers this config asks for, in the order they are bound.
    ///
    /// Both HTTP-01 variants replace the same slot on the client, so when a
    /// port and a web root are both set the web root (bound second) wins.
    pub fn bindings(&self) -> Vec<ChallengeBinding> {
        let mut bindings = Vec::new();
        if let Some(port) = self.http_challenge_port.filter(|p| *p != 0) {
            bindings.push(ChallengeBinding::Http01Port(port));
        }
        if let Some(root) = self
            .http_challenge_web_root
            .as_ref()
            .filter(|r| !r.as_os_str().is_empty())
        {
            bindings.push(ChallengeBinding::Http01WebRoot(root.clone()));
        }
        if let Some(port) = self.tls_challenge_port.filter(|p| *p != 0) {
            bindings.push(ChallengeBinding::TlsAlpn01Port(port));
        }
        if let Some(name) = self.dns_provider.as_ref().filter(|n| !n.is_empty()) {
            bindings.push(ChallengeBinding::Dns01(name.clone()));
        }
        bindings
    }

    /// True when the HTTP-01 port and web root are both set and only the
    /// web root will take effect.
    pub fn http01_overridden(&self) -> bool {
        self.bindings()
            .iter()
            .filter(|b| b.challenge_type() == "http-01")
            .count()
            > 1
    }
}
