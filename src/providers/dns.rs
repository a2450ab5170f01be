use std::{
    collections::HashMap,
    env,
    fmt,
    path::{Path, PathBuf},
    process::Command,
};

use log::debug;
use openssl::sha::sha256;

use crate::{
    challenge::{ChallengeProvider, ProviderError},
    util::b64,
};

pub type DnsProviderConstructor =
    Box<dyn Fn() -> Result<Box<dyn ChallengeProvider>, ProviderError> + Send + Sync>;

/// Returns the TXT record name and value that answer a DNS-01 challenge.
pub fn dns01_record(domain: &str, key_auth: &str) -> (String, String) {
    let domain = domain.trim_start_matches("*.").trim_end_matches('.');
    (
        format!("_acme-challenge.{}.", domain),
        b64(&sha256(key_auth.as_bytes())),
    )
}

/// DNS-01 providers by name.
///
/// [`DnsProviderRegistry::default`] knows `exec`; other providers are
/// added with [`register`](DnsProviderRegistry::register).
pub struct DnsProviderRegistry {
    constructors: HashMap<String, DnsProviderConstructor>,
}

impl DnsProviderRegistry {
    /// A registry that knows no providers at all.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> Result<Box<dyn ChallengeProvider>, ProviderError> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_owned(), Box::new(constructor));
    }

    pub fn lookup(&self, name: &str) -> Result<Box<dyn ChallengeProvider>, ProviderError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ProviderError::UnknownDnsProvider(name.to_owned()))?;
        constructor()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for DnsProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register("exec", || {
            let provider: Box<dyn ChallengeProvider> = Box::new(ExecProvider::from_env()?);
            Ok(provider)
        });
        registry
    }
}

impl fmt::Debug for DnsProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// Hands DNS-01 record changes to an external program:
/// `<program> present|cleanup <fqdn> <value>`, or
/// `<program> present|cleanup <domain> <token> <key_auth>` in raw mode.
#[derive(Debug)]
pub struct ExecProvider {
    program: PathBuf,
    raw: bool,
}

impl ExecProvider {
    pub fn new<P: AsRef<Path>>(program: P, raw: bool) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            raw,
        }
    }

    /// Reads `EXEC_PATH` and `EXEC_MODE` (`RAW` selects raw mode).
    pub fn from_env() -> Result<Self, ProviderError> {
        let program = env::var_os("EXEC_PATH").ok_or(ProviderError::MissingEnv("EXEC_PATH"))?;
        let raw = env::var("EXEC_MODE").map_or(false, |mode| mode == "RAW");
        Ok(Self::new(program, raw))
    }

    fn run(&self, action: &str, domain: &str, token: &str, key_auth: &str) -> Result<(), ProviderError> {
        let mut command = Command::new(&self.program);
        command.arg(action);
        if self.raw {
            command.args(&[domain, token, key_auth]);
        } else {
            let (fqdn, value) = dns01_record(domain, key_auth);
            command.args(&[fqdn, value]);
        }

        debug!("Running {:?} {} for {}", self.program, action, domain);
        let output = command.output()?;
        if !output.status.success() {
            return Err(ProviderError::Exec {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

impl ChallengeProvider for ExecProvider {
    fn present(&mut self, domain: &str, token: &str, key_auth: &str) -> Result<(), ProviderError> {
        self.run("present", domain, token, key_auth)
    }

    fn clean_up(&mut self, domain: &str, token: &str, key_auth: &str) -> Result<(), ProviderError> {
        self.run("cleanup", domain, token, key_auth)
    }
}
