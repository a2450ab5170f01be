use log::{debug, info};

use crate::{
    challenge,
    client::{
        CaClient, ClientFactory, Identity, RegisterEabOptions, RegisterOptions, Registration,
    },
    config::{FetcherConfig, RegistrationMode},
    error::Error,
    providers::DnsProviderRegistry,
};

/// How the account behind a session was settled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountRegistration {
    /// Registration was skipped; the account is established out of band.
    Placeholder,
    /// An account already registered for the key.
    Adopted(Registration),
    Registered(Registration),
}

impl AccountRegistration {
    pub fn resource(&self) -> Option<&Registration> {
        match self {
            AccountRegistration::Placeholder => None,
            AccountRegistration::Adopted(reg) | AccountRegistration::Registered(reg) => Some(reg),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, AccountRegistration::Placeholder)
    }
}

/// Produces a configured client bound to a settled account.
pub struct AccountManager<'a, F> {
    factory: &'a F,
    dns_providers: &'a DnsProviderRegistry,
}

impl<'a, F: ClientFactory> AccountManager<'a, F> {
    pub fn new(factory: &'a F, dns_providers: &'a DnsProviderRegistry) -> Self {
        Self {
            factory,
            dns_providers,
        }
    }

    /// Skips, adopts or registers the account for `identity`.
    ///
    /// A client that has been used for the by-key lookup is never reused
    /// for registration; a fresh one is built instead.
    pub fn resolve_account(
        &self,
        identity: &Identity,
        config: &FetcherConfig,
    ) -> Result<(F::Client, AccountRegistration), Error> {
        let mut client = self.new_client(identity, config)?;

        if !config.should_register {
            info!("Skipping ACME account registration for {}", identity.email);
            return Ok((client, AccountRegistration::Placeholder));
        }

        match client.resolve_account_by_key() {
            Ok(reg) => {
                info!("Using existing ACME account {}", reg.uri);
                return Ok((client, AccountRegistration::Adopted(reg)));
            }
            Err(e) => debug!("No ACME account found for the account key: {}", e),
        }

        drop(client);
        let mut client = self.new_client(identity, config)?;

        // TODO: terms of service are agreed to unconditionally, callers have
        // to collect the user's consent before setup until this is gated.
        match client.terms_of_service() {
            Some(url) => info!("Agreeing to the CA's terms of service at {}", url),
            None => info!("Agreeing to the CA's terms of service"),
        }
        let registered = match config.registration_mode() {
            RegistrationMode::Standard => client.register(RegisterOptions {
                terms_of_service_agreed: true,
            }),
            RegistrationMode::ExternalAccountBinding { key_id, hmac_key } => {
                info!("Registering ACME account with external account binding {}", key_id);
                client.register_with_external_account_binding(RegisterEabOptions {
                    terms_of_service_agreed: true,
                    kid: key_id,
                    hmac_encoded: hmac_key,
                })
            }
        }
        .map_err(Error::Registration)?;

        info!("Registered ACME account {}", registered.uri);
        Ok((client, AccountRegistration::Registered(registered)))
    }

    fn new_client(&self, identity: &Identity, config: &FetcherConfig) -> Result<F::Client, Error> {
        let client = self
            .factory
            .build(identity, &config.directory_url)
            .map_err(Error::ClientConstruction)?;
        challenge::configure(client, &config.challenges, self.dns_providers)
    }
}
