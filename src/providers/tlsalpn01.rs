use std::{
    io::ErrorKind,
    net::TcpListener,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, warn};
use openssl::{
    asn1::{Asn1Object, Asn1OctetString, Asn1Time},
    bn::{BigNum, MsbOption},
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    sha::sha256,
    ssl::{self, AlpnError, SslAcceptor, SslMethod},
    x509::{extension::SubjectAlternativeName, X509Extension, X509NameBuilder, X509},
};

use super::listen_addrs;
use crate::challenge::{ChallengeProvider, ProviderError};

pub const ACME_TLS_1_PROTOCOL: &[u8] = b"acme-tls/1";
/// `ACME_TLS_1_PROTOCOL` in ALPN wire format.
const ALPN_ACME_TLS_1: &[u8] = b"\x0aacme-tls/1";
/// id-pe-acmeIdentifier, RFC 8737
const ID_PE_ACME_IDENTIFIER: &str = "1.3.6.1.5.5.7.1.31";
const ACCEPT_POLL: Duration = Duration::from_millis(50);
/// Bounds a single handshake so a silent peer cannot stall the listener.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Builds the self-signed validation certificate for `domain`, carrying the
/// critical acmeIdentifier extension with the SHA-256 of `key_auth`.
pub fn challenge_certificate(
    domain: &str,
    key_auth: &str,
) -> Result<(X509, PKey<Private>), ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, "ACME Challenge TEMP")?;
    let name = name.build();

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(1)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    let san = SubjectAlternativeName::new()
        .dns(domain)
        .build(&builder.x509v3_context(None, None))?;
    builder.append_extension(san)?;

    // DER OCTET STRING wrapping the digest
    let mut identifier = vec![0x04, 0x20];
    identifier.extend_from_slice(&sha256(key_auth.as_bytes()));
    let oid = Asn1Object::from_str(ID_PE_ACME_IDENTIFIER)?;
    let contents = Asn1OctetString::new_from_bytes(&identifier)?;
    let acme_identifier = X509Extension::new_from_der(&oid, true, &contents)?;
    builder.append_extension(acme_identifier)?;

    builder.sign(&key, MessageDigest::sha256())?;
    Ok((builder.build(), key))
}

struct Running {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Answers TLS-ALPN-01 challenges on its own listener, negotiating
/// `acme-tls/1` with the validation certificate between `present` and
/// `clean_up`.
pub struct TlsAlpnServerProvider {
    host: String,
    port: u16,
    running: Option<Running>,
}

impl TlsAlpnServerProvider {
    pub fn new<T: Into<String>>(host: T, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            running: None,
        }
    }

    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::SeqCst);
            let _ = running.handle.join();
        }
    }
}

impl ChallengeProvider for TlsAlpnServerProvider {
    fn present(&mut self, domain: &str, _: &str, key_auth: &str) -> Result<(), ProviderError> {
        self.stop();

        let (cert, key) = challenge_certificate(domain, key_auth)?;
        let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
        acceptor.set_private_key(&key)?;
        acceptor.set_certificate(&cert)?;
        acceptor.set_alpn_select_callback(|_, client| {
            ssl::select_next_proto(ALPN_ACME_TLS_1, client).ok_or(AlpnError::NOACK)
        });
        let acceptor = acceptor.build();

        let listener = TcpListener::bind(listen_addrs(&self.host, self.port)?.as_slice())?;
        listener.set_nonblocking(true)?;
        debug!(
            "Serving TLS-ALPN-01 challenge for {} on {}",
            domain,
            listener.local_addr()?
        );

        let stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !stopped.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let prepared = stream
                            .set_nonblocking(false)
                            .and_then(|_| stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)))
                            .and_then(|_| stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT)));
                        if let Err(e) = prepared {
                            debug!("Dropping TLS-ALPN-01 connection from {}: {}", peer, e);
                            continue;
                        }
                        match acceptor.accept(stream) {
                            Ok(mut tls) => {
                                debug!("Completed TLS-ALPN-01 handshake with {}", peer);
                                let _ = tls.shutdown();
                            }
                            Err(e) => debug!("TLS-ALPN-01 handshake with {} failed: {}", peer, e),
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                    Err(e) => {
                        warn!("TLS-ALPN-01 listener stopped: {}", e);
                        break;
                    }
                }
            }
        });

        self.running = Some(Running { stop, handle });
        Ok(())
    }

    fn clean_up(&mut self, _: &str, _: &str, _: &str) -> Result<(), ProviderError> {
        self.stop();
        Ok(())
    }
}

impl Drop for TlsAlpnServerProvider {
    fn drop(&mut self) {
        self.stop();
    }
}
