use openssl::{error::ErrorStack, x509::X509};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to parse certificate: {0}")]
    Openssl(#[from] ErrorStack),
    #[error("no certificates found")]
    NoCertificates,
}

/// Parses a PEM bundle (leaf first) or a single DER certificate. The
/// returned chain keeps the order of the input.
pub fn parse_certificates(bytes: &[u8]) -> Result<Vec<X509>, ParseError> {
    let certs = if is_pem(bytes) {
        X509::stack_from_pem(bytes)?
    } else {
        vec![X509::from_der(bytes)?]
    };

    if certs.is_empty() {
        return Err(ParseError::NoCertificates);
    }
    Ok(certs)
}

fn is_pem(bytes: &[u8]) -> bool {
    const MARKER: &[u8] = b"-----BEGIN";
    bytes.windows(MARKER.len()).any(|w| w == MARKER)
}

/// Splits a PEM bundle into its leaf and the remaining chain.
pub(crate) fn split_leaf(pem: &[u8]) -> (Vec<u8>, Vec<u8>) {
    const END: &[u8] = b"-----END CERTIFICATE-----";
    match pem.windows(END.len()).position(|w| w == END) {
        Some(pos) => {
            let mut split = pos + END.len();
            while split < pem.len() && (pem[split] == b'\n' || pem[split] == b'\r') {
                split += 1;
            }
            (pem[..split].to_vec(), pem[split..].to_vec())
        }
        None => (pem.to_vec(), Vec::new()),
    }
}
