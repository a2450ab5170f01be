use base64::{decode_config, encode_config, DecodeError};
use reqwest::blocking::Response;

use crate::client::ClientError;

/// Returns the `base64url` encoding of the input.
pub(crate) fn b64(to_encode: &[u8]) -> String {
    encode_config(to_encode, base64::URL_SAFE_NO_PAD)
}

/// Decodes `base64url`, with or without trailing padding.
pub(crate) fn b64_decode(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    decode_config(encoded.trim_end_matches('='), base64::URL_SAFE_NO_PAD)
}

/// Extracts a header field from a given http `Response`.
#[inline]
pub(crate) fn header(response: &Response, name: &'static str) -> Result<String, ClientError> {
    Ok(response
        .headers()
        .get(name)
        .ok_or(ClientError::MissingHeader(name))?
        .to_str()?
        .to_owned())
}
