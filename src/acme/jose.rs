use openssl::{
    bn::{BigNum, BigNumContext},
    ecdsa::EcdsaSig,
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, Private},
    sha::sha256,
    sign::Signer,
};
use serde_json::{json, Value};

use crate::{
    client::ClientError,
    util::{b64, b64_decode},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Algorithm {
    RS256,
    ES256,
    ES384,
}

impl Algorithm {
    fn name(self) -> &'static str {
        match self {
            Algorithm::RS256 => "RS256",
            Algorithm::ES256 => "ES256",
            Algorithm::ES384 => "ES384",
        }
    }

    fn digest(self) -> MessageDigest {
        match self {
            Algorithm::RS256 | Algorithm::ES256 => MessageDigest::sha256(),
            Algorithm::ES384 => MessageDigest::sha384(),
        }
    }

    /// Byte width of one EC coordinate or signature half.
    fn field_size(self) -> i32 {
        match self {
            Algorithm::RS256 => 0,
            Algorithm::ES256 => 32,
            Algorithm::ES384 => 48,
        }
    }
}

/// The account key together with its JSON web key (RFC 7517).
#[derive(Clone, Debug)]
pub(crate) struct AccountKey {
    key: PKey<Private>,
    alg: Algorithm,
    jwk: Value,
}

impl AccountKey {
    pub(crate) fn new(key: &PKey<Private>) -> Result<Self, ClientError> {
        let (alg, jwk) = match key.id() {
            Id::RSA => {
                let rsa = key.rsa()?;
                let jwk = json!({
                    "e": b64(&rsa.e().to_vec()),
                    "kty": "RSA",
                    "n": b64(&rsa.n().to_vec()),
                });
                (Algorithm::RS256, jwk)
            }
            Id::EC => {
                let ec = key.ec_key()?;
                let (alg, crv) = match ec.group().curve_name() {
                    Some(Nid::X9_62_PRIME256V1) => (Algorithm::ES256, "P-256"),
                    Some(Nid::SECP384R1) => (Algorithm::ES384, "P-384"),
                    _ => return Err(ClientError::UnsupportedKey),
                };
                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates_gfp(ec.group(), &mut x, &mut y, &mut ctx)?;
                let jwk = json!({
                    "crv": crv,
                    "kty": "EC",
                    "x": b64(&x.to_vec_padded(alg.field_size())?),
                    "y": b64(&y.to_vec_padded(alg.field_size())?),
                });
                (alg, jwk)
            }
            _ => return Err(ClientError::UnsupportedKey),
        };

        Ok(Self {
            key: key.clone(),
            alg,
            jwk,
        })
    }

    pub(crate) fn jwk(&self) -> &Value {
        &self.jwk
    }

    pub(crate) fn alg(&self) -> Algorithm {
        self.alg
    }

    /// JWK thumbprint (RFC 7638). `serde_json` keeps object keys sorted,
    /// which is the member order the thumbprint requires.
    pub(crate) fn thumbprint(&self) -> Result<String, ClientError> {
        let canonical = serde_json::to_string(&self.jwk)?;
        Ok(b64(&sha256(canonical.as_bytes())))
    }

    pub(crate) fn key_authorization(&self, token: &str) -> Result<String, ClientError> {
        Ok(format!("{}.{}", token, self.thumbprint()?))
    }

    /// Constructs a flattened JSON web signature (RFC 7515). A `None`
    /// payload yields the empty payload of a POST-as-GET request.
    pub(crate) fn sign(&self, mut protected: Value, payload: Option<&Value>) -> Result<Value, ClientError> {
        protected["alg"] = json!(self.alg.name());
        let protected64 = b64(serde_json::to_string(&protected)?.as_bytes());
        let payload64 = match payload {
            Some(payload) => b64(serde_json::to_string(payload)?.as_bytes()),
            None => String::new(),
        };

        let mut signer = Signer::new(self.alg.digest(), &self.key)?;
        signer.update(format!("{}.{}", protected64, payload64).as_bytes())?;
        let signature = signer.sign_to_vec()?;
        let signature = match self.alg {
            Algorithm::RS256 => signature,
            // JWS wants the raw r || s form instead of DER
            Algorithm::ES256 | Algorithm::ES384 => {
                let sig = EcdsaSig::from_der(&signature)?;
                let mut raw = sig.r().to_vec_padded(self.alg.field_size())?;
                raw.extend(sig.s().to_vec_padded(self.alg.field_size())?);
                raw
            }
        };

        Ok(json!({
            "protected": protected64,
            "payload": payload64,
            "signature": b64(&signature),
        }))
    }

    /// The `externalAccountBinding` member of a newAccount request: the
    /// account JWK signed with the CA-issued MAC key (RFC 8555, 7.3.4).
    pub(crate) fn external_account_binding(
        &self,
        kid: &str,
        hmac_encoded: &str,
        url: &str,
    ) -> Result<Value, ClientError> {
        let mac_key = PKey::hmac(&b64_decode(hmac_encoded)?)?;
        let protected = json!({
            "alg": "HS256",
            "kid": kid,
            "url": url,
        });
        let protected64 = b64(serde_json::to_string(&protected)?.as_bytes());
        let payload64 = b64(serde_json::to_string(&self.jwk)?.as_bytes());

        let mut signer = Signer::new(MessageDigest::sha256(), &mac_key)?;
        signer.update(format!("{}.{}", protected64, payload64).as_bytes())?;

        Ok(json!({
            "protected": protected64,
            "payload": payload64,
            "signature": b64(&signer.sign_to_vec()?),
        }))
    }
}
