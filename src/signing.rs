use std::io::Read;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::types::Key;

/// Algorithm token expected at the start of the `Authorization` header.
pub const HMAC_SHA256: &str = "HMAC_SHA256";

const READ_CHUNK: usize = 8 * 1024;

type HmacSha256 = Hmac<Sha256>;

/// Keys the provider may sign deliveries with.
///
/// More than one key can be live at a time while a key is being rotated.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: Vec<Key>,
}

impl Keyring {
    pub fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    pub fn push(&mut self, key: Key) {
        self.keys.push(key);
    }

    pub fn find(&self, key_id: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.id == key_id)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }
}

impl From<Vec<Key>> for Keyring {
    fn from(keys: Vec<Key>) -> Self {
        Self::new(keys)
    }
}

/// Why an inbound signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("unsupported signature algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("malformed Authorization header")]
    MalformedHeader,

    #[error("unknown key id {0}")]
    UnknownKey(String),

    #[error("signature is not valid hex")]
    InvalidDigest,

    /// Digests are kept for test assertions and are not part of the message.
    #[error("signature mismatch for key {key_id}")]
    Mismatch {
        key_id: String,
        supplied: String,
        computed: String,
    },
}

/// Key id and hex digest taken from an `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    pub key_id: String,
    pub digest: String,
}

/// Parse `HMAC_SHA256 <keyId>;<hexDigest>`.
pub fn parse_authorization(header: Option<&str>) -> Result<ParsedSignature, VerificationError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(VerificationError::MissingHeader)?;

    let (algorithm, credentials) = header.split_once(' ').unwrap_or((header, ""));
    if algorithm != HMAC_SHA256 {
        return Err(VerificationError::UnsupportedAlgorithm(algorithm.to_string()));
    }

    let mut parts = credentials.trim().split(';');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key_id), Some(digest), None) if !key_id.is_empty() && !digest.is_empty() => {
            Ok(ParsedSignature {
                key_id: key_id.to_string(),
                digest: digest.to_string(),
            })
        }
        _ => Err(VerificationError::MalformedHeader),
    }
}

fn new_mac(secret: &[u8]) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|e| Error::configuration(format!("unusable HMAC key: {e}")))
}

/// Hex HMAC-SHA256 of `payload`.
pub fn compute_signature(secret: &[u8], payload: &[u8]) -> Result<String> {
    let mut mac = new_mac(secret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build the `Authorization` value the provider would send for `body`.
pub fn sign_authorization(key: &Key, body: &[u8]) -> Result<String> {
    let digest = compute_signature(&key.secret_bytes()?, body)?;
    Ok(format!("{HMAC_SHA256} {};{digest}", key.id))
}

/// Verify a delivery whose body is already in memory.
pub fn verify(keyring: &Keyring, authorization: Option<&str>, body: &[u8]) -> Result<()> {
    verify_reader(keyring, authorization, body).map(|_| ())
}

/// Verify a delivery while reading its body exactly once.
///
/// Every chunk is fed to the MAC and buffered; the buffered bytes are
/// returned so the caller can decode the payload afterwards.
pub fn verify_reader<R: Read>(
    keyring: &Keyring,
    authorization: Option<&str>,
    mut body: R,
) -> Result<Vec<u8>> {
    if keyring.is_empty() {
        return Err(Error::configuration("no HMAC keys configured"));
    }

    let parsed = parse_authorization(authorization)?;
    let key = keyring
        .find(&parsed.key_id)
        .ok_or_else(|| VerificationError::UnknownKey(parsed.key_id.clone()))?;
    let secret = key.secret_bytes()?;
    let supplied = hex::decode(&parsed.digest).map_err(|_| VerificationError::InvalidDigest)?;

    let mut mac = new_mac(&secret)?;
    let mut copy = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = body
            .read(&mut chunk)
            .map_err(|e| Error::BadRequest(format!("failed to read body: {e}")))?;
        if n == 0 {
            break;
        }
        mac.update(&chunk[..n]);
        copy.extend_from_slice(&chunk[..n]);
    }

    let computed = mac.finalize().into_bytes();
    if bool::from(computed.as_slice().ct_eq(&supplied)) {
        Ok(copy)
    } else {
        Err(VerificationError::Mismatch {
            key_id: parsed.key_id,
            supplied: parsed.digest,
            computed: hex::encode(computed),
        }
        .into())
    }
}
