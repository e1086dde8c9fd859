//! Payload signatures.
//!
//! Both sides share a secret key. The sender computes HMAC-SHA256 over the
//! exact bytes it puts on the wire and sends the base64 digest in the
//! `HashSHA256` header; the receiver recomputes and compares in constant
//! time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header (HTTP) / metadata key (gRPC) carrying the signature.
pub const HASH_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies payloads with a shared key.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    /// Build a signer from an optional configured key. Empty keys disable signing.
    pub fn from_key(key: Option<&str>) -> Option<Self> {
        key.filter(|k| !k.is_empty()).map(Self::new)
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(&self.key).expect("HMAC key of any size is valid")
    }

    /// Base64-encoded HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Check a base64 signature against `payload`. Malformed base64 never verifies.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = STANDARD.decode(signature.trim()) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}
