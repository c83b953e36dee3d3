//! Credential issuance and resolution.
//!
//! The opaque credential format is `aseo_<url-safe base64 of 24 random
//! bytes>` (192 bits of entropy). Only a SHA-256 digest of the full string
//! is ever persisted; the plaintext is returned to the caller exactly once,
//! at issuance or rotation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use ring::digest::{digest, SHA256};

/// Stable prefix callers can use to cheaply reject malformed credentials
/// before ever touching the persistence layer.
pub const CREDENTIAL_PREFIX: &str = "aseo_";

const TOKEN_BYTES: usize = 24;

/// A freshly issued or rotated credential: the plaintext (shown once) and
/// the digest that gets stored.
pub struct IssuedCredential {
    pub plaintext: String,
    pub hash: Vec<u8>,
}

/// Stateless credential generation and verification. Persistence of the
/// resulting hash is the caller's (billing engine's) responsibility.
#[derive(Debug, Default, Clone, Copy)]
pub struct CredentialService;

impl CredentialService {
    pub fn new() -> Self {
        Self
    }

    /// Generates a new opaque credential and its storable digest.
    pub fn issue(&self) -> IssuedCredential {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);
        let plaintext = format!("{CREDENTIAL_PREFIX}{token}");
        let hash = Self::digest(&plaintext);
        IssuedCredential { plaintext, hash }
    }

    /// Rotating is just re-issuing; the caller overwrites the stored hash,
    /// which invalidates the previous credential immediately.
    pub fn rotate(&self) -> IssuedCredential {
        self.issue()
    }

    /// Cheap, non-cryptographic rejection of malformed credentials before a
    /// persistence lookup is attempted.
    pub fn has_valid_prefix(&self, candidate: &str) -> bool {
        candidate.starts_with(CREDENTIAL_PREFIX) && candidate.len() > CREDENTIAL_PREFIX.len()
    }

    /// Computes the digest used to look a credential up in storage.
    pub fn digest(plaintext: &str) -> Vec<u8> {
        digest(&SHA256, plaintext.as_bytes()).as_ref().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_credential_round_trips_to_its_own_digest() {
        let service = CredentialService::new();
        let issued = service.issue();
        assert!(issued.plaintext.starts_with(CREDENTIAL_PREFIX));
        assert_eq!(CredentialService::digest(&issued.plaintext), issued.hash);
    }

    #[test]
    fn rotation_produces_a_different_credential() {
        let service = CredentialService::new();
        let first = service.issue();
        let second = service.rotate();
        assert_ne!(first.plaintext, second.plaintext);
        assert_ne!(first.hash, second.hash);
    }

    #[test]
    fn prefix_check_rejects_malformed_values() {
        let service = CredentialService::new();
        assert!(!service.has_valid_prefix("not-a-credential"));
        assert!(!service.has_valid_prefix("aseo_"));
        assert!(service.has_valid_prefix("aseo_abc123"));
    }
}
