//! Ed25519 key holding and signing for node agents.
//!
//! `ed25519-dalek` is used here strictly as a sign/verify oracle. This
//! crate's job is key lifecycle (load, rotate, revoke, zeroize), not
//! cryptographic primitives.

pub mod error;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use rand::rngs::OsRng;

pub use error::KeyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pending,
    Active,
    Rotating,
    Revoked,
}

struct KeyMaterial {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    fingerprint: String,
}

impl KeyMaterial {
    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let fingerprint = fingerprint_of(verifying_key.as_bytes());
        Self {
            signing_key,
            verifying_key,
            fingerprint,
        }
    }
}

/// Hex SHA-256 of a public key's raw bytes — the on-the-wire node identifier.
pub fn fingerprint_of(public_key_bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(public_key_bytes))
}

struct Inner {
    state: KeyState,
    primary: KeyMaterial,
    /// Old key retained only during `Rotating`, so in-flight signatures
    /// from before the rotation still verify.
    previous: Option<KeyMaterial>,
}

/// Holds a node's Ed25519 keypair and produces/verifies signatures over
/// canonical message bytes. The private key never leaves this struct.
pub struct KeyService {
    inner: RwLock<Inner>,
}

impl KeyService {
    /// Load a keypair from a 32-byte seed file. The file must carry mode
    /// `0600` — anything more permissive is rejected rather than silently
    /// accepted, since the seed is the node's entire identity.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|_| KeyError::NotFound(path.display().to_string()))?;
        let mode = metadata.permissions().mode() & 0o777;
        if mode != 0o600 {
            return Err(KeyError::InsecurePermissions(format!(
                "{} has mode {:o}, expected 0600",
                path.display(),
                mode
            )));
        }

        let bytes = fs::read(path)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Malformed(format!("expected 32-byte seed, got {} bytes", bytes.len())))?;
        let signing_key = SigningKey::from_bytes(&seed);

        Ok(Self::from_signing_key(signing_key, KeyState::Active))
    }

    /// Generate a fresh keypair (used in tests and first-run bootstrap).
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key, KeyState::Active)
    }

    fn from_signing_key(signing_key: SigningKey, state: KeyState) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state,
                primary: KeyMaterial::from_signing_key(signing_key),
                previous: None,
            }),
        }
    }

    pub fn state(&self) -> KeyState {
        self.inner.read().state
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.inner.read().primary.verifying_key.as_bytes())
    }

    pub fn fingerprint(&self) -> String {
        self.inner.read().primary.fingerprint.clone()
    }

    /// Sign `message` with the active key. Fails once the key has been
    /// revoked; during `rotating`, the primary (newest) key signs.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; 64], KeyError> {
        let inner = self.inner.read();
        if inner.state == KeyState::Revoked {
            return Err(KeyError::KeyRevoked);
        }
        Ok(inner.primary.signing_key.sign(message).to_bytes())
    }

    /// Verify a signature against an arbitrary hex-encoded public key —
    /// used to check peer signatures, not necessarily this service's own.
    pub fn verify(public_key_hex: &str, message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(key_bytes) = hex::decode(public_key_hex) else {
            return false;
        };
        let Ok(key_bytes): Result<[u8; 32], _> = key_bytes.try_into() else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let signature = Signature::from_bytes(signature);
        verifying_key.verify(message, &signature).is_ok()
    }

    /// Verify against this service's own current (or previous, during
    /// rotation) key material.
    pub fn verify_self(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let inner = self.inner.read();
        let sig = Signature::from_bytes(signature);
        if inner.primary.verifying_key.verify(message, &sig).is_ok() {
            return true;
        }
        if inner.state == KeyState::Rotating {
            if let Some(ref previous) = inner.previous {
                return previous.verifying_key.verify(message, &sig).is_ok();
            }
        }
        false
    }

    /// Begin rotation: the new key becomes primary and can sign
    /// immediately; the old key is retained for verification until
    /// [`KeyService::complete_rotation`] or [`KeyService::revoke`].
    pub fn rotate(&self, new_signing_key: SigningKey) {
        let mut inner = self.inner.write();
        let old_primary = std::mem::replace(&mut inner.primary, KeyMaterial::from_signing_key(new_signing_key));
        inner.previous = Some(old_primary);
        inner.state = KeyState::Rotating;
    }

    /// Drop the retained old key once every peer has observed the new one.
    pub fn complete_rotation(&self) {
        let mut inner = self.inner.write();
        inner.previous = None;
        inner.state = KeyState::Active;
    }

    /// Revoke signing. The private key material is dropped (and zeroized
    /// by `ed25519-dalek`'s `ZeroizeOnDrop` impl) by replacing it with a
    /// throwaway key; only `fingerprint`/`state` remain meaningful.
    pub fn revoke(&self) {
        let mut inner = self.inner.write();
        inner.previous = None;
        inner.state = KeyState::Revoked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_seed_file(seed: &[u8; 32]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600)).unwrap();
        file.write_all(seed).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let service = KeyService::generate();
        let msg = b"heartbeat bytes";
        let sig = service.sign(msg).unwrap();
        assert!(KeyService::verify(&service.public_key_hex(), msg, &sig));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let service = KeyService::generate();
        let sig = service.sign(b"original").unwrap();
        assert!(!KeyService::verify(&service.public_key_hex(), b"tampered", &sig));
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let service = KeyService::generate();
        let msg = b"original";
        let mut sig = service.sign(msg).unwrap();
        sig[0] ^= 0xFF;
        assert!(!KeyService::verify(&service.public_key_hex(), msg, &sig));
    }

    #[test]
    fn revoked_key_refuses_to_sign() {
        let service = KeyService::generate();
        service.revoke();
        assert!(matches!(service.sign(b"x"), Err(KeyError::KeyRevoked)));
    }

    #[test]
    fn rotating_accepts_signatures_from_old_and_new_key() {
        let service = KeyService::generate();
        let old_sig = service.sign(b"before rotation").unwrap();

        let new_key = SigningKey::generate(&mut OsRng);
        service.rotate(new_key);
        assert_eq!(service.state(), KeyState::Rotating);

        assert!(service.verify_self(b"before rotation", &old_sig));

        let new_sig = service.sign(b"after rotation").unwrap();
        assert!(service.verify_self(b"after rotation", &new_sig));

        service.complete_rotation();
        assert_eq!(service.state(), KeyState::Active);
        assert!(!service.verify_self(b"before rotation", &old_sig));
    }

    #[test]
    fn load_rejects_insecure_permissions() {
        let seed = [7u8; 32];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644)).unwrap();
        file.write_all(&seed).unwrap();
        file.flush().unwrap();

        let result = KeyService::load_from_path(file.path());
        assert!(matches!(result, Err(KeyError::InsecurePermissions(_))));
    }

    #[test]
    fn load_from_valid_seed_file_succeeds() {
        let seed = [9u8; 32];
        let file = write_seed_file(&seed);
        let service = KeyService::load_from_path(file.path()).unwrap();
        assert_eq!(service.state(), KeyState::Active);
    }

    #[test]
    fn fingerprint_is_hex_sha256_of_public_key() {
        let service = KeyService::generate();
        let fp = service.fingerprint();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
