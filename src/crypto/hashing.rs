//! Key fingerprints using BLAKE3
//!
//! A fingerprint commits to the key kind, its creation time and its public
//! bytes. The key id is the low 8 bytes of the fingerprint.

use serde::{Deserialize, Serialize};
use std::fmt;

const FINGERPRINT_CONTEXT: &[u8] = b"kilid/v1/fingerprint";

/// What a fingerprinted public key is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Ed25519 primary key, certifies the identity
    Certification,
    /// X25519 subkey, receives wrapped session keys
    Encryption,
}

impl KeyRole {
    fn tag(self) -> u8 {
        match self {
            KeyRole::Certification => 1,
            KeyRole::Encryption => 2,
        }
    }
}

/// BLAKE3 fingerprint of a public key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a public key
    pub fn of_key(role: KeyRole, created_at: u64, public_key: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_CONTEXT);
        hasher.update(&[role.tag()]);
        hasher.update(&created_at.to_be_bytes());
        hasher.update(public_key);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The short id derived from this fingerprint
    pub fn key_id(&self) -> KeyId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[24..]);
        KeyId(id)
    }

    /// Uppercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // groups of four hex digits
        let hex = self.to_hex();
        let groups: Vec<&str> = hex
            .as_bytes()
            .chunks(4)
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect();
        write!(f, "{}", groups.join(" "))
    }
}

/// 8-byte key id, carried in envelopes to name the recipient key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId([u8; 8]);

impl KeyId {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = Fingerprint::of_key(KeyRole::Certification, 0, &[1u8; 32]);
        let b = Fingerprint::of_key(KeyRole::Certification, 0, &[1u8; 32]);

        assert_eq!(a, b);
        assert_eq!(a.key_id(), b.key_id());
    }

    #[test]
    fn test_fingerprint_inputs_matter() {
        let base = Fingerprint::of_key(KeyRole::Certification, 0, &[1u8; 32]);

        assert_ne!(base, Fingerprint::of_key(KeyRole::Encryption, 0, &[1u8; 32]));
        assert_ne!(base, Fingerprint::of_key(KeyRole::Certification, 1, &[1u8; 32]));
        assert_ne!(base, Fingerprint::of_key(KeyRole::Certification, 0, &[2u8; 32]));
    }

    #[test]
    fn test_hex_roundtrip() {
        let fpr = Fingerprint::of_key(KeyRole::Encryption, 42, b"key");
        let parsed = Fingerprint::from_hex(&fpr.to_hex()).unwrap();

        assert_eq!(fpr, parsed);
        assert!(Fingerprint::from_hex("abcd").is_err());
    }

    #[test]
    fn test_key_id_is_fingerprint_suffix() {
        let fpr = Fingerprint::of_key(KeyRole::Encryption, 0, &[7u8; 32]);
        let id = fpr.key_id();

        assert_eq!(id.as_bytes(), &fpr.as_bytes()[24..]);
        assert!(fpr.to_hex().ends_with(&id.to_string()));
    }

    #[test]
    fn test_display_groups() {
        let fpr = Fingerprint::of_key(KeyRole::Certification, 0, &[0u8; 32]);
        let shown = fpr.to_string();

        assert_eq!(shown.split(' ').count(), 16);
        assert_eq!(shown.replace(' ', ""), fpr.to_hex());
    }
}
