//! Identity import and export
//!
//! Identities travel as armored bincode packets. A private block embeds the
//! complete public packet, so either kind of block yields a public identity.

use super::{
    CertificationKeyPair, EncryptionKeyPair, Identity, IdentityError, KeyParams, PublicIdentity,
    KEY_FORMAT_VERSION,
};
use crate::crypto::armor::{self, ArmorBlock, ArmorKind};
use crate::crypto::KeyId;
use bincode::Options;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::PublicKey as X25519PublicKey;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Upper bound on a single decoded key packet
const MAX_PACKET_SIZE: u64 = 64 * 1024;

fn packet_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_PACKET_SIZE)
        .reject_trailing_bytes()
}

fn malformed(e: impl fmt::Display) -> IdentityError {
    IdentityError::MalformedKeyMaterial(e.to_string())
}

#[derive(Clone, Serialize, Deserialize)]
struct PublicKeyPacket {
    version: u8,
    user_id: String,
    params: KeyParams,
    certification_key: [u8; 32],
    encryption_key: [u8; 32],
    self_signature: Vec<u8>,
}

impl PublicKeyPacket {
    fn from_identity(public: &PublicIdentity) -> Self {
        Self {
            version: KEY_FORMAT_VERSION,
            user_id: public.user_id().to_string(),
            params: *public.params(),
            certification_key: public.certification_key().to_bytes(),
            encryption_key: public.encryption_key().to_bytes(),
            self_signature: public.self_signature().to_bytes().to_vec(),
        }
    }

    fn to_identity(&self) -> Result<PublicIdentity, IdentityError> {
        if self.version != KEY_FORMAT_VERSION {
            return Err(malformed(format!(
                "unsupported key format version {}",
                self.version
            )));
        }

        let certification_key =
            VerifyingKey::from_bytes(&self.certification_key).map_err(malformed)?;
        let self_signature = Signature::from_slice(&self.self_signature).map_err(malformed)?;

        PublicIdentity::from_parts(
            self.user_id.clone(),
            self.params,
            certification_key,
            X25519PublicKey::from(self.encryption_key),
            self_signature,
        )
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SecretKeyPacket {
    #[zeroize(skip)]
    public: PublicKeyPacket,
    certification_secret: [u8; 32],
    encryption_secret: [u8; 32],
}

impl SecretKeyPacket {
    fn from_identity(identity: &Identity) -> Self {
        Self {
            public: PublicKeyPacket::from_identity(identity.public()),
            certification_secret: *identity.certification_keys().secret_key_bytes(),
            encryption_secret: *identity.encryption_keys().secret_key_bytes(),
        }
    }

    fn to_identity(&self) -> Result<Identity, IdentityError> {
        Identity::from_parts(
            self.public.to_identity()?,
            CertificationKeyPair::from_bytes(&self.certification_secret),
            EncryptionKeyPair::from_bytes(self.encryption_secret),
        )
    }
}

fn decode_public(data: &[u8]) -> Result<PublicIdentity, IdentityError> {
    let packet: PublicKeyPacket = packet_options().deserialize(data).map_err(malformed)?;
    packet.to_identity()
}

fn decode_secret(data: &[u8]) -> Result<SecretKeyPacket, IdentityError> {
    packet_options().deserialize(data).map_err(malformed)
}

fn decode_blocks(text: &str) -> Result<Vec<ArmorBlock>, IdentityError> {
    armor::decode_all(text).map_err(malformed)
}

/// Armored exports of one identity
pub struct ExportedKeys {
    pub public: String,
    /// Unencrypted. Anyone holding this text holds the identity.
    pub private: Zeroizing<String>,
}

impl fmt::Debug for ExportedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedKeys")
            .field("public", &self.public)
            .field("private", &"<redacted>")
            .finish()
    }
}

pub fn export(identity: &Identity) -> Result<ExportedKeys, IdentityError> {
    Ok(ExportedKeys {
        public: export_public(identity.public())?,
        private: export_private(identity)?,
    })
}

pub fn export_public(public: &PublicIdentity) -> Result<String, IdentityError> {
    let bytes = packet_options()
        .serialize(&PublicKeyPacket::from_identity(public))
        .map_err(|e| IdentityError::Serialization(e.to_string()))?;
    Ok(armor::encode(ArmorKind::PublicKey, &bytes))
}

pub fn export_private(identity: &Identity) -> Result<Zeroizing<String>, IdentityError> {
    let bytes = Zeroizing::new(
        packet_options()
            .serialize(&SecretKeyPacket::from_identity(identity))
            .map_err(|e| IdentityError::Serialization(e.to_string()))?,
    );
    Ok(Zeroizing::new(armor::encode(ArmorKind::PrivateKey, &bytes)))
}

/// First public key in `text`
pub fn import_public(text: &str) -> Result<PublicIdentity, IdentityError> {
    import_public_ring(text)?
        .into_iter()
        .next()
        .ok_or(IdentityError::EmptyKeyRing)
}

/// Every key in `text`. Private blocks contribute their public halves.
pub fn import_public_ring(text: &str) -> Result<PublicKeyRing, IdentityError> {
    let mut keys = Vec::new();

    for block in decode_blocks(text)? {
        match block.kind {
            ArmorKind::PublicKey => keys.push(decode_public(&block.data)?),
            ArmorKind::PrivateKey => keys.push(decode_secret(&block.data)?.public.to_identity()?),
            ArmorKind::Message => tracing::debug!("Skipping message block in key text"),
        }
    }

    if keys.is_empty() {
        tracing::warn!("No public keys found in key text");
        return Err(IdentityError::EmptyKeyRing);
    }
    tracing::debug!("Imported {} public key(s)", keys.len());
    Ok(KeyRing::new(keys))
}

/// First private key in `text`
pub fn import_private(text: &str) -> Result<Identity, IdentityError> {
    import_private_ring(text)?
        .into_iter()
        .next()
        .ok_or(IdentityError::EmptyKeyRing)
}

pub fn import_private_ring(text: &str) -> Result<SecretKeyRing, IdentityError> {
    let mut keys = Vec::new();

    for block in decode_blocks(text)? {
        if block.kind == ArmorKind::PrivateKey {
            let data = Zeroizing::new(block.data);
            keys.push(decode_secret(&data)?.to_identity()?);
        }
    }

    if keys.is_empty() {
        tracing::warn!("No private keys found in key text");
        return Err(IdentityError::EmptyKeyRing);
    }
    tracing::debug!("Imported {} private key(s)", keys.len());
    Ok(KeyRing::new(keys))
}

/// Ordered collection of identities
#[derive(Debug, Clone)]
pub struct KeyRing<K> {
    keys: Vec<K>,
}

pub type PublicKeyRing = KeyRing<PublicIdentity>;
pub type SecretKeyRing = KeyRing<Identity>;

impl<K> KeyRing<K> {
    pub fn new(keys: Vec<K>) -> Self {
        Self { keys }
    }

    pub fn single(key: K) -> Self {
        Self { keys: vec![key] }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn first(&self) -> Option<&K> {
        self.keys.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, K> {
        self.keys.iter()
    }
}

impl<K> From<Vec<K>> for KeyRing<K> {
    fn from(keys: Vec<K>) -> Self {
        Self::new(keys)
    }
}

impl<K> IntoIterator for KeyRing<K> {
    type Item = K;
    type IntoIter = std::vec::IntoIter<K>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl<'a, K> IntoIterator for &'a KeyRing<K> {
    type Item = &'a K;
    type IntoIter = std::slice::Iter<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

impl From<&PublicIdentity> for PublicKeyRing {
    fn from(public: &PublicIdentity) -> Self {
        Self::single(public.clone())
    }
}

impl From<&Identity> for PublicKeyRing {
    fn from(identity: &Identity) -> Self {
        Self::single(identity.public().clone())
    }
}

impl From<&Identity> for SecretKeyRing {
    fn from(identity: &Identity) -> Self {
        Self::single(identity.clone())
    }
}

impl SecretKeyRing {
    /// Key whose encryption subkey has the given id
    pub fn find_by_encryption_key(&self, key_id: &KeyId) -> Option<&Identity> {
        self.keys
            .iter()
            .find(|identity| identity.public().encryption_key_id() == *key_id)
    }

    pub fn to_public(&self) -> PublicKeyRing {
        self.keys.iter().map(|k| k.public().clone()).collect::<Vec<_>>().into()
    }
}
