//! Identity Module - deterministic identities from BIP39 seed phrases
//!
//! A seed drives an XChaCha20 entropy stream. The stream yields an Ed25519
//! certification key and an X25519 encryption subkey, and the certification
//! key signs the user id and both public keys. The same seed, user id and
//! parameters always regenerate the same identity, byte for byte.

pub mod codec;
mod entropy;
mod keys;
mod seed;

pub use codec::{ExportedKeys, KeyRing, PublicKeyRing, SecretKeyRing};
pub use entropy::{EntropyStream, MIN_SEED_LEN};
pub use keys::{CertificationKeyPair, EncryptionKeyPair};
pub use seed::{SeedPhrase, DEFAULT_WORD_COUNT};

use crate::crypto::{Fingerprint, KeyId, KeyRole, SymmetricAlgorithm};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use x25519_dalek::PublicKey as X25519PublicKey;

/// Version byte of key packets and certification payloads
pub const KEY_FORMAT_VERSION: u8 = 1;

/// Comment placed in user ids unless the caller picks another
pub const DEFAULT_COMMENT: &str = "Mnemonic-Generated Key";

const CERTIFICATION_CONTEXT: &[u8] = b"kilid/v1/self-certification";

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid seed phrase: {0}")]
    InvalidSeedPhrase(String),

    #[error("Seed too short: {actual} bytes, need at least {required}")]
    InsufficientSeedLength { actual: usize, required: usize },

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Self-certification failed: {0}")]
    SelfCertificationFailed(String),

    #[error("Malformed key material: {0}")]
    MalformedKeyMaterial(String),

    #[error("Key ring contains no keys")]
    EmptyKeyRing,

    #[error("Self-signature verification failed")]
    SignatureVerificationFailed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Human identity bound to the keys: `Name (Comment) <email>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserId {
    pub name: String,
    pub comment: Option<String>,
    pub email: String,
}

impl UserId {
    /// User id with the default comment
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: Some(DEFAULT_COMMENT.to_string()),
            email: email.into(),
        }
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.name.trim().is_empty() && self.email.trim().is_empty() {
            return Err(IdentityError::InvalidUserId(
                "name and email are both empty".into(),
            ));
        }

        let fields = [Some(&self.name), self.comment.as_ref(), Some(&self.email)];
        for field in fields.into_iter().flatten() {
            if field.contains(['<', '>', '(', ')', '\n', '\r']) {
                return Err(IdentityError::InvalidUserId(format!(
                    "field {field:?} contains a reserved character"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(3);
        if !self.name.is_empty() {
            parts.push(self.name.clone());
        }
        if let Some(comment) = self.comment.as_deref().filter(|c| !c.is_empty()) {
            parts.push(format!("({comment})"));
        }
        if !self.email.is_empty() {
            parts.push(format!("<{}>", self.email));
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// Parameters bound into an identity's self-signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyParams {
    /// Creation time in unix seconds. Fixed rather than read from the clock
    /// so regeneration reproduces the same keys.
    pub created_at: u64,

    /// Cipher senders should use for payloads to this identity
    pub preferred_cipher: SymmetricAlgorithm,
}

impl Default for KeyParams {
    fn default() -> Self {
        Self {
            created_at: 0,
            preferred_cipher: SymmetricAlgorithm::Aes256Gcm,
        }
    }
}

/// Public half of an identity before the self-signature is applied
pub struct UnsignedIdentity {
    user_id: String,
    params: KeyParams,
    certification_key: VerifyingKey,
    encryption_key: X25519PublicKey,
}

impl UnsignedIdentity {
    pub fn new(
        user_id: String,
        params: KeyParams,
        certification_key: VerifyingKey,
        encryption_key: X25519PublicKey,
    ) -> Self {
        Self {
            user_id,
            params,
            certification_key,
            encryption_key,
        }
    }

    /// Bytes covered by the self-signature
    pub fn certification_payload(&self) -> Vec<u8> {
        certification_payload(
            &self.user_id,
            &self.params,
            &self.certification_key,
            &self.encryption_key,
        )
    }

    /// Sign with the certification key, producing the public identity
    pub fn certify(self, key: &CertificationKeyPair) -> Result<PublicIdentity, IdentityError> {
        if key.verifying_key() != &self.certification_key {
            return Err(IdentityError::SelfCertificationFailed(
                "signing key does not match the identity's certification key".into(),
            ));
        }

        let self_signature = key.sign(&self.certification_payload())?;
        let public = PublicIdentity {
            user_id: self.user_id,
            params: self.params,
            certification_key: self.certification_key,
            encryption_key: self.encryption_key,
            self_signature,
        };

        public
            .verify_self_signature()
            .map_err(|e| IdentityError::SelfCertificationFailed(e.to_string()))?;
        Ok(public)
    }
}

fn certification_payload(
    user_id: &str,
    params: &KeyParams,
    certification_key: &VerifyingKey,
    encryption_key: &X25519PublicKey,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(CERTIFICATION_CONTEXT.len() + user_id.len() + 82);
    payload.extend_from_slice(CERTIFICATION_CONTEXT);
    payload.push(KEY_FORMAT_VERSION);
    payload.extend_from_slice(&params.created_at.to_be_bytes());
    payload.push(params.preferred_cipher.id());
    payload.extend_from_slice(&(user_id.len() as u32).to_be_bytes());
    payload.extend_from_slice(user_id.as_bytes());
    payload.extend_from_slice(certification_key.as_bytes());
    payload.extend_from_slice(encryption_key.as_bytes());
    payload
}

/// Self-certified public half of an identity. Safe to share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIdentity {
    user_id: String,
    params: KeyParams,
    certification_key: VerifyingKey,
    encryption_key: X25519PublicKey,
    self_signature: Signature,
}

impl PublicIdentity {
    /// Reassemble a public identity, checking its self-signature
    pub fn from_parts(
        user_id: String,
        params: KeyParams,
        certification_key: VerifyingKey,
        encryption_key: X25519PublicKey,
        self_signature: Signature,
    ) -> Result<Self, IdentityError> {
        let public = Self {
            user_id,
            params,
            certification_key,
            encryption_key,
            self_signature,
        };
        public.verify_self_signature()?;
        Ok(public)
    }

    pub fn verify_self_signature(&self) -> Result<(), IdentityError> {
        let payload = certification_payload(
            &self.user_id,
            &self.params,
            &self.certification_key,
            &self.encryption_key,
        );
        self.certification_key
            .verify_strict(&payload, &self.self_signature)
            .map_err(|_| IdentityError::SignatureVerificationFailed)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn params(&self) -> &KeyParams {
        &self.params
    }

    pub fn certification_key(&self) -> &VerifyingKey {
        &self.certification_key
    }

    pub fn encryption_key(&self) -> &X25519PublicKey {
        &self.encryption_key
    }

    pub fn self_signature(&self) -> &Signature {
        &self.self_signature
    }

    /// Fingerprint of the certification key; names the identity
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_key(
            KeyRole::Certification,
            self.params.created_at,
            self.certification_key.as_bytes(),
        )
    }

    pub fn key_id(&self) -> KeyId {
        self.fingerprint().key_id()
    }

    /// Key id of the encryption subkey; envelopes name their recipient by it
    pub fn encryption_key_id(&self) -> KeyId {
        Fingerprint::of_key(
            KeyRole::Encryption,
            self.params.created_at,
            self.encryption_key.as_bytes(),
        )
        .key_id()
    }
}

/// A complete identity: the public half plus both secret keys.
///
/// Immutable once built. The private export carries the secret keys
/// unencrypted; protect it at rest.
#[derive(Clone)]
pub struct Identity {
    public: PublicIdentity,
    certification: CertificationKeyPair,
    encryption: EncryptionKeyPair,
}

impl Identity {
    /// Recover an identity from a seed phrase and optional passphrase
    pub fn from_seed_phrase(
        mnemonic: &str,
        passphrase: Option<&str>,
        user_id: &UserId,
        params: &KeyParams,
    ) -> Result<Self, IdentityError> {
        let seed_phrase = SeedPhrase::from_phrase(mnemonic)?;
        let seed = seed_phrase.to_seed(passphrase.unwrap_or(""));
        generate(user_id, seed.as_slice(), params)
    }

    /// Rebuild from decoded key material, checking the secrets belong to
    /// the public half
    pub fn from_parts(
        public: PublicIdentity,
        certification: CertificationKeyPair,
        encryption: EncryptionKeyPair,
    ) -> Result<Self, IdentityError> {
        if certification.verifying_key() != public.certification_key() {
            return Err(IdentityError::MalformedKeyMaterial(
                "certification secret does not match public key".into(),
            ));
        }
        if encryption.public_key() != public.encryption_key() {
            return Err(IdentityError::MalformedKeyMaterial(
                "encryption secret does not match public subkey".into(),
            ));
        }

        Ok(Self {
            public,
            certification,
            encryption,
        })
    }

    pub fn public(&self) -> &PublicIdentity {
        &self.public
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint()
    }

    pub fn user_id(&self) -> &str {
        self.public.user_id()
    }

    pub fn certification_keys(&self) -> &CertificationKeyPair {
        &self.certification
    }

    pub fn encryption_keys(&self) -> &EncryptionKeyPair {
        &self.encryption
    }

    /// Armored public and private exports
    pub fn export(&self) -> Result<ExportedKeys, IdentityError> {
        codec::export(self)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.public.user_id)
            .field("fingerprint", &self.public.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Generate the identity determined by `seed`, `user_id` and `params`.
///
/// The entropy stream is created here and dropped on return, so no two
/// identities ever share keystream.
pub fn generate(
    user_id: &UserId,
    seed: &[u8],
    params: &KeyParams,
) -> Result<Identity, IdentityError> {
    user_id.validate()?;
    let mut stream = EntropyStream::new(seed)?;

    let certification = CertificationKeyPair::generate(&mut stream)?;
    let encryption = EncryptionKeyPair::generate(&mut stream)?;
    tracing::debug!("Key generation consumed {} entropy bytes", stream.position());

    let public = UnsignedIdentity::new(
        user_id.to_string(),
        *params,
        *certification.verifying_key(),
        *encryption.public_key(),
    )
    .certify(&certification)?;

    tracing::info!("Generated identity {} for {}", public.fingerprint(), public.user_id());

    Ok(Identity {
        public,
        certification,
        encryption,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_SEED: [u8; 56] = [0u8; 56];

    fn alice() -> UserId {
        UserId::new("Alice", "alice@example.com")
    }

    #[test]
    fn test_user_id_format() {
        assert_eq!(
            alice().to_string(),
            "Alice (Mnemonic-Generated Key) <alice@example.com>"
        );
        assert_eq!(
            alice().with_comment(None).to_string(),
            "Alice <alice@example.com>"
        );
        let bare = UserId::new("", "bob@example.com").with_comment(None);
        assert_eq!(bare.to_string(), "<bob@example.com>");
    }

    #[test]
    fn test_user_id_validation() {
        assert!(alice().validate().is_ok());
        assert!(matches!(
            UserId::new(" ", "").validate(),
            Err(IdentityError::InvalidUserId(_))
        ));
        assert!(matches!(
            UserId::new("Mallory <evil>", "m@example.com").validate(),
            Err(IdentityError::InvalidUserId(_))
        ));
        assert!(generate(&UserId::new("", ""), &ZERO_SEED, &KeyParams::default()).is_err());
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = generate(&alice(), &ZERO_SEED, &KeyParams::default()).unwrap();
        let b = generate(&alice(), &ZERO_SEED, &KeyParams::default()).unwrap();

        assert_eq!(a.public(), b.public());
        assert_eq!(
            *a.certification_keys().secret_key_bytes(),
            *b.certification_keys().secret_key_bytes()
        );
        assert_eq!(
            *a.encryption_keys().secret_key_bytes(),
            *b.encryption_keys().secret_key_bytes()
        );
    }

    #[test]
    fn test_inputs_change_identity() {
        let params = KeyParams::default();
        let base = generate(&alice(), &ZERO_SEED, &params).unwrap();

        let mut other_seed = ZERO_SEED;
        other_seed[55] = 1;
        let seed_changed = generate(&alice(), &other_seed, &params).unwrap();
        assert_ne!(base.fingerprint(), seed_changed.fingerprint());

        let user_changed =
            generate(&UserId::new("Alicia", "alice@example.com"), &ZERO_SEED, &params).unwrap();
        assert_ne!(base.public(), user_changed.public());
        // same keys, different certification
        assert_eq!(base.fingerprint(), user_changed.fingerprint());

        let time_changed = KeyParams { created_at: 1_700_000_000, ..params };
        let later = generate(&alice(), &ZERO_SEED, &time_changed).unwrap();
        assert_ne!(base.fingerprint(), later.fingerprint());

        let cipher_changed = KeyParams {
            preferred_cipher: SymmetricAlgorithm::ChaCha20Poly1305,
            ..params
        };
        let chacha = generate(&alice(), &ZERO_SEED, &cipher_changed).unwrap();
        assert_ne!(base.public().self_signature(), chacha.public().self_signature());
    }

    #[test]
    fn test_seed_length_enforced() {
        let result = generate(&alice(), &[0u8; 40], &KeyParams::default());
        assert!(matches!(
            result,
            Err(IdentityError::InsufficientSeedLength { actual: 40, required: 56 })
        ));

        assert!(generate(&alice(), &[0u8; 56], &KeyParams::default()).is_ok());
    }

    #[test]
    fn test_self_signature_binds_user_id() {
        let identity = generate(&alice(), &ZERO_SEED, &KeyParams::default()).unwrap();
        let public = identity.public();
        assert!(public.verify_self_signature().is_ok());

        let forged = PublicIdentity::from_parts(
            "Mallory <mallory@example.com>".into(),
            *public.params(),
            *public.certification_key(),
            *public.encryption_key(),
            *public.self_signature(),
        );
        assert!(matches!(forged, Err(IdentityError::SignatureVerificationFailed)));
    }

    #[test]
    fn test_certify_rejects_foreign_key() {
        let identity = generate(&alice(), &ZERO_SEED, &KeyParams::default()).unwrap();
        let stranger = CertificationKeyPair::from_bytes(&[42u8; 32]);

        let unsigned = UnsignedIdentity::new(
            alice().to_string(),
            KeyParams::default(),
            *identity.public().certification_key(),
            *identity.public().encryption_key(),
        );
        assert!(matches!(
            unsigned.certify(&stranger),
            Err(IdentityError::SelfCertificationFailed(_))
        ));
    }

    #[test]
    fn test_from_seed_phrase() {
        let phrase = "abandon abandon abandon abandon abandon abandon abandon abandon \
                      abandon abandon abandon about";
        let params = KeyParams::default();
        let a = Identity::from_seed_phrase(phrase, Some("pass"), &alice(), &params).unwrap();
        let b = Identity::from_seed_phrase(phrase, Some("pass"), &alice(), &params).unwrap();
        let c = Identity::from_seed_phrase(phrase, None, &alice(), &params).unwrap();

        assert_eq!(a.public(), b.public());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert!(Identity::from_seed_phrase("not a phrase", None, &alice(), &params).is_err());
    }

    #[test]
    fn test_from_parts_rejects_mismatched_secret() {
        let identity = generate(&alice(), &ZERO_SEED, &KeyParams::default()).unwrap();
        let result = Identity::from_parts(
            identity.public().clone(),
            identity.certification_keys().clone(),
            EncryptionKeyPair::from_bytes([3u8; 32]),
        );

        assert!(matches!(result, Err(IdentityError::MalformedKeyMaterial(_))));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let identity = generate(&alice(), &ZERO_SEED, &KeyParams::default()).unwrap();
        let shown = format!("{identity:?}");

        assert!(shown.contains("Alice"));
        assert!(!shown.contains("signing_key"));
    }
}
