//! Key pairs drawn from the entropy stream

use super::entropy::EntropyStream;
use super::IdentityError;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::RngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

fn draw_secret(stream: &mut EntropyStream) -> Result<Zeroizing<[u8; 32]>, IdentityError> {
    let mut secret = Zeroizing::new([0u8; 32]);
    stream
        .try_fill_bytes(&mut secret[..])
        .map_err(|e| IdentityError::KeyGenerationFailed(e.to_string()))?;
    Ok(secret)
}

/// Ed25519 primary key pair, used only to certify the identity
#[derive(Clone)]
pub struct CertificationKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl CertificationKeyPair {
    /// Create a key pair from raw secret bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Draw the next 32 stream bytes as the secret key
    pub fn generate(stream: &mut EntropyStream) -> Result<Self, IdentityError> {
        let secret = draw_secret(stream)?;
        Ok(Self::from_bytes(&secret))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Get the secret key bytes
    pub fn secret_key_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Result<Signature, IdentityError> {
        self.signing_key
            .try_sign(message)
            .map_err(|e| IdentityError::SelfCertificationFailed(e.to_string()))
    }
}

/// X25519 subkey pair, receives wrapped session keys
#[derive(Clone)]
pub struct EncryptionKeyPair {
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl EncryptionKeyPair {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Draw the next 32 stream bytes as the secret key
    pub fn generate(stream: &mut EntropyStream) -> Result<Self, IdentityError> {
        let secret = draw_secret(stream)?;
        let pair = Self::from_bytes(*secret);

        if pair.public.as_bytes().iter().all(|&b| b == 0) {
            return Err(IdentityError::KeyGenerationFailed(
                "degenerate X25519 public key".into(),
            ));
        }
        Ok(pair)
    }

    pub fn public_key(&self) -> &X25519PublicKey {
        &self.public
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn secret_key_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub fn diffie_hellman(&self, their_public: &X25519PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(their_public)
    }
}
