//! Cryptography Module - hybrid envelope encryption for kilid identities
//!
//! Wraps a fresh session key to the recipient's X25519 subkey and seals the
//! payload in authenticated chunks. Also hosts the ASCII armor and key
//! fingerprint helpers shared with the identity codec.

pub mod armor;
pub mod encryption;
pub mod envelope;
mod hashing;

pub use encryption::{SessionKey, SymmetricAlgorithm, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use envelope::EnvelopeCipher;
pub use hashing::{Fingerprint, KeyId, KeyRole};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Input is empty")]
    EmptyInput,

    #[error("Key ring contains no usable keys")]
    EmptyKeyRing,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
