//! Chunked payload encryption
//!
//! Payloads are split into fixed-size chunks, each sealed with an AEAD under
//! a per-message session key. The nonce of chunk `i` is
//! `prefix (7) || i (u32 BE) || last (u8)`, so chunks cannot be reordered,
//! dropped or appended without failing authentication.

use super::CryptoError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_SIZE: usize = 32;
pub const TAG_SIZE: usize = 16;
pub const NONCE_PREFIX_SIZE: usize = 7;
const NONCE_SIZE: usize = 12;

/// Default plaintext bytes per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest chunk size accepted when reading an envelope
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Symmetric AEAD used for the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SymmetricAlgorithm {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl SymmetricAlgorithm {
    /// Stable numeric id, bound into self-signatures
    pub fn id(self) -> u8 {
        match self {
            SymmetricAlgorithm::Aes256Gcm => 1,
            SymmetricAlgorithm::ChaCha20Poly1305 => 2,
        }
    }
}

impl std::fmt::Display for SymmetricAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymmetricAlgorithm::Aes256Gcm => write!(f, "AES-256-GCM"),
            SymmetricAlgorithm::ChaCha20Poly1305 => write!(f, "ChaCha20-Poly1305"),
        }
    }
}

/// Per-message symmetric key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Draw a fresh key from `rng`
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut key = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

enum ChunkCipher {
    Aes(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

impl ChunkCipher {
    fn new(algorithm: SymmetricAlgorithm, key: &SessionKey) -> Self {
        match algorithm {
            SymmetricAlgorithm::Aes256Gcm => ChunkCipher::Aes(Box::new(Aes256Gcm::new(
                aes_gcm::Key::<Aes256Gcm>::from_slice(key.as_bytes()),
            ))),
            SymmetricAlgorithm::ChaCha20Poly1305 => ChunkCipher::ChaCha(Box::new(
                ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.as_bytes())),
            )),
        }
    }

    fn seal(&self, nonce: &[u8; NONCE_SIZE], msg: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
        let payload = Payload { msg, aad };
        match self {
            ChunkCipher::Aes(c) => c.encrypt(aes_gcm::Nonce::from_slice(nonce), payload).ok(),
            ChunkCipher::ChaCha(c) => c
                .encrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
                .ok(),
        }
    }

    fn open(&self, nonce: &[u8; NONCE_SIZE], msg: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
        let payload = Payload { msg, aad };
        match self {
            ChunkCipher::Aes(c) => c.decrypt(aes_gcm::Nonce::from_slice(nonce), payload).ok(),
            ChunkCipher::ChaCha(c) => c
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
                .ok(),
        }
    }
}

fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], counter: u32, last: bool) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..NONCE_SIZE - 1].copy_from_slice(&counter.to_be_bytes());
    nonce[NONCE_SIZE - 1] = u8::from(last);
    nonce
}

/// Seals consecutive chunks of one payload
pub struct ChunkSealer {
    cipher: ChunkCipher,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u32,
    aad: Vec<u8>,
    finished: bool,
}

impl ChunkSealer {
    /// `aad` is authenticated with every chunk
    pub fn new(
        algorithm: SymmetricAlgorithm,
        key: &SessionKey,
        nonce_prefix: [u8; NONCE_PREFIX_SIZE],
        aad: Vec<u8>,
    ) -> Self {
        Self {
            cipher: ChunkCipher::new(algorithm, key),
            nonce_prefix,
            counter: 0,
            aad,
            finished: false,
        }
    }

    /// Seal the next chunk. After the last chunk the sealer refuses more input.
    pub fn seal_next(&mut self, chunk: &[u8], last: bool) -> Result<Vec<u8>, CryptoError> {
        if self.finished {
            return Err(CryptoError::EncryptionFailed("payload already finalized".into()));
        }

        let nonce = chunk_nonce(&self.nonce_prefix, self.counter, last);
        let sealed = self
            .cipher
            .seal(&nonce, chunk, &self.aad)
            .ok_or_else(|| CryptoError::EncryptionFailed(format!("chunk {}", self.counter)))?;

        if last {
            self.finished = true;
        } else {
            self.counter = self.counter.checked_add(1).ok_or_else(|| {
                CryptoError::EncryptionFailed("payload exceeds chunk counter range".into())
            })?;
        }
        Ok(sealed)
    }

    /// Chunks sealed so far
    pub fn chunks_sealed(&self) -> u64 {
        u64::from(self.counter) + u64::from(self.finished)
    }
}

/// Result of opening a chunk
pub enum Opened {
    Chunk(Vec<u8>),
    /// The chunk authenticates only as a non-final chunk, so the payload was
    /// cut short
    Truncated,
    /// The chunk authenticates only as the final chunk, yet more data follows
    Trailing,
}

/// Opens consecutive chunks of one payload
pub struct ChunkOpener {
    cipher: ChunkCipher,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u32,
    aad: Vec<u8>,
}

impl ChunkOpener {
    pub fn new(
        algorithm: SymmetricAlgorithm,
        key: &SessionKey,
        nonce_prefix: [u8; NONCE_PREFIX_SIZE],
        aad: Vec<u8>,
    ) -> Self {
        Self {
            cipher: ChunkCipher::new(algorithm, key),
            nonce_prefix,
            counter: 0,
            aad,
        }
    }

    /// Open the next chunk. When it fails, the chunk is retried with the
    /// opposite final flag to tell truncation and trailing data apart from
    /// tampering.
    pub fn open_next(&mut self, sealed: &[u8], last: bool) -> Result<Opened, CryptoError> {
        let nonce = chunk_nonce(&self.nonce_prefix, self.counter, last);
        if let Some(plain) = self.cipher.open(&nonce, sealed, &self.aad) {
            self.counter = self.counter.wrapping_add(1);
            return Ok(Opened::Chunk(plain));
        }

        let flipped = chunk_nonce(&self.nonce_prefix, self.counter, !last);
        match self.cipher.open(&flipped, sealed, &self.aad) {
            Some(_) if last => Ok(Opened::Truncated),
            Some(_) => Ok(Opened::Trailing),
            None => Err(self.auth_failure()),
        }
    }

    fn auth_failure(&self) -> CryptoError {
        CryptoError::DecryptionFailed(format!("chunk {} failed authentication", self.counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn pair(algorithm: SymmetricAlgorithm) -> (ChunkSealer, ChunkOpener) {
        let key = SessionKey::generate(&mut OsRng);
        let prefix = [9u8; NONCE_PREFIX_SIZE];
        (
            ChunkSealer::new(algorithm, &key, prefix, b"header".to_vec()),
            ChunkOpener::new(algorithm, &key, prefix, b"header".to_vec()),
        )
    }

    fn open(opener: &mut ChunkOpener, sealed: &[u8], last: bool) -> Vec<u8> {
        match opener.open_next(sealed, last).unwrap() {
            Opened::Chunk(plain) => plain,
            Opened::Truncated | Opened::Trailing => panic!("unexpected framing"),
        }
    }

    #[test]
    fn test_seal_open_both_algorithms() {
        for algorithm in [SymmetricAlgorithm::Aes256Gcm, SymmetricAlgorithm::ChaCha20Poly1305] {
            let (mut sealer, mut opener) = pair(algorithm);

            let c0 = sealer.seal_next(b"first chunk", false).unwrap();
            let c1 = sealer.seal_next(b"last", true).unwrap();
            assert_eq!(c0.len(), b"first chunk".len() + TAG_SIZE);
            assert_eq!(sealer.chunks_sealed(), 2);

            assert_eq!(open(&mut opener, &c0, false), b"first chunk");
            assert_eq!(open(&mut opener, &c1, true), b"last");
        }
    }

    #[test]
    fn test_reordered_chunks_fail() {
        let (mut sealer, mut opener) = pair(SymmetricAlgorithm::Aes256Gcm);
        let _c0 = sealer.seal_next(b"a", false).unwrap();
        let c1 = sealer.seal_next(b"b", false).unwrap();

        assert!(matches!(
            opener.open_next(&c1, false),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_missing_final_chunk_detected() {
        let (mut sealer, mut opener) = pair(SymmetricAlgorithm::ChaCha20Poly1305);
        let c0 = sealer.seal_next(b"not the end", false).unwrap();

        assert!(matches!(opener.open_next(&c0, true), Ok(Opened::Truncated)));
    }

    #[test]
    fn test_final_chunk_read_as_inner() {
        let (mut sealer, mut opener) = pair(SymmetricAlgorithm::Aes256Gcm);
        let c0 = sealer.seal_next(b"the end", true).unwrap();

        assert!(matches!(opener.open_next(&c0, false), Ok(Opened::Trailing)));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = SessionKey::generate(&mut OsRng);
        let prefix = [0u8; NONCE_PREFIX_SIZE];
        let algorithm = SymmetricAlgorithm::Aes256Gcm;
        let mut sealer = ChunkSealer::new(algorithm, &key, prefix, b"a".to_vec());
        let mut opener = ChunkOpener::new(algorithm, &key, prefix, b"b".to_vec());

        let sealed = sealer.seal_next(b"data", true).unwrap();
        assert!(opener.open_next(&sealed, true).is_err());
    }

    #[test]
    fn test_sealer_refuses_after_last() {
        let (mut sealer, _) = pair(SymmetricAlgorithm::Aes256Gcm);
        sealer.seal_next(b"", true).unwrap();

        assert!(sealer.seal_next(b"more", false).is_err());
    }

    #[test]
    fn test_nonce_layout() {
        let nonce = chunk_nonce(&[1, 2, 3, 4, 5, 6, 7], 0x0A0B_0C0D, true);
        assert_eq!(nonce, [1, 2, 3, 4, 5, 6, 7, 0x0A, 0x0B, 0x0C, 0x0D, 1]);
    }
}
