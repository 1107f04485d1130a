//! Deterministic entropy stream
//!
//! Expands a fixed-length seed into an unbounded pseudorandom byte stream
//! using the XChaCha20 keystream. The same seed always yields the same bytes
//! at the same offset, on every platform.

use super::IdentityError;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::{Key, XChaCha20, XNonce};
use rand_core::{CryptoRng, RngCore};
use std::io;
use thiserror::Error;

/// Bytes of seed used as the stream cipher key
pub const SEED_KEY_LEN: usize = 32;

/// Bytes of seed used as the stream cipher nonce
pub const SEED_NONCE_LEN: usize = 24;

/// Minimum seed length accepted by [`EntropyStream::new`]
pub const MIN_SEED_LEN: usize = SEED_KEY_LEN + SEED_NONCE_LEN;

#[derive(Error, Debug)]
#[error("entropy keystream exhausted")]
struct KeystreamExhausted;

/// Unbounded deterministic randomness keyed from a seed.
///
/// Not `Clone`: one stream feeds exactly one key generation.
pub struct EntropyStream {
    cipher: XChaCha20,
}

impl EntropyStream {
    /// Create a stream from `seed[0..32]` (key) and `seed[32..56]` (nonce).
    /// Bytes past the first 56 are ignored.
    pub fn new(seed: &[u8]) -> Result<Self, IdentityError> {
        if seed.len() < MIN_SEED_LEN {
            return Err(IdentityError::InsufficientSeedLength {
                actual: seed.len(),
                required: MIN_SEED_LEN,
            });
        }

        let key = Key::from_slice(&seed[..SEED_KEY_LEN]);
        let nonce = XNonce::from_slice(&seed[SEED_KEY_LEN..MIN_SEED_LEN]);

        Ok(Self {
            cipher: XChaCha20::new(key, nonce),
        })
    }

    /// Read the next `n` bytes of the stream
    pub fn next_bytes(&mut self, n: usize) -> Result<Vec<u8>, IdentityError> {
        let mut bytes = vec![0u8; n];
        self.try_fill_bytes(&mut bytes)
            .map_err(|e| IdentityError::KeyGenerationFailed(e.to_string()))?;
        Ok(bytes)
    }

    /// Number of keystream bytes consumed so far
    pub fn position(&self) -> u64 {
        self.cipher.current_pos::<u64>()
    }
}

impl RngCore for EntropyStream {
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        // RngCore has no error channel here; exhaustion needs 256 GiB of reads.
        if let Err(err) = self.try_fill_bytes(dest) {
            panic!("{err}");
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        // Keystream XOR zeroes is the keystream itself.
        dest.fill(0);
        self.cipher
            .try_apply_keystream(dest)
            .map_err(|_| rand_core::Error::new(KeystreamExhausted))
    }
}

impl CryptoRng for EntropyStream {}

impl io::Read for EntropyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_fill_bytes(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn seed(byte: u8) -> [u8; 64] {
        [byte; 64]
    }

    #[test]
    fn test_rejects_short_seed() {
        let result = EntropyStream::new(&[0u8; 55]);
        assert!(matches!(
            result,
            Err(IdentityError::InsufficientSeedLength { actual: 55, required: 56 })
        ));

        assert!(EntropyStream::new(&[0u8; 56]).is_ok());
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = EntropyStream::new(&seed(7)).unwrap();
        let mut b = EntropyStream::new(&seed(7)).unwrap();

        assert_eq!(a.next_bytes(1000).unwrap(), b.next_bytes(1000).unwrap());
    }

    #[test]
    fn test_read_size_does_not_change_output() {
        let mut whole = EntropyStream::new(&seed(3)).unwrap();
        let expected = whole.next_bytes(300).unwrap();

        let mut pieces = EntropyStream::new(&seed(3)).unwrap();
        let mut actual = Vec::new();
        for size in [1, 63, 64, 65, 7, 100] {
            actual.extend(pieces.next_bytes(size).unwrap());
        }

        assert_eq!(expected, actual);
        assert_eq!(pieces.position(), 300);
    }

    #[test]
    fn test_trailing_seed_bytes_ignored() {
        let mut short = EntropyStream::new(&[9u8; 56]).unwrap();
        let mut long = [9u8; 64];
        long[60] = 0xff;
        let mut long = EntropyStream::new(&long).unwrap();

        assert_eq!(short.next_bytes(64).unwrap(), long.next_bytes(64).unwrap());
    }

    #[test]
    fn test_key_and_nonce_both_matter() {
        let base = seed(0);
        let mut key_changed = base;
        key_changed[0] ^= 1;
        let mut nonce_changed = base;
        nonce_changed[40] ^= 1;

        let out = |s: &[u8]| EntropyStream::new(s).unwrap().next_bytes(64).unwrap();

        assert_ne!(out(&base), out(&key_changed));
        assert_ne!(out(&base), out(&nonce_changed));
    }

    #[test]
    fn test_io_read_never_ends() {
        let mut stream = EntropyStream::new(&seed(1)).unwrap();
        let mut buf = [0u8; 4096];
        for _ in 0..16 {
            assert_eq!(stream.read(&mut buf).unwrap(), buf.len());
        }
        assert_eq!(stream.position(), 16 * 4096);
    }

    #[test]
    fn test_rng_interface_matches_stream() {
        let mut rng = EntropyStream::new(&seed(5)).unwrap();
        let mut raw = EntropyStream::new(&seed(5)).unwrap();

        let word = rng.next_u64();
        let bytes = raw.next_bytes(8).unwrap();
        assert_eq!(word, u64::from_le_bytes(bytes.try_into().unwrap()));
    }
}
