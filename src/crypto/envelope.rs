//! Hybrid envelopes
//!
//! A fresh session key is wrapped to the recipient's X25519 subkey through an
//! ephemeral key agreement, then the payload is sealed chunk by chunk.
//!
//! Layout: `"KLDENV" | version (u8) | header_len (u16 BE) | header | chunks`.
//! The framed header is the associated data of every chunk.

use super::armor::{self, ArmorKind};
use super::encryption::{
    ChunkOpener, ChunkSealer, Opened, SessionKey, SymmetricAlgorithm, DEFAULT_CHUNK_SIZE,
    KEY_SIZE, MAX_CHUNK_SIZE, NONCE_PREFIX_SIZE, TAG_SIZE,
};
use super::{CryptoError, KeyId};
use crate::identity::{Identity, PublicIdentity, PublicKeyRing, SecretKeyRing};
use crate::KilidConfig;
use bincode::Options;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::io::{self, Read, Write};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroizing;

const MAGIC: &[u8; 6] = b"KLDENV";
const ENVELOPE_VERSION: u8 = 1;
const PREAMBLE_LEN: usize = MAGIC.len() + 1 + 2;
const MAX_HEADER_LEN: usize = 1024;

const WRAP_INFO: &[u8] = b"kilid/v1/session-key-wrap";
const WRAPPED_KEY_LEN: usize = KEY_SIZE + TAG_SIZE;
// wrap keys are single-use
const WRAP_NONCE: [u8; 12] = [0u8; 12];

#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeHeader {
    recipient: KeyId,
    ephemeral_key: [u8; 32],
    wrapped_key: Vec<u8>,
    cipher: SymmetricAlgorithm,
    chunk_size: u32,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

fn header_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_HEADER_LEN as u64)
        .reject_trailing_bytes()
}

fn malformed(msg: impl Into<String>) -> CryptoError {
    CryptoError::MalformedEnvelope(msg.into())
}

/// Serialize the header behind its preamble
fn frame_header(header: &EnvelopeHeader) -> Result<Vec<u8>, CryptoError> {
    let body = header_options()
        .serialize(header)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut framed = Vec::with_capacity(PREAMBLE_LEN + body.len());
    framed.extend_from_slice(MAGIC);
    framed.push(ENVELOPE_VERSION);
    framed.extend_from_slice(&(body.len() as u16).to_be_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Read and validate the framed header. Returns it with its raw bytes.
fn read_header<R: Read>(reader: &mut R) -> Result<(EnvelopeHeader, Vec<u8>), CryptoError> {
    let mut preamble = [0u8; PREAMBLE_LEN];
    match read_full(reader, &mut preamble)? {
        0 => return Err(CryptoError::EmptyInput),
        PREAMBLE_LEN => {}
        _ => return Err(malformed("truncated preamble")),
    }

    if &preamble[..MAGIC.len()] != MAGIC {
        return Err(malformed("not a kilid envelope"));
    }
    if preamble[MAGIC.len()] != ENVELOPE_VERSION {
        return Err(malformed(format!(
            "unsupported envelope version {}",
            preamble[MAGIC.len()]
        )));
    }

    let header_len =
        u16::from_be_bytes([preamble[PREAMBLE_LEN - 2], preamble[PREAMBLE_LEN - 1]]) as usize;
    if header_len == 0 || header_len > MAX_HEADER_LEN {
        return Err(malformed(format!("invalid header length {header_len}")));
    }

    let mut framed = vec![0u8; PREAMBLE_LEN + header_len];
    framed[..PREAMBLE_LEN].copy_from_slice(&preamble);
    if read_full(reader, &mut framed[PREAMBLE_LEN..])? != header_len {
        return Err(malformed("truncated header"));
    }

    let header: EnvelopeHeader = header_options()
        .deserialize(&framed[PREAMBLE_LEN..])
        .map_err(|e| malformed(e.to_string()))?;

    if header.chunk_size == 0 || header.chunk_size as usize > MAX_CHUNK_SIZE {
        return Err(malformed(format!("invalid chunk size {}", header.chunk_size)));
    }
    if header.wrapped_key.len() != WRAPPED_KEY_LEN {
        return Err(malformed("wrapped session key has the wrong length"));
    }
    Ok((header, framed))
}

fn derive_wrap_key(
    shared_secret: &[u8; 32],
    ephemeral_key: &[u8; 32],
    recipient_key: &[u8; 32],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, hkdf::InvalidLength> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_key);
    salt[32..].copy_from_slice(recipient_key);

    let hk = Hkdf::<Sha256>::new(Some(&salt[..]), shared_secret);
    let mut wrap_key = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(WRAP_INFO, &mut wrap_key[..])?;
    Ok(wrap_key)
}

fn wrap_session_key<G: RngCore + CryptoRng>(
    rng: &mut G,
    recipient: &PublicIdentity,
    session_key: &SessionKey,
) -> Result<([u8; 32], Vec<u8>), CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(&mut *rng);
    let ephemeral_key = X25519PublicKey::from(&ephemeral).to_bytes();

    let shared = ephemeral.diffie_hellman(recipient.encryption_key());
    if !shared.was_contributory() {
        return Err(CryptoError::EncryptionFailed(
            "recipient encryption key is degenerate".into(),
        ));
    }

    let wrap_key = derive_wrap_key(
        shared.as_bytes(),
        &ephemeral_key,
        recipient.encryption_key().as_bytes(),
    )
    .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let recipient_id = recipient.encryption_key_id();
    let wrapped = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&wrap_key[..]))
        .encrypt(
            chacha20poly1305::Nonce::from_slice(&WRAP_NONCE),
            Payload {
                msg: session_key.as_bytes(),
                aad: recipient_id.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed("session key wrap failed".into()))?;

    Ok((ephemeral_key, wrapped))
}

fn unwrap_session_key(
    identity: &Identity,
    header: &EnvelopeHeader,
) -> Result<SessionKey, CryptoError> {
    let shared = identity
        .encryption_keys()
        .diffie_hellman(&X25519PublicKey::from(header.ephemeral_key));
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionFailed(
            "ephemeral key is degenerate".into(),
        ));
    }

    let wrap_key = derive_wrap_key(
        shared.as_bytes(),
        &header.ephemeral_key,
        identity.public().encryption_key().as_bytes(),
    )
    .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    let plain = Zeroizing::new(
        ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&wrap_key[..]))
            .decrypt(
                chacha20poly1305::Nonce::from_slice(&WRAP_NONCE),
                Payload {
                    msg: &header.wrapped_key,
                    aad: header.recipient.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed("session key unwrap failed".into()))?,
    );

    let key: [u8; KEY_SIZE] = plain.as_slice().try_into().map_err(|_| {
        CryptoError::DecryptionFailed("unwrapped session key has the wrong length".into())
    })?;
    Ok(SessionKey::from_bytes(key))
}

/// Fill `buf` from `reader` until it is full or the reader is exhausted
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encrypts to and decrypts from kilid identities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeCipher {
    chunk_size: usize,
    cipher: Option<SymmetricAlgorithm>,
}

impl Default for EnvelopeCipher {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            cipher: None,
        }
    }
}

impl EnvelopeCipher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plaintext bytes per chunk, clamped to `1..=MAX_CHUNK_SIZE`
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Use `cipher` instead of the recipient's preferred cipher
    pub fn with_cipher(mut self, cipher: SymmetricAlgorithm) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn from_config(config: &KilidConfig) -> Self {
        let envelope = Self::new().with_chunk_size(config.chunk_size);
        match config.cipher {
            Some(cipher) => envelope.with_cipher(cipher),
            None => envelope,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encrypt to the first key of `recipients` using OS randomness
    pub fn encrypt(
        &self,
        recipients: &PublicKeyRing,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.encrypt_with_rng(&mut OsRng, recipients, plaintext)
    }

    pub fn encrypt_with_rng<G: RngCore + CryptoRng>(
        &self,
        rng: &mut G,
        recipients: &PublicKeyRing,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let chunks = plaintext.len() / self.chunk_size + 1;
        let mut out = Vec::with_capacity(PREAMBLE_LEN + 128 + plaintext.len() + chunks * TAG_SIZE);
        self.encrypt_stream_with_rng(rng, recipients, plaintext, &mut out)?;
        Ok(out)
    }

    /// Encrypt and wrap the envelope in `KILID MESSAGE` armor
    pub fn encrypt_armored(
        &self,
        recipients: &PublicKeyRing,
        plaintext: &[u8],
    ) -> Result<String, CryptoError> {
        let envelope = self.encrypt(recipients, plaintext)?;
        Ok(armor::encode(ArmorKind::Message, &envelope))
    }

    /// Stream `reader` into an envelope written to `writer`. Returns the
    /// number of plaintext bytes consumed.
    pub fn encrypt_stream<R: Read, W: Write>(
        &self,
        recipients: &PublicKeyRing,
        reader: R,
        writer: W,
    ) -> Result<u64, CryptoError> {
        self.encrypt_stream_with_rng(&mut OsRng, recipients, reader, writer)
    }

    pub fn encrypt_stream_with_rng<G, R, W>(
        &self,
        rng: &mut G,
        recipients: &PublicKeyRing,
        mut reader: R,
        mut writer: W,
    ) -> Result<u64, CryptoError>
    where
        G: RngCore + CryptoRng,
        R: Read,
        W: Write,
    {
        let recipient = recipients.first().ok_or(CryptoError::EmptyKeyRing)?;
        let algorithm = self.cipher.unwrap_or(recipient.params().preferred_cipher);

        let session_key = SessionKey::generate(rng);
        let (ephemeral_key, wrapped_key) = wrap_session_key(rng, recipient, &session_key)?;
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        rng.fill_bytes(&mut nonce_prefix);

        let header = EnvelopeHeader {
            recipient: recipient.encryption_key_id(),
            ephemeral_key,
            wrapped_key,
            cipher: algorithm,
            chunk_size: self.chunk_size as u32,
            nonce_prefix,
        };
        tracing::debug!("Sealing envelope for {} with {}", header.recipient, algorithm);

        let framed = frame_header(&header)?;
        writer.write_all(&framed)?;
        let mut sealer = ChunkSealer::new(algorithm, &session_key, nonce_prefix, framed);

        let mut current = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut next = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut current_len = read_full(&mut reader, &mut current[..])?;
        let mut total = 0u64;

        loop {
            // a short read means the input ended inside this chunk
            let next_len = if current_len == self.chunk_size {
                read_full(&mut reader, &mut next[..])?
            } else {
                0
            };
            let last = next_len == 0;

            writer.write_all(&sealer.seal_next(&current[..current_len], last)?)?;
            total += current_len as u64;

            if last {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
        }
        writer.flush()?;

        tracing::debug!("Sealed {} bytes in {} chunk(s)", total, sealer.chunks_sealed());
        Ok(total)
    }

    /// Decrypt a binary or armored envelope with the matching key of `keys`
    pub fn decrypt(&self, keys: &SecretKeyRing, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Err(CryptoError::EmptyInput);
        }

        let mut plaintext = Vec::with_capacity(data.len());
        if armor::is_armored(data) {
            let text =
                std::str::from_utf8(data).map_err(|_| malformed("armored text is not UTF-8"))?;
            let binary = armor::decode(ArmorKind::Message, text)
                .map_err(|e| malformed(e.to_string()))?;
            self.decrypt_stream(keys, binary.as_slice(), &mut plaintext)?;
        } else {
            self.decrypt_stream(keys, data, &mut plaintext)?;
        }
        Ok(plaintext)
    }

    /// Decrypt a binary envelope from `reader` into `writer`. Returns the
    /// number of plaintext bytes written.
    ///
    /// Chunks are written as they authenticate. On error the output may hold
    /// a prefix of the plaintext and must be discarded.
    pub fn decrypt_stream<R: Read, W: Write>(
        &self,
        keys: &SecretKeyRing,
        mut reader: R,
        mut writer: W,
    ) -> Result<u64, CryptoError> {
        if keys.is_empty() {
            return Err(CryptoError::EmptyKeyRing);
        }

        let (header, framed) = read_header(&mut reader)?;
        let identity = keys.find_by_encryption_key(&header.recipient).ok_or_else(|| {
            tracing::warn!("No key in ring for envelope recipient {}", header.recipient);
            CryptoError::DecryptionFailed(format!("no key for recipient {}", header.recipient))
        })?;
        tracing::debug!(
            "Opening envelope for {} with {}, chunk size {}",
            header.recipient,
            header.cipher,
            header.chunk_size
        );

        let session_key = unwrap_session_key(identity, &header)?;
        let mut opener = ChunkOpener::new(header.cipher, &session_key, header.nonce_prefix, framed);

        let sealed_size = header.chunk_size as usize + TAG_SIZE;
        let mut current = vec![0u8; sealed_size];
        let mut next = vec![0u8; sealed_size];
        let mut current_len = read_full(&mut reader, &mut current)?;
        let mut total = 0u64;
        let mut chunks = 0u64;

        loop {
            if current_len < TAG_SIZE {
                return Err(malformed(format!("chunk {chunks} is shorter than its tag")));
            }

            let next_len = if current_len == sealed_size {
                read_full(&mut reader, &mut next)?
            } else {
                0
            };
            let last = next_len == 0;

            match opener.open_next(&current[..current_len], last)? {
                Opened::Chunk(plain) => {
                    let plain = Zeroizing::new(plain);
                    writer.write_all(&plain)?;
                    total += plain.len() as u64;
                }
                Opened::Truncated => {
                    return Err(malformed("payload ends before its final chunk"));
                }
                Opened::Trailing => {
                    return Err(malformed("trailing data after final chunk"));
                }
            }
            chunks += 1;

            if last {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
        }
        writer.flush()?;

        tracing::debug!("Opened {} bytes in {} chunk(s)", total, chunks);
        Ok(total)
    }
}
