//! Kilid Core - deterministic identities from seed phrases
//!
//! This crate turns a BIP39 seed phrase into a reproducible, self-certified
//! keypair and uses it to encrypt and decrypt data for a recipient.
//! Identities export to armored text and can be re-imported in another
//! process.

pub mod crypto;
pub mod identity;
pub mod logging;
pub mod ops;

use crypto::{EnvelopeCipher, SymmetricAlgorithm, MAX_CHUNK_SIZE};
use identity::KeyParams;
use std::path::Path;
use thiserror::Error;

/// Main error type for kilid operations
#[derive(Error, Debug)]
pub enum KilidError {
    #[error("Identity error: {0}")]
    Identity(#[from] identity::IdentityError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KilidError>;

/// Core configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct KilidConfig {
    /// Parameters bound into generated identities
    pub key_params: KeyParams,

    /// Words in freshly generated seed phrases
    pub word_count: usize,

    /// Plaintext bytes per envelope chunk
    pub chunk_size: usize,

    /// Payload cipher. `None` follows the recipient's preference.
    pub cipher: Option<SymmetricAlgorithm>,

    /// Write encrypted files as armored text.
    ///
    /// Armored envelopes are built and read in memory, so file size is
    /// bounded by available memory. Binary envelopes stream chunk by chunk.
    pub armor: bool,

    /// Directory that receives generated key files
    pub output_dir: String,
}

impl Default for KilidConfig {
    fn default() -> Self {
        Self {
            key_params: KeyParams::default(),
            word_count: identity::DEFAULT_WORD_COUNT,
            chunk_size: crypto::DEFAULT_CHUNK_SIZE, // 64 KiB
            cipher: None,
            armor: false,
            output_dir: "./keys".to_string(),
        }
    }
}

impl KilidConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| KilidError::Config(format!("{}: {}", path.display(), e)))?;

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if ![12, 15, 18, 21, 24].contains(&self.word_count) {
            return Err(KilidError::Config(format!(
                "word_count must be 12, 15, 18, 21 or 24, got {}",
                self.word_count
            )));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(KilidError::Config(format!(
                "chunk_size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        if self.output_dir.trim().is_empty() {
            return Err(KilidError::Config("output_dir is empty".into()));
        }
        Ok(())
    }

    /// Envelope cipher configured from these settings
    pub fn envelope(&self) -> EnvelopeCipher {
        EnvelopeCipher::from_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = KilidConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.word_count, 24);
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.envelope().chunk_size(), 65536);
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{ "word_count": 12, "cipher": "chacha20-poly1305", "key_params": {{ "created_at": 1700000000 }} }}"#
        )
        .unwrap();

        let config = KilidConfig::load(file.path()).unwrap();
        assert_eq!(config.word_count, 12);
        assert_eq!(config.cipher, Some(SymmetricAlgorithm::ChaCha20Poly1305));
        assert_eq!(config.key_params.created_at, 1_700_000_000);
        assert_eq!(config.key_params.preferred_cipher, SymmetricAlgorithm::Aes256Gcm);
        assert_eq!(config.output_dir, "./keys");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = KilidConfig {
            word_count: 13,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(KilidError::Config(_))));

        let config = KilidConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(KilidError::Config(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(KilidConfig::load(file.path()), Err(KilidError::Config(_))));
    }
}
