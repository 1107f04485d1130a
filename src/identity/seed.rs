//! BIP39 Seed Phrase
//!
//! Generates, parses and validates mnemonic phrases, and turns them into the
//! 64-byte seed that feeds the entropy stream.

use super::IdentityError;
use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::Zeroizing;

/// Word count used when none is configured (256 bits of entropy)
pub const DEFAULT_WORD_COUNT: usize = 24;

/// Wrapper around BIP39 mnemonic
pub struct SeedPhrase {
    mnemonic: Mnemonic,
}

impl SeedPhrase {
    /// Generate a new random seed phrase with the given word count
    pub fn generate(word_count: usize) -> Result<Self, IdentityError> {
        let entropy_bits = match word_count {
            12 => 128,
            15 => 160,
            18 => 192,
            21 => 224,
            24 => 256,
            _ => {
                return Err(IdentityError::InvalidSeedPhrase(
                    "Word count must be 12, 15, 18, 21, or 24".to_string(),
                ))
            }
        };

        let mut entropy = Zeroizing::new(vec![0u8; entropy_bits / 8]);
        rand::thread_rng().fill_bytes(&mut entropy);

        Self::from_entropy(&entropy)
    }

    /// Build the phrase that encodes raw entropy bytes
    pub fn from_entropy(entropy: &[u8]) -> Result<Self, IdentityError> {
        let mnemonic = Mnemonic::from_entropy(entropy)
            .map_err(|e| IdentityError::InvalidSeedPhrase(e.to_string()))?;

        Ok(Self { mnemonic })
    }

    /// Parse an existing seed phrase
    pub fn from_phrase(phrase: &str) -> Result<Self, IdentityError> {
        let mnemonic = Mnemonic::parse_normalized(&normalize(phrase))
            .map_err(|e| IdentityError::InvalidSeedPhrase(e.to_string()))?;

        Ok(Self { mnemonic })
    }

    /// Convert to seed bytes (512 bits) using optional passphrase
    pub fn to_seed(&self, passphrase: &str) -> Zeroizing<[u8; 64]> {
        Zeroizing::new(self.mnemonic.to_seed(passphrase))
    }

    /// Recover the entropy this phrase encodes
    pub fn to_entropy(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.mnemonic.to_entropy())
    }

    /// Get the mnemonic words as a string
    pub fn phrase(&self) -> Zeroizing<String> {
        Zeroizing::new(self.mnemonic.to_string())
    }

    /// Get individual words
    pub fn words(&self) -> Vec<&'static str> {
        self.mnemonic.words().collect()
    }

    pub fn word_count(&self) -> usize {
        self.mnemonic.word_count()
    }

    /// Validate a seed phrase without creating an instance
    pub fn validate(phrase: &str) -> bool {
        Mnemonic::parse_normalized(&normalize(phrase)).is_ok()
    }

    /// Whether a single word is in the English word list
    pub fn is_known_word(word: &str) -> bool {
        Language::English.find_word(word).is_some()
    }
}

fn normalize(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
