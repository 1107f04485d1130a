//! End-to-end behaviour of key generation, export and envelopes.

use kilid_core::crypto::{CryptoError, EnvelopeCipher};
use kilid_core::identity::{
    codec, generate, Identity, IdentityError, KeyParams, PublicKeyRing, SecretKeyRing, SeedPhrase,
    UserId,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::HashSet;

fn alice() -> UserId {
    UserId::new("Alice", "alice@example.com")
}

fn identity_from(seed: &[u8]) -> Identity {
    generate(&alice(), seed, &KeyParams::default()).unwrap()
}

#[test]
fn zero_seed_generation_is_reproducible() {
    let first = identity_from(&[0u8; 56]).export().unwrap();
    let second = identity_from(&[0u8; 56]).export().unwrap();

    assert_eq!(*first.private, *second.private);
    assert_eq!(first.public, second.public);
}

#[test]
fn every_seed_bit_matters() {
    let base = identity_from(&[0u8; 56]).export().unwrap().public;
    let mut seen = HashSet::from([base]);

    for bit in 0..56 * 8 {
        let mut seed = [0u8; 56];
        seed[bit / 8] ^= 1 << (bit % 8);
        let flipped = identity_from(&seed).export().unwrap().public;
        assert!(seen.insert(flipped), "bit {bit} repeats an earlier public key");
    }
    assert_eq!(seen.len(), 56 * 8 + 1);
}

#[test]
fn codec_round_trip_is_exact() {
    let identity = identity_from(&[0x5au8; 64]);
    let exported = identity.export().unwrap();

    let public = codec::import_public(&exported.public).unwrap();
    assert_eq!(codec::export_public(&public).unwrap(), exported.public);

    let private = codec::import_private(&exported.private).unwrap();
    assert_eq!(*private.export().unwrap().private, *exported.private);
}

#[test]
fn envelope_round_trip_sizes() {
    let identity = identity_from(&[1u8; 64]);
    let recipients = PublicKeyRing::from(&identity);
    let keys = SecretKeyRing::from(&identity);
    let envelope = EnvelopeCipher::new();
    let mut rng = ChaCha20Rng::seed_from_u64(7);

    for len in [0usize, 13, 3 * 1024 * 1024 + 5] {
        let mut plaintext = vec![0u8; len];
        rng.fill_bytes(&mut plaintext);

        let sealed = envelope.encrypt(&recipients, &plaintext).unwrap();
        assert_eq!(envelope.decrypt(&keys, &sealed).unwrap(), plaintext);
    }
}

#[test]
fn wrong_private_key_is_rejected() {
    let a = identity_from(&[1u8; 64]);
    let b = identity_from(&[2u8; 64]);
    let envelope = EnvelopeCipher::new();

    let sealed = envelope.encrypt(&PublicKeyRing::from(&a), b"secret").unwrap();
    let result = envelope.decrypt(&SecretKeyRing::from(&b), &sealed);
    assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
}

#[test]
fn seed_length_threshold() {
    let short = generate(&alice(), &[0u8; 40], &KeyParams::default());
    assert!(matches!(
        short,
        Err(IdentityError::InsufficientSeedLength {
            actual: 40,
            required: 56
        })
    ));

    assert!(generate(&alice(), &[0u8; 56], &KeyParams::default()).is_ok());
}

#[test]
fn bip39_zero_entropy_vector() {
    let phrase = SeedPhrase::from_entropy(&[0u8; 32]).unwrap();
    let words = phrase.words();
    assert_eq!(words.len(), 24);
    assert!(words[..23].iter().all(|w| *w == "abandon"));
    assert_eq!(words[23], "art");

    let parsed = SeedPhrase::from_phrase(&phrase.phrase()).unwrap();
    assert_eq!(*parsed.to_entropy(), vec![0u8; 32]);

    let seed = parsed.to_seed("TREZOR");
    assert_eq!(
        hex::encode(seed.as_slice()),
        "bda85446c68413707090a52022edd26a1c9462295029f2e60cd7c4f2bbd3097170af7a4d73245caf\
         a9c3cca8d561a7c3de6f5d4a10be8ed2a5e608d68f92fcc8"
    );
}

#[test]
fn armored_message_between_processes() {
    let phrase = SeedPhrase::from_entropy(&[9u8; 16]).unwrap();
    let params = KeyParams::default();
    let sender_side = Identity::from_seed_phrase(&phrase.phrase(), None, &alice(), &params)
        .unwrap()
        .export()
        .unwrap()
        .public;

    let envelope = EnvelopeCipher::new();
    let message = envelope
        .encrypt_armored(&codec::import_public_ring(&sender_side).unwrap(), b"hello again")
        .unwrap();

    // the recipient recovers the private key from the phrase alone
    let recovered = Identity::from_seed_phrase(&phrase.phrase(), None, &alice(), &params).unwrap();
    let opened = envelope
        .decrypt(&SecretKeyRing::from(&recovered), message.as_bytes())
        .unwrap();
    assert_eq!(opened, b"hello again");
}
