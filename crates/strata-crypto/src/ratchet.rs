//! Hash-ratchet keystream driver
//!
//! A 64-byte seed is advanced once per 256 KiB chunk and each new seed keys
//! one ChaCha20 call:
//!
//! ```text
//! seed ← Whirlpool(SHA-512(lowercase_hex(seed)))
//! key   = seed[0..32]
//! nonce = seed[32..40]
//! ```
//!
//! The first step happens before any data is touched, so chunk 0 never uses
//! the KDF output directly. Each seed depends on the previous one; the chain
//! is inherently sequential.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20Legacy;
use sha2::{Digest, Sha512};
use whirlpool::Whirlpool;
use zeroize::Zeroize;

use crate::{RATCHET_SEED_SIZE, STREAM_KEY_SIZE, STREAM_NONCE_SIZE};

/// Bytes processed under one ratchet step.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Stream-cipher key and nonce for one chunk.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkKey {
    pub key: [u8; STREAM_KEY_SIZE],
    pub nonce: [u8; STREAM_NONCE_SIZE],
}

impl Drop for ChunkKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkKey")
            .field("key", &"[REDACTED]")
            .field("nonce", &hex::encode(self.nonce))
            .finish()
    }
}

/// Rolling seed; yields one [`ChunkKey`] per step, forever.
pub struct Ratchet {
    seed: [u8; RATCHET_SEED_SIZE],
}

impl Ratchet {
    pub fn new(seed: [u8; RATCHET_SEED_SIZE]) -> Self {
        Self { seed }
    }

    fn step(&mut self) {
        let mut hex_seed = hex::encode(self.seed);
        let inner = Sha512::digest(hex_seed.as_bytes());
        hex_seed.zeroize();
        let outer = Whirlpool::digest(inner);
        self.seed.copy_from_slice(&outer);
    }
}

impl Iterator for Ratchet {
    type Item = ChunkKey;

    fn next(&mut self) -> Option<ChunkKey> {
        self.step();
        let mut key = [0u8; STREAM_KEY_SIZE];
        let mut nonce = [0u8; STREAM_NONCE_SIZE];
        key.copy_from_slice(&self.seed[..STREAM_KEY_SIZE]);
        nonce.copy_from_slice(&self.seed[STREAM_KEY_SIZE..STREAM_KEY_SIZE + STREAM_NONCE_SIZE]);
        Some(ChunkKey { key, nonce })
    }
}

impl Drop for Ratchet {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

/// XOR the ratchet keystream into `data` in place.
///
/// Encryption and decryption are the same operation. Returns the number of
/// ratchet steps taken.
pub fn apply_keystream(seed: [u8; RATCHET_SEED_SIZE], data: &mut [u8]) -> usize {
    let mut steps = 0;
    for (chunk, chunk_key) in data.chunks_mut(CHUNK_SIZE).zip(Ratchet::new(seed)) {
        let mut cipher = ChaCha20Legacy::new((&chunk_key.key).into(), (&chunk_key.nonce).into());
        cipher.apply_keystream(chunk);
        steps += 1;
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seed() -> [u8; RATCHET_SEED_SIZE] {
        let mut s = [0u8; RATCHET_SEED_SIZE];
        for (i, b) in s.iter_mut().enumerate() {
            *b = (i * 3) as u8;
        }
        s
    }

    #[test]
    fn test_first_key_is_one_step_from_seed() {
        let s = seed();
        let expected = Whirlpool::digest(Sha512::digest(hex::encode(s).as_bytes()));

        let first = Ratchet::new(s).next().unwrap();
        assert_eq!(&first.key[..], &expected[..32]);
        assert_eq!(&first.nonce[..], &expected[32..40]);
    }

    #[test]
    fn test_hex_input_is_lowercase() {
        let s = [0xABu8; RATCHET_SEED_SIZE];
        let lower = Whirlpool::digest(Sha512::digest("ab".repeat(64).as_bytes()));
        let first = Ratchet::new(s).next().unwrap();
        assert_eq!(&first.key[..], &lower[..32]);
    }

    #[test]
    fn test_successive_keys_differ() {
        let keys: Vec<ChunkKey> = Ratchet::new(seed()).take(4).collect();
        for i in 0..keys.len() {
            for j in i + 1..keys.len() {
                assert_ne!(keys[i].key, keys[j].key);
            }
        }
    }

    #[test]
    fn test_keystream_roundtrip() {
        let original: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let mut data = original.clone();

        apply_keystream(seed(), &mut data);
        assert_ne!(data, original);
        apply_keystream(seed(), &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_one_step_per_chunk() {
        assert_eq!(apply_keystream(seed(), &mut []), 0);
        assert_eq!(apply_keystream(seed(), &mut vec![0u8; 1]), 1);
        assert_eq!(apply_keystream(seed(), &mut vec![0u8; CHUNK_SIZE]), 1);
        assert_eq!(apply_keystream(seed(), &mut vec![0u8; CHUNK_SIZE + 1]), 2);
    }

    #[test]
    fn test_second_chunk_uses_second_key() {
        let mut data = vec![0u8; CHUNK_SIZE + 64];
        apply_keystream(seed(), &mut data);

        let second = Ratchet::new(seed()).nth(1).unwrap();
        let mut expected = [0u8; 64];
        let mut cipher = ChaCha20Legacy::new((&second.key).into(), (&second.nonce).into());
        cipher.apply_keystream(&mut expected);

        assert_eq!(&data[CHUNK_SIZE..], &expected[..]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn ratchet_is_deterministic(s in proptest::array::uniform32(any::<u8>()), len in 0usize..4096) {
            let mut full = [0u8; RATCHET_SEED_SIZE];
            full[..32].copy_from_slice(&s);
            full[32..].copy_from_slice(&s);

            let mut a = vec![0u8; len];
            let mut b = vec![0u8; len];
            apply_keystream(full, &mut a);
            apply_keystream(full, &mut b);
            prop_assert_eq!(a, b);
        }
    }
}
