//! AES-256-CBC assembled from the single-block primitive
//!
//! Output layout: `E(IV) || C_0 || C_1 || ...`
//!
//! The IV itself is never written: only its single-block encryption. The
//! plaintext IV seeds the chain, so the reader decrypts the first block to
//! recover it. The final block carries PKCS#7 padding; an exact multiple of
//! 16 gains a full block of `0x10`.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256, Block};
use rand::RngCore;
use rayon::prelude::*;

use crate::error::{CryptoError, CryptoResult};
use crate::{BLOCK_KEY_SIZE, BLOCK_SIZE};

/// Block count from which decryption is spread across the rayon pool.
pub const PARALLEL_THRESHOLD_BLOCKS: usize = 4096;

/// Result of CBC decryption. `padding_ok` is false when the last block's
/// padding does not follow PKCS#7; the block is then kept whole.
#[derive(Debug)]
pub struct CbcOutput {
    pub plaintext: Vec<u8>,
    pub padding_ok: bool,
}

/// Encrypt under a freshly drawn IV.
pub fn encrypt(plaintext: &[u8], block_key: &[u8; BLOCK_KEY_SIZE]) -> Vec<u8> {
    let mut iv = [0u8; BLOCK_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    encrypt_with_iv(plaintext, block_key, &iv)
}

/// Encrypt with a caller-chosen IV. Returns `E(IV) || blocks`.
pub fn encrypt_with_iv(
    plaintext: &[u8],
    block_key: &[u8; BLOCK_KEY_SIZE],
    iv: &[u8; BLOCK_SIZE],
) -> Vec<u8> {
    let cipher = Aes256::new(block_key.into());

    let pad = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(BLOCK_SIZE + plaintext.len() + pad);

    let mut encrypted_iv = Block::from(*iv);
    cipher.encrypt_block(&mut encrypted_iv);
    out.extend_from_slice(&encrypted_iv);

    let mut padded = Vec::with_capacity(plaintext.len() + pad);
    padded.extend_from_slice(plaintext);
    padded.resize(plaintext.len() + pad, pad as u8);

    let mut prev = *iv;
    for chunk in padded.chunks_exact(BLOCK_SIZE) {
        let mut block = Block::default();
        for (i, b) in block.iter_mut().enumerate() {
            *b = chunk[i] ^ prev[i];
        }
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
        prev.copy_from_slice(&block);
    }

    out
}

/// Decrypt `E(IV) || blocks`.
///
/// Only the length is checked up front (at least one IV block plus one data
/// block, multiple of 16). Bad padding is reported through
/// [`CbcOutput::padding_ok`].
pub fn decrypt(data: &[u8], block_key: &[u8; BLOCK_KEY_SIZE]) -> CryptoResult<CbcOutput> {
    if data.len() < 2 * BLOCK_SIZE || data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::CiphertextLength(data.len()));
    }

    let cipher = Aes256::new(block_key.into());

    let mut iv = Block::clone_from_slice(&data[..BLOCK_SIZE]);
    cipher.decrypt_block(&mut iv);

    // chain[i] is the value XORed into block i: the IV, then C_{i-1}.
    let blocks = &data[BLOCK_SIZE..];
    let decrypt_one = |i: usize| -> [u8; BLOCK_SIZE] {
        let mut block = Block::clone_from_slice(&blocks[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]);
        cipher.decrypt_block(&mut block);
        let prev: &[u8] = if i == 0 {
            iv.as_slice()
        } else {
            &blocks[(i - 1) * BLOCK_SIZE..i * BLOCK_SIZE]
        };
        let mut out = [0u8; BLOCK_SIZE];
        for (j, b) in out.iter_mut().enumerate() {
            *b = block[j] ^ prev[j];
        }
        out
    };

    let count = blocks.len() / BLOCK_SIZE;
    let decrypted: Vec<[u8; BLOCK_SIZE]> = if count >= PARALLEL_THRESHOLD_BLOCKS {
        (0..count).into_par_iter().map(decrypt_one).collect()
    } else {
        (0..count).map(decrypt_one).collect()
    };

    let mut plaintext = Vec::with_capacity(blocks.len());
    let (last, body) = decrypted.split_last().ok_or(CryptoError::CiphertextLength(data.len()))?;
    for block in body {
        plaintext.extend_from_slice(block);
    }

    let padding_ok = match padding_consumed(last) {
        Some(consumed) => {
            plaintext.extend_from_slice(&last[..BLOCK_SIZE - consumed]);
            true
        }
        None => {
            plaintext.extend_from_slice(last);
            false
        }
    };

    Ok(CbcOutput {
        plaintext,
        padding_ok,
    })
}

/// Number of trailing padding bytes in the final block, or `None` if the
/// padding is invalid.
pub fn padding_consumed(block: &[u8; BLOCK_SIZE]) -> Option<usize> {
    let n = block[BLOCK_SIZE - 1] as usize;
    if !(1..=BLOCK_SIZE).contains(&n) {
        return None;
    }
    if block[BLOCK_SIZE - n..].iter().all(|&b| b as usize == n) {
        Some(n)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; BLOCK_KEY_SIZE] = [0x42; BLOCK_KEY_SIZE];

    #[test]
    fn test_roundtrip_short() {
        let ct = encrypt(b"abc", &KEY);
        assert_eq!(ct.len(), 32);
        let out = decrypt(&ct, &KEY).unwrap();
        assert_eq!(out.plaintext, b"abc");
        assert!(out.padding_ok);
    }

    #[test]
    fn test_roundtrip_empty() {
        let ct = encrypt(b"", &KEY);
        assert_eq!(ct.len(), 32, "empty input still gets a full padding block");
        let out = decrypt(&ct, &KEY).unwrap();
        assert!(out.plaintext.is_empty());
        assert!(out.padding_ok);
    }

    #[test]
    fn test_iv_is_chain_seed_not_encrypted_iv() {
        let iv = [7u8; BLOCK_SIZE];
        let ct = encrypt_with_iv(&[0u8; BLOCK_SIZE], &KEY, &iv);

        let cipher = Aes256::new((&KEY).into());
        let mut expected = Block::from(iv);
        cipher.encrypt_block(&mut expected);
        assert_eq!(&ct[..16], expected.as_slice(), "header is E(IV)");

        // P_0 = 0 so C_0 = E(IV) as well.
        assert_eq!(&ct[16..32], expected.as_slice());
    }

    #[test]
    fn test_full_block_padding_for_aligned_input() {
        let iv = [1u8; BLOCK_SIZE];
        let ct = encrypt_with_iv(&[0xAA; 32], &KEY, &iv);
        assert_eq!(ct.len(), 16 + 48);

        let cipher = Aes256::new((&KEY).into());
        let mut last = Block::clone_from_slice(&ct[48..64]);
        cipher.decrypt_block(&mut last);
        for (i, b) in last.iter().enumerate() {
            assert_eq!(b ^ ct[32 + i], 0x10);
        }
    }

    #[test]
    fn test_padding_rule() {
        assert_eq!(padding_consumed(&[0x10; 16]), Some(16));

        let mut block = [b'x'; 16];
        block[15] = 1;
        assert_eq!(padding_consumed(&block), Some(1));

        block[13..].fill(3);
        assert_eq!(padding_consumed(&block), Some(3));

        block[15] = 0;
        assert_eq!(padding_consumed(&block), None, "zero is never valid");

        block[15] = 17;
        assert_eq!(padding_consumed(&block), None, "above block size");

        let mut mixed = [4u8; 16];
        mixed[13] = 9;
        assert_eq!(padding_consumed(&mixed), None, "inconsistent pad bytes");
    }

    #[test]
    fn test_wrong_key_flags_padding_or_garbles() {
        let ct = encrypt(b"sixteen byte msg plus more", &KEY);
        let out = decrypt(&ct, &[0x43; BLOCK_KEY_SIZE]).unwrap();
        assert!(!out.padding_ok || out.plaintext != b"sixteen byte msg plus more");
    }

    #[test]
    fn test_structural_rejection() {
        assert!(matches!(decrypt(&[0u8; 16], &KEY), Err(CryptoError::CiphertextLength(16))));
        assert!(matches!(decrypt(&[0u8; 33], &KEY), Err(CryptoError::CiphertextLength(33))));
    }

    #[test]
    fn test_parallel_path_matches_sequential() {
        let plaintext: Vec<u8> = (0..(PARALLEL_THRESHOLD_BLOCKS + 3) * BLOCK_SIZE)
            .map(|i| (i % 253) as u8)
            .collect();
        let ct = encrypt(&plaintext, &KEY);
        let out = decrypt(&ct, &KEY).unwrap();
        assert!(out.padding_ok);
        assert_eq!(out.plaintext, plaintext);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn padding_value_matches_length(len in 0usize..200) {
            let plaintext = vec![0x5Au8; len];
            let ct = encrypt(&plaintext, &KEY);
            let expected_pad = 16 - len % 16;
            prop_assert_eq!(ct.len(), 16 + len + expected_pad);

            let out = decrypt(&ct, &KEY).unwrap();
            prop_assert!(out.padding_ok);
            prop_assert_eq!(out.plaintext, plaintext);
        }
    }
}
