//! Key derivation: Argon2id password + salt → profile-sized key blob

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::profile::{Profile, BLOCK_KEY_WINDOW, RATCHET_SEED_WINDOW};
use crate::{BLOCK_KEY_SIZE, METADATA_KEY_SIZE, RATCHET_SEED_SIZE, SALT_SIZE};

/// Argon2id memory cost in KiB, identical for every profile.
pub const MEM_COST_KIB: u32 = 512;

/// Argon2id lanes, identical for every profile.
pub const PARALLELISM: u32 = 1;

const METADATA_SALT_LEN: usize = 26;
const METADATA_ITERATIONS: u32 = 14;
const METADATA_OUTPUT_LEN: usize = 350;

/// Length of each metadata sub-key (filename, description).
pub const METADATA_SUBKEY_SIZE: usize = METADATA_OUTPUT_LEN / 2;

/// Raw Argon2id output, sliced into sub-keys by a [`Profile`].
///
/// Zeroized on drop.
pub struct DerivedKeyBlob {
    bytes: Vec<u8>,
}

impl DerivedKeyBlob {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn ratchet_seed(&self) -> [u8; RATCHET_SEED_SIZE] {
        let mut seed = [0u8; RATCHET_SEED_SIZE];
        seed.copy_from_slice(&self.bytes[RATCHET_SEED_WINDOW]);
        seed
    }

    pub fn block_key(&self) -> [u8; BLOCK_KEY_SIZE] {
        let mut key = [0u8; BLOCK_KEY_SIZE];
        key.copy_from_slice(&self.bytes[BLOCK_KEY_WINDOW]);
        key
    }

    /// MAC key window for `profile`. The blob must have been derived for it.
    pub fn mac_key(&self, profile: Profile) -> &[u8] {
        &self.bytes[profile.mac_window()]
    }

    pub fn aux_key(&self, profile: Profile) -> Option<&[u8]> {
        profile.aux_window().map(|w| &self.bytes[w])
    }
}

impl Drop for DerivedKeyBlob {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKeyBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeyBlob")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Run Argon2id (m = 512 KiB, p = 1) and return `out_len` bytes.
///
/// The pass count is trusted as given; a weak count is not an error.
pub fn derive(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    out_len: usize,
) -> CryptoResult<DerivedKeyBlob> {
    let params = Params::new(MEM_COST_KIB, iterations, PARALLELISM, Some(out_len))
        .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut bytes = vec![0u8; out_len];
    argon2
        .hash_password_into(password, salt, &mut bytes)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;

    Ok(DerivedKeyBlob { bytes })
}

/// Derive the blob for `profile`.
pub fn derive_for_profile(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    profile: Profile,
) -> CryptoResult<DerivedKeyBlob> {
    derive(password, salt, iterations, profile.length())
}

/// Fresh random salt for one encryption.
pub fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Deterministic salt for the login flow: the first 32 bytes of SHA-512(username).
pub fn login_salt(username: &str) -> [u8; SALT_SIZE] {
    let digest = Sha512::digest(username.as_bytes());
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&digest[..SALT_SIZE]);
    salt
}

/// Filename and description keys unlocked from a capability's metadata key.
///
/// The metadata key is split into a 26-byte salt and a 102-byte password and
/// run through Argon2id a second time (14 passes, 350 bytes).
pub struct MetadataSubkeys {
    filename: [u8; METADATA_SUBKEY_SIZE],
    description: [u8; METADATA_SUBKEY_SIZE],
}

impl MetadataSubkeys {
    pub fn derive(metadata_key: &[u8; METADATA_KEY_SIZE]) -> CryptoResult<Self> {
        let (salt, password) = metadata_key.split_at(METADATA_SALT_LEN);
        let blob = derive(password, salt, METADATA_ITERATIONS, METADATA_OUTPUT_LEN)?;

        let mut filename = [0u8; METADATA_SUBKEY_SIZE];
        let mut description = [0u8; METADATA_SUBKEY_SIZE];
        filename.copy_from_slice(&blob.as_bytes()[..METADATA_SUBKEY_SIZE]);
        description.copy_from_slice(&blob.as_bytes()[METADATA_SUBKEY_SIZE..]);

        Ok(Self {
            filename,
            description,
        })
    }

    pub fn filename(&self) -> &[u8; METADATA_SUBKEY_SIZE] {
        &self.filename
    }

    pub fn description(&self) -> &[u8; METADATA_SUBKEY_SIZE] {
        &self.description
    }
}

impl Drop for MetadataSubkeys {
    fn drop(&mut self) {
        self.filename.zeroize();
        self.description.zeroize();
    }
}

impl std::fmt::Debug for MetadataSubkeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataSubkeys")
            .field("filename", &"[REDACTED]")
            .field("description", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_deterministic() {
        let salt = [1u8; SALT_SIZE];
        let a = derive(b"test-passphrase-123", &salt, 1, 224).unwrap();
        let b = derive(b"test-passphrase-123", &salt, 1, 224).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_output_length() {
        for len in [224, 336, 350, 416] {
            let blob = derive(b"pw", &[7u8; SALT_SIZE], 1, len).unwrap();
            assert_eq!(blob.len(), len);
        }
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = [1u8; SALT_SIZE];
        let a = derive(b"passphrase-a", &salt, 1, 64).unwrap();
        let b = derive(b"passphrase-b", &salt, 1, 64).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_kdf_different_salts() {
        let a = derive(b"same", &[1u8; SALT_SIZE], 1, 64).unwrap();
        let b = derive(b"same", &[2u8; SALT_SIZE], 1, 64).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_kdf_iterations_change_output() {
        let salt = [3u8; SALT_SIZE];
        let a = derive(b"pw", &salt, 1, 64).unwrap();
        let b = derive(b"pw", &salt, 2, 64).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        assert!(matches!(
            derive(b"pw", &[0u8; SALT_SIZE], 0, 64),
            Err(CryptoError::Kdf(_))
        ));
    }

    #[test]
    fn test_slices_follow_windows() {
        let blob = derive_for_profile(b"pw", &[9u8; SALT_SIZE], 1, Profile::VaultTag).unwrap();
        let bytes = blob.as_bytes();
        assert_eq!(&blob.ratchet_seed()[..], &bytes[..64]);
        assert_eq!(&blob.block_key()[..], &bytes[64..96]);
        assert_eq!(blob.mac_key(Profile::VaultTag), &bytes[96..160]);
        assert_eq!(blob.aux_key(Profile::VaultTag).unwrap(), &bytes[160..224]);
        assert!(blob.aux_key(Profile::VaultField).is_none());
    }

    #[test]
    fn test_login_salt_is_stable() {
        assert_eq!(login_salt("alice"), login_salt("alice"));
        assert_ne!(login_salt("alice"), login_salt("bob"));
    }

    #[test]
    fn test_metadata_subkeys_match_manual_split() {
        let mut metadata_key = [0u8; METADATA_KEY_SIZE];
        for (i, b) in metadata_key.iter_mut().enumerate() {
            *b = i as u8;
        }

        let subkeys = MetadataSubkeys::derive(&metadata_key).unwrap();
        let manual = derive(&metadata_key[26..], &metadata_key[..26], 14, 350).unwrap();

        assert_eq!(&subkeys.filename()[..], &manual.as_bytes()[..175]);
        assert_eq!(&subkeys.description()[..], &manual.as_bytes()[175..]);
        assert_ne!(subkeys.filename(), subkeys.description());
    }

    #[test]
    fn test_debug_redacts() {
        let blob = derive(b"pw", &[0u8; SALT_SIZE], 1, 64).unwrap();
        assert!(format!("{blob:?}").contains("REDACTED"));
    }
}
