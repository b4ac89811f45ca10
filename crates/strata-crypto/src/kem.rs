//! Kyber1024 key encapsulation and protection of the secret key at rest.

use pqcrypto_kyber::kyber1024;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::MasterKey;
use crate::pipeline::{self, CiphertextBlob};
use crate::profile::Profile;

pub const PUBLIC_KEY_SIZE: usize = 1568;
pub const SECRET_KEY_SIZE: usize = 3168;
pub const CIPHERTEXT_SIZE: usize = 1568;

/// KEM shared secret; used as the pipeline password for one capability.
pub struct SharedSecret {
    bytes: Vec<u8>,
}

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A Kyber1024 key pair as raw bytes.
pub struct KemKeyPair {
    pub public_key: Vec<u8>,
    secret_key: Vec<u8>,
}

impl KemKeyPair {
    pub fn generate() -> Self {
        let (pk, sk) = kyber1024::keypair();
        Self {
            public_key: pk.as_bytes().to_vec(),
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    pub fn from_bytes(public_key: Vec<u8>, secret_key: Vec<u8>) -> CryptoResult<Self> {
        check_len("public key", PUBLIC_KEY_SIZE, public_key.len())?;
        check_len("secret key", SECRET_KEY_SIZE, secret_key.len())?;
        Ok(Self {
            public_key,
            secret_key,
        })
    }

    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for KemKeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemKeyPair")
            .field("public_key_len", &self.public_key.len())
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> CryptoResult<()> {
    if expected != actual {
        return Err(CryptoError::Kem(format!(
            "{what} must be {expected} bytes, got {actual}"
        )));
    }
    Ok(())
}

/// Encapsulate to a recipient's public key.
///
/// Returns `(kem_ciphertext, shared_secret)`.
pub fn encapsulate(public_key: &[u8]) -> CryptoResult<(Vec<u8>, SharedSecret)> {
    check_len("public key", PUBLIC_KEY_SIZE, public_key.len())?;
    let pk = kyber1024::PublicKey::from_bytes(public_key)
        .map_err(|_| CryptoError::Kem("invalid public key".into()))?;

    let (ss, ct) = kyber1024::encapsulate(&pk);
    Ok((
        ct.as_bytes().to_vec(),
        SharedSecret {
            bytes: ss.as_bytes().to_vec(),
        },
    ))
}

/// Recover the shared secret from a KEM ciphertext.
pub fn decapsulate(ciphertext: &[u8], secret_key: &[u8]) -> CryptoResult<SharedSecret> {
    check_len("ciphertext", CIPHERTEXT_SIZE, ciphertext.len())?;
    check_len("secret key", SECRET_KEY_SIZE, secret_key.len())?;

    let ct = kyber1024::Ciphertext::from_bytes(ciphertext)
        .map_err(|_| CryptoError::Kem("invalid ciphertext".into()))?;
    let sk = kyber1024::SecretKey::from_bytes(secret_key)
        .map_err(|_| CryptoError::Kem("invalid secret key".into()))?;

    let ss = kyber1024::decapsulate(&ct, &sk);
    Ok(SharedSecret {
        bytes: ss.as_bytes().to_vec(),
    })
}

/// Encrypt the KEM secret key under the master key.
pub fn seal_secret_key(
    keypair: &KemKeyPair,
    master: &MasterKey,
    iterations: u32,
) -> CryptoResult<CiphertextBlob> {
    pipeline::encrypt(
        keypair.secret_key(),
        master.as_bytes(),
        None,
        Some(iterations),
        Profile::KeyMaterial,
    )
}

/// Outcome of [`open_secret_key`].
///
/// `keypair` is `None` when the recovered bytes are not a secret key's
/// length, which in practice means a wrong master key.
#[derive(Debug)]
pub struct OpenedSecretKey {
    pub keypair: Option<KemKeyPair>,
    pub integrity_ok: bool,
    pub padding_ok: bool,
}

impl OpenedSecretKey {
    /// The key pair, only if it verified.
    pub fn into_trusted(self) -> Option<KemKeyPair> {
        if self.integrity_ok && self.padding_ok {
            self.keypair
        } else {
            None
        }
    }
}

/// Decrypt a sealed secret key and pair it with its public key.
pub fn open_secret_key(
    sealed: &CiphertextBlob,
    public_key: Vec<u8>,
    master: &MasterKey,
    iterations: u32,
) -> CryptoResult<OpenedSecretKey> {
    check_len("public key", PUBLIC_KEY_SIZE, public_key.len())?;
    let mut opened = pipeline::decrypt(
        sealed,
        master.as_bytes(),
        Some(iterations),
        Profile::KeyMaterial,
    )?;
    let secret_key = std::mem::take(&mut opened.plaintext);
    Ok(OpenedSecretKey {
        keypair: KemKeyPair::from_bytes(public_key, secret_key).ok(),
        integrity_ok: opened.integrity_ok,
        padding_ok: opened.padding_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_match_library() {
        assert_eq!(PUBLIC_KEY_SIZE, kyber1024::public_key_bytes());
        assert_eq!(SECRET_KEY_SIZE, kyber1024::secret_key_bytes());
        assert_eq!(CIPHERTEXT_SIZE, kyber1024::ciphertext_bytes());
    }

    #[test]
    fn test_encapsulate_decapsulate() {
        let pair = KemKeyPair::generate();
        let (ct, ss1) = encapsulate(&pair.public_key).unwrap();
        let ss2 = decapsulate(&ct, pair.secret_key()).unwrap();
        assert_eq!(ss1.as_bytes(), ss2.as_bytes());
        assert_eq!(ct.len(), CIPHERTEXT_SIZE);
    }

    #[test]
    fn test_other_keypair_differs() {
        let alice = KemKeyPair::generate();
        let mallory = KemKeyPair::generate();
        let (ct, ss) = encapsulate(&alice.public_key).unwrap();
        let wrong = decapsulate(&ct, mallory.secret_key()).unwrap();
        assert_ne!(ss.as_bytes(), wrong.as_bytes());
    }

    #[test]
    fn test_length_errors() {
        let pair = KemKeyPair::generate();
        assert!(matches!(encapsulate(&[0u8; 12]), Err(CryptoError::Kem(_))));
        assert!(matches!(decapsulate(&[0u8; 12], pair.secret_key()), Err(CryptoError::Kem(_))));
        assert!(KemKeyPair::from_bytes(vec![0u8; 3], vec![0u8; SECRET_KEY_SIZE]).is_err());
    }

    #[test]
    fn test_secret_key_at_rest() {
        let master = MasterKey::from_bytes([9u8; 64]);
        let pair = KemKeyPair::generate();

        let sealed = seal_secret_key(&pair, &master, 1).unwrap();
        let restored = open_secret_key(&sealed, pair.public_key.clone(), &master, 1)
            .unwrap()
            .into_trusted()
            .unwrap();
        assert_eq!(restored.secret_key(), pair.secret_key());

        let other = MasterKey::from_bytes([8u8; 64]);
        let wrong = open_secret_key(&sealed, pair.public_key.clone(), &other, 1).unwrap();
        assert!(!wrong.integrity_ok);
        assert!(wrong.into_trusted().is_none());
    }
}
