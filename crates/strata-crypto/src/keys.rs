//! Long-term master key, user and file identifiers

use std::fmt;
use std::str::FromStr;

use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf;

/// Master key length in bytes.
pub const MASTER_KEY_SIZE: usize = 64;

/// The user's long-term key, derived from password and username.
///
/// Used as the pipeline password for vault records, the sent-capability log
/// and the KEM secret key at rest. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; MASTER_KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; MASTER_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the master key with Argon2id, salted by [`kdf::login_salt`].
pub fn derive_master_key(
    password: &SecretString,
    username: &UserId,
    iterations: u32,
) -> CryptoResult<MasterKey> {
    let salt = kdf::login_salt(username.as_str());
    let blob = kdf::derive(
        password.expose_secret().as_bytes(),
        &salt,
        iterations,
        MASTER_KEY_SIZE,
    )?;
    let mut bytes = [0u8; MASTER_KEY_SIZE];
    bytes.copy_from_slice(blob.as_bytes());
    Ok(MasterKey::from_bytes(bytes))
}

fn random_ascii(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

// Printable ASCII without the comma, which separates capability fields.
fn validate_fixed_ascii(what: &'static str, s: &str, len: usize) -> CryptoResult<()> {
    if s.len() != len {
        return Err(CryptoError::Capability(format!(
            "{what} must be {len} ASCII characters, got {}",
            s.len()
        )));
    }
    if !s.bytes().all(|b| b.is_ascii_graphic() && b != b',') {
        return Err(CryptoError::Capability(format!(
            "{what} contains characters outside printable ASCII"
        )));
    }
    Ok(())
}

macro_rules! fixed_ascii_id {
    ($name:ident, $len:expr, $what:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub const LEN: usize = $len;

            pub fn new(s: impl Into<String>) -> CryptoResult<Self> {
                let s = s.into();
                validate_fixed_ascii($what, &s, Self::LEN)?;
                Ok(Self(s))
            }

            pub fn generate() -> Self {
                Self(random_ascii(Self::LEN))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = CryptoError;

            fn from_str(s: &str) -> CryptoResult<Self> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CryptoError;

            fn try_from(s: String) -> CryptoResult<Self> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

fixed_ascii_id!(UserId, 16, "user id");
fixed_ascii_id!(FileId, 10, "file id");
