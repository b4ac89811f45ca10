//! Hybrid pipeline: Argon2id → (tag) → hash-ratchet ChaCha20 → AES-256-CBC
//!
//! Blob format (binary):
//! ```text
//! [32 bytes: Argon2id salt][16 bytes: E(IV)][16·n bytes: CBC blocks, PKCS#7]
//! ```
//!
//! Embedded-tag profiles encrypt `HMAC-SHA512(mac_key, plaintext) || plaintext`;
//! detached-tag profiles encrypt the plaintext alone. Decryption never fails
//! on a wrong key or tampered data: it returns whatever came out together
//! with `integrity_ok` / `padding_ok`.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::cbc::{self, CbcOutput};
use crate::error::{CryptoError, CryptoResult};
use crate::integrity::{compute_tag, tags_match};
use crate::kdf::{self, DerivedKeyBlob};
use crate::profile::{Integrity, Profile};
use crate::{ratchet, BLOCK_SIZE, SALT_SIZE, TAG_SIZE};

/// A structurally valid ciphertext: salt, encrypted IV and at least one
/// CBC block, with a length that is `32 + 16·k`.
#[derive(Clone, PartialEq, Eq)]
pub struct CiphertextBlob {
    bytes: Vec<u8>,
}

impl CiphertextBlob {
    pub const MIN_LEN: usize = SALT_SIZE + 2 * BLOCK_SIZE;

    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        let len = bytes.len();
        if len < Self::MIN_LEN || (len - SALT_SIZE) % BLOCK_SIZE != 0 {
            return Err(CryptoError::CiphertextLength(len));
        }
        Ok(Self { bytes })
    }

    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        Self::from_bytes(hex::decode(s.trim())?)
    }

    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        Self::from_bytes(STANDARD.decode(s.trim())?)
    }

    pub(crate) fn assemble(salt: &[u8; SALT_SIZE], body: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(SALT_SIZE + body.len());
        bytes.extend_from_slice(salt);
        bytes.extend_from_slice(body);
        Self { bytes }
    }

    pub fn salt(&self) -> &[u8] {
        &self.bytes[..SALT_SIZE]
    }

    /// `E(IV) || blocks`
    pub fn body(&self) -> &[u8] {
        &self.bytes[SALT_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

impl fmt::Debug for CiphertextBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CiphertextBlob")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Serialize for CiphertextBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CiphertextBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Outcome of [`decrypt`].
#[derive(Clone)]
pub struct Decrypted {
    pub plaintext: Vec<u8>,
    /// The tag carried inside the payload, for embedded-tag profiles.
    pub embedded_tag: Option<[u8; TAG_SIZE]>,
    /// False when the embedded tag does not match the recovered plaintext.
    /// Always true for detached-tag profiles, whose binding is checked by
    /// [`crate::integrity::verify_detached_tag`].
    pub integrity_ok: bool,
    pub padding_ok: bool,
}

impl Decrypted {
    pub fn is_trusted(&self) -> bool {
        self.integrity_ok && self.padding_ok
    }
}

impl Drop for Decrypted {
    fn drop(&mut self) {
        self.plaintext.zeroize();
    }
}

impl fmt::Debug for Decrypted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decrypted")
            .field("len", &self.plaintext.len())
            .field("integrity_ok", &self.integrity_ok)
            .field("padding_ok", &self.padding_ok)
            .finish()
    }
}

/// Encrypt `plaintext` under `password` with the given profile.
///
/// - `salt`: `None` draws a fresh random salt
/// - `iterations`: Argon2id passes; must be `None` or the fixed value for
///   profiles that pin it, and present for the rest
pub fn encrypt(
    plaintext: &[u8],
    password: &[u8],
    salt: Option<[u8; SALT_SIZE]>,
    iterations: Option<u32>,
    profile: Profile,
) -> CryptoResult<CiphertextBlob> {
    encrypt_tagged(plaintext, password, salt, iterations, profile).map(|(sealed, _)| sealed)
}

/// [`encrypt`], also handing back the embedded tag so callers can bind it
/// into a detached tag over other fields.
pub(crate) fn encrypt_tagged(
    plaintext: &[u8],
    password: &[u8],
    salt: Option<[u8; SALT_SIZE]>,
    iterations: Option<u32>,
    profile: Profile,
) -> CryptoResult<(CiphertextBlob, Option<[u8; TAG_SIZE]>)> {
    let iterations = profile.resolve_iterations(iterations)?;
    let salt = salt.unwrap_or_else(kdf::random_salt);
    let blob = kdf::derive_for_profile(password, &salt, iterations, profile)?;

    let (payload, tag) = match profile.integrity() {
        Integrity::Embedded => {
            let tag = compute_tag(blob.mac_key(profile), plaintext)?;
            let mut payload = Vec::with_capacity(TAG_SIZE + plaintext.len());
            payload.extend_from_slice(&tag);
            payload.extend_from_slice(plaintext);
            (payload, Some(tag))
        }
        Integrity::Detached => (plaintext.to_vec(), None),
    };

    let sealed = seal_layers(&salt, &blob, payload);
    debug!(
        profile = %profile,
        plaintext_len = plaintext.len(),
        blob_len = sealed.len(),
        "encrypted"
    );
    Ok((sealed, tag))
}

/// Decrypt a blob produced by [`encrypt`] with the same password and profile.
///
/// `Err` only for profile misuse or KDF parameter errors; a wrong password
/// or tampered blob yields `Ok` with the failure flags set.
pub fn decrypt(
    sealed: &CiphertextBlob,
    password: &[u8],
    iterations: Option<u32>,
    profile: Profile,
) -> CryptoResult<Decrypted> {
    let iterations = profile.resolve_iterations(iterations)?;
    let blob = kdf::derive_for_profile(password, sealed.salt(), iterations, profile)?;

    let CbcOutput {
        plaintext: mut buffer,
        padding_ok,
    } = open_layers(sealed, &blob)?;

    let decrypted = match profile.integrity() {
        Integrity::Detached => Decrypted {
            plaintext: std::mem::take(&mut buffer),
            embedded_tag: None,
            integrity_ok: true,
            padding_ok,
        },
        Integrity::Embedded if buffer.len() < TAG_SIZE => Decrypted {
            plaintext: std::mem::take(&mut buffer),
            embedded_tag: None,
            integrity_ok: false,
            padding_ok,
        },
        Integrity::Embedded => {
            let data = buffer.split_off(TAG_SIZE);
            let mut claimed = [0u8; TAG_SIZE];
            claimed.copy_from_slice(&buffer);
            buffer.zeroize();

            let computed = compute_tag(blob.mac_key(profile), &data)?;
            Decrypted {
                integrity_ok: tags_match(&claimed, &computed),
                plaintext: data,
                embedded_tag: Some(claimed),
                padding_ok,
            }
        }
    };

    if !decrypted.is_trusted() {
        warn!(
            profile = %profile,
            integrity_ok = decrypted.integrity_ok,
            padding_ok = decrypted.padding_ok,
            "decryption produced untrusted output"
        );
    } else {
        debug!(profile = %profile, plaintext_len = decrypted.plaintext.len(), "decrypted");
    }
    Ok(decrypted)
}

/// Stream-encrypt then CBC-encrypt `payload` with keys from `blob`.
pub(crate) fn seal_layers(
    salt: &[u8; SALT_SIZE],
    blob: &DerivedKeyBlob,
    mut payload: Vec<u8>,
) -> CiphertextBlob {
    ratchet::apply_keystream(blob.ratchet_seed(), &mut payload);
    let body = cbc::encrypt(&payload, &blob.block_key());
    payload.zeroize();
    CiphertextBlob::assemble(salt, &body)
}

/// Inverse of [`seal_layers`]: CBC-decrypt then stream-decrypt.
pub(crate) fn open_layers(sealed: &CiphertextBlob, blob: &DerivedKeyBlob) -> CryptoResult<CbcOutput> {
    let mut out = cbc::decrypt(sealed.body(), &blob.block_key())?;
    ratchet::apply_keystream(blob.ratchet_seed(), &mut out.plaintext);
    Ok(out)
}
