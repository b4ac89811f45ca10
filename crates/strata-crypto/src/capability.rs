//! File capabilities ("tags") and their transport between users
//!
//! Capability format (binary, 362 bytes):
//! ```text
//! [16 bytes: owner id][10 bytes: file id][128 bytes: metadata key][208 bytes: file key]
//! ```
//! Text form: `owner_id,file_id,base64(metadata_key),base64(file_key)`.
//!
//! Sending to another user: Kyber1024-encapsulate to the recipient, then run
//! the capability through the pipeline (`Profile::Record`) with the shared
//! secret as password. The sender keeps its own copy, prefixed with the
//! recipient id, under its master key.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{FileId, MasterKey, UserId};
use crate::pipeline::{self, CiphertextBlob};
use crate::profile::Profile;
use crate::{kem, FILE_KEY_SIZE, METADATA_KEY_SIZE};

pub const CAPABILITY_SIZE: usize = UserId::LEN + FileId::LEN + METADATA_KEY_SIZE + FILE_KEY_SIZE;
pub const SENT_CAPABILITY_SIZE: usize = UserId::LEN + CAPABILITY_SIZE;

/// Everything needed to open one shared file.
#[derive(Clone, PartialEq, Eq)]
pub struct Capability {
    pub owner_id: UserId,
    pub file_id: FileId,
    metadata_key: [u8; METADATA_KEY_SIZE],
    file_key: [u8; FILE_KEY_SIZE],
}

impl Capability {
    pub fn new(
        owner_id: UserId,
        file_id: FileId,
        metadata_key: [u8; METADATA_KEY_SIZE],
        file_key: [u8; FILE_KEY_SIZE],
    ) -> Self {
        Self {
            owner_id,
            file_id,
            metadata_key,
            file_key,
        }
    }

    /// Fresh random keys and file id for a new upload.
    pub fn generate(owner_id: UserId) -> Self {
        let mut rng = rand::thread_rng();
        let mut metadata_key = [0u8; METADATA_KEY_SIZE];
        let mut file_key = [0u8; FILE_KEY_SIZE];
        rng.fill_bytes(&mut metadata_key);
        rng.fill_bytes(&mut file_key);
        Self::new(owner_id, FileId::generate(), metadata_key, file_key)
    }

    pub fn metadata_key(&self) -> &[u8; METADATA_KEY_SIZE] {
        &self.metadata_key
    }

    pub fn file_key(&self) -> &[u8; FILE_KEY_SIZE] {
        &self.file_key
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CAPABILITY_SIZE);
        out.extend_from_slice(self.owner_id.as_bytes());
        out.extend_from_slice(self.file_id.as_bytes());
        out.extend_from_slice(&self.metadata_key);
        out.extend_from_slice(&self.file_key);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != CAPABILITY_SIZE {
            return Err(CryptoError::Capability(format!(
                "expected {CAPABILITY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let (owner, rest) = bytes.split_at(UserId::LEN);
        let (file, rest) = rest.split_at(FileId::LEN);
        let (metadata, file_key_bytes) = rest.split_at(METADATA_KEY_SIZE);

        let mut metadata_key = [0u8; METADATA_KEY_SIZE];
        let mut file_key = [0u8; FILE_KEY_SIZE];
        metadata_key.copy_from_slice(metadata);
        file_key.copy_from_slice(file_key_bytes);

        Ok(Self::new(
            UserId::new(ascii_field("owner id", owner)?)?,
            FileId::new(ascii_field("file id", file)?)?,
            metadata_key,
            file_key,
        ))
    }
}

fn ascii_field(what: &str, bytes: &[u8]) -> CryptoResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| CryptoError::Capability(format!("{what} is not ASCII")))
}

impl Drop for Capability {
    fn drop(&mut self) {
        self.metadata_key.zeroize();
        self.file_key.zeroize();
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("owner_id", &self.owner_id)
            .field("file_id", &self.file_id)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

/// Human-readable tag; this string alone grants access to the file.
impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.owner_id,
            self.file_id,
            STANDARD.encode(self.metadata_key),
            STANDARD.encode(self.file_key)
        )
    }
}

impl FromStr for Capability {
    type Err = CryptoError;

    /// Parse a pasted tag. All four fields are validated before any key
    /// material is used.
    fn from_str(s: &str) -> CryptoResult<Self> {
        let fields: Vec<&str> = s.trim().split(',').collect();
        let [owner, file, metadata_b64, file_key_b64] = fields.as_slice() else {
            return Err(CryptoError::Capability(format!(
                "expected 4 comma-separated fields, got {}",
                fields.len()
            )));
        };

        let owner_id = UserId::new(*owner)?;
        let file_id = FileId::new(*file)?;
        let mut metadata = STANDARD.decode(metadata_b64)?;
        let mut file_key_bytes = STANDARD.decode(file_key_b64)?;

        let result = if metadata.len() != METADATA_KEY_SIZE {
            Err(CryptoError::KeyLength {
                what: "metadata key",
                expected: METADATA_KEY_SIZE,
                actual: metadata.len(),
            })
        } else if file_key_bytes.len() != FILE_KEY_SIZE {
            Err(CryptoError::KeyLength {
                what: "file key",
                expected: FILE_KEY_SIZE,
                actual: file_key_bytes.len(),
            })
        } else {
            let mut metadata_key = [0u8; METADATA_KEY_SIZE];
            let mut file_key = [0u8; FILE_KEY_SIZE];
            metadata_key.copy_from_slice(&metadata);
            file_key.copy_from_slice(&file_key_bytes);
            Ok(Self::new(owner_id, file_id, metadata_key, file_key))
        };

        metadata.zeroize();
        file_key_bytes.zeroize();
        result
    }
}

/// The sender's audit copy of a capability it handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCapability {
    pub recipient_id: UserId,
    pub capability: Capability,
}

impl SentCapability {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SENT_CAPABILITY_SIZE);
        out.extend_from_slice(self.recipient_id.as_bytes());
        out.extend_from_slice(&self.capability.to_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SENT_CAPABILITY_SIZE {
            return Err(CryptoError::Capability(format!(
                "sent record must be {SENT_CAPABILITY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let (recipient, capability) = bytes.split_at(UserId::LEN);
        Ok(Self {
            recipient_id: UserId::new(ascii_field("recipient id", recipient)?)?,
            capability: Capability::from_bytes(capability)?,
        })
    }
}

/// What lands in a recipient's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    /// Pipeline blob of the capability (base64)
    pub ciphertext: String,
    /// Kyber1024 ciphertext (base64)
    pub kem_ciphertext: String,
}

impl InboxEntry {
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Result of opening an inbox entry or sent record.
///
/// `capability` is `None` when the recovered bytes do not even have the
/// shape of a capability (typically together with a failed integrity flag).
#[derive(Debug)]
pub struct ReceivedCapability<T = Capability> {
    pub capability: Option<T>,
    pub integrity_ok: bool,
    pub padding_ok: bool,
}

impl<T> ReceivedCapability<T> {
    pub fn is_valid(&self) -> bool {
        self.capability.is_some() && self.integrity_ok && self.padding_ok
    }
}

/// Encrypt `capability` for the holder of `recipient_public_key`.
pub fn seal_for_recipient(
    capability: &Capability,
    recipient_public_key: &[u8],
) -> CryptoResult<InboxEntry> {
    let (kem_ciphertext, shared) = kem::encapsulate(recipient_public_key)?;

    let mut payload = capability.to_bytes();
    let sealed = pipeline::encrypt(&payload, shared.as_bytes(), None, None, Profile::Record);
    payload.zeroize();
    let sealed = sealed?;

    debug!(file_id = %capability.file_id, "sealed capability for recipient");
    Ok(InboxEntry {
        ciphertext: sealed.to_base64(),
        kem_ciphertext: STANDARD.encode(kem_ciphertext),
    })
}

/// Decapsulate and decrypt an inbox entry with the recipient's secret key.
///
/// Both base64 fields are validated before the KEM runs.
pub fn open_inbox_entry(entry: &InboxEntry, secret_key: &[u8]) -> CryptoResult<ReceivedCapability> {
    let sealed = CiphertextBlob::from_base64(&entry.ciphertext)?;
    let kem_ciphertext = STANDARD.decode(entry.kem_ciphertext.trim())?;

    let shared = kem::decapsulate(&kem_ciphertext, secret_key)?;
    let opened = pipeline::decrypt(&sealed, shared.as_bytes(), None, Profile::Record)?;

    let capability = Capability::from_bytes(&opened.plaintext).ok();
    if capability.is_none() {
        warn!("inbox entry did not decrypt to a well-formed capability");
    }
    Ok(ReceivedCapability {
        capability,
        integrity_ok: opened.integrity_ok,
        padding_ok: opened.padding_ok,
    })
}

/// Encrypt the sender's audit record under its master key.
pub fn seal_sent(sent: &SentCapability, master: &MasterKey) -> CryptoResult<CiphertextBlob> {
    let mut payload = sent.to_bytes();
    let sealed = pipeline::encrypt(&payload, master.as_bytes(), None, None, Profile::Record);
    payload.zeroize();
    sealed
}

pub fn open_sent(
    sealed: &CiphertextBlob,
    master: &MasterKey,
) -> CryptoResult<ReceivedCapability<SentCapability>> {
    let opened = pipeline::decrypt(sealed, master.as_bytes(), None, Profile::Record)?;
    Ok(ReceivedCapability {
        capability: SentCapability::from_bytes(&opened.plaintext).ok(),
        integrity_ok: opened.integrity_ok,
        padding_ok: opened.padding_ok,
    })
}
