//! strata-crypto: hybrid authenticated encryption for strata file sharing
//!
//! Architecture: Argon2id profile → HMAC-SHA512 tag → hash-ratchet ChaCha20 → AES-256-CBC
//!
//! Pipeline: password + salt → key blob → {ratchet seed, block key, MAC key, aux key} → blob
//!
//! Key hierarchy:
//! ```text
//! Master Key (64 bytes, Argon2id from password + username salt)
//!   ├── Vault fields + detached vault tag (password = master key)
//!   ├── Sent-capability log (password = master key)
//!   └── Kyber1024 secret key at rest (password = master key)
//! Capability (362 bytes, sent via Kyber1024 shared secret)
//!   ├── File Key (208 bytes) → file content, detached metadata tag
//!   └── Metadata Key (128 bytes) → Argon2id → filename key | description key
//! ```
//!
//! Tampering never raises an error: decryption returns the recovered bytes
//! together with `integrity_ok` / `padding_ok` flags and leaves the decision
//! to the caller.

pub mod capability;
pub mod cbc;
pub mod error;
pub mod file;
pub mod integrity;
pub mod kdf;
pub mod kem;
pub mod keys;
pub mod pipeline;
pub mod profile;
pub mod ratchet;
pub mod vault;

pub use capability::{
    open_inbox_entry, open_sent, seal_for_recipient, seal_sent, Capability, InboxEntry,
    ReceivedCapability, SentCapability,
};
pub use error::{CryptoError, CryptoResult};
pub use file::{open_file, seal_file, FileIterations, OpenedFile, SealedFile};
pub use integrity::{seal_detached_tag, verify_detached_tag};
pub use kdf::{derive, login_salt, DerivedKeyBlob, MetadataSubkeys};
pub use kem::{
    decapsulate, encapsulate, open_secret_key, seal_secret_key, KemKeyPair, OpenedSecretKey,
    SharedSecret,
};
pub use keys::{derive_master_key, FileId, MasterKey, UserId};
pub use pipeline::{decrypt, encrypt, CiphertextBlob, Decrypted};
pub use profile::{Integrity, Profile};
pub use vault::{open_entry, seal_entry, OpenedEntry, SealedEntry, VaultEntry};

/// Argon2id salt carried at the front of every blob
pub const SALT_SIZE: usize = 32;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// HMAC-SHA512 tag size
pub const TAG_SIZE: usize = 64;

/// Hash-ratchet seed size (Whirlpool output)
pub const RATCHET_SEED_SIZE: usize = 64;

/// AES-256 key size
pub const BLOCK_KEY_SIZE: usize = 32;

/// ChaCha20 key size
pub const STREAM_KEY_SIZE: usize = 32;

/// Original (64-bit) ChaCha20 nonce size
pub const STREAM_NONCE_SIZE: usize = 8;

/// Metadata key carried in a capability
pub const METADATA_KEY_SIZE: usize = 128;

/// File key carried in a capability
pub const FILE_KEY_SIZE: usize = 208;
