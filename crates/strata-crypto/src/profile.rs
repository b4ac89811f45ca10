//! Named key-derivation profiles.
//!
//! A profile fixes, for one family of call sites, how long the Argon2id
//! output is, how it is cut into sub-keys and which integrity strategy the
//! pipeline applies. Nothing in a ciphertext records the profile, so
//! encryptor and decryptor must name the same one.
//!
//! ```text
//! [0, 64)     ratchet seed
//! [64, 96)    AES-256 block key
//! [96, ..)    MAC key, optionally followed by an auxiliary key
//! ```

use std::fmt;
use std::ops::Range;

use crate::error::{CryptoError, CryptoResult};
use crate::{BLOCK_KEY_SIZE, RATCHET_SEED_SIZE};

pub const RATCHET_SEED_WINDOW: Range<usize> = 0..RATCHET_SEED_SIZE;
pub const BLOCK_KEY_WINDOW: Range<usize> = RATCHET_SEED_SIZE..RATCHET_SEED_SIZE + BLOCK_KEY_SIZE;

/// Argon2id passes used for capability transport and the sent log.
pub const RECORD_ITERATIONS: u32 = 125;

/// How the pipeline protects a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    /// `HMAC(mac_key, plaintext)` is prepended before encryption.
    Embedded,
    /// No tag travels with the payload; a separate artifact binds it.
    Detached,
}

/// Where the Argon2id pass count comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationSource {
    Fixed(u32),
    Caller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Capabilities and the sender's sent-capability log.
    Record,
    /// Individual password-vault fields.
    VaultField,
    /// Detached tag over a vault record; the tail of the blob is the
    /// record verification key.
    VaultTag,
    /// Filenames and descriptions.
    Label,
    /// Detached tag binding filename, description and content tag.
    MetadataTag,
    /// File content.
    File,
    /// Private key material at rest.
    KeyMaterial,
}

impl Profile {
    pub const ALL: [Profile; 7] = [
        Profile::Record,
        Profile::VaultField,
        Profile::VaultTag,
        Profile::Label,
        Profile::MetadataTag,
        Profile::File,
        Profile::KeyMaterial,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Profile::Record => "record",
            Profile::VaultField => "vault-field",
            Profile::VaultTag => "vault-tag",
            Profile::Label => "label",
            Profile::MetadataTag => "metadata-tag",
            Profile::File => "file",
            Profile::KeyMaterial => "key-material",
        }
    }

    /// Total Argon2id output length in bytes.
    pub fn length(self) -> usize {
        match self {
            Profile::Record | Profile::VaultField | Profile::VaultTag => 224,
            Profile::Label | Profile::MetadataTag => 336,
            Profile::File | Profile::KeyMaterial => 416,
        }
    }

    pub fn integrity(self) -> Integrity {
        match self {
            Profile::Record | Profile::File | Profile::KeyMaterial => Integrity::Embedded,
            Profile::VaultField | Profile::VaultTag | Profile::Label | Profile::MetadataTag => {
                Integrity::Detached
            }
        }
    }

    pub fn iteration_source(self) -> IterationSource {
        match self {
            Profile::Record => IterationSource::Fixed(RECORD_ITERATIONS),
            _ => IterationSource::Caller,
        }
    }

    /// HMAC key window.
    pub fn mac_window(self) -> Range<usize> {
        match self {
            Profile::VaultTag => 96..160,
            Profile::MetadataTag => 96..208,
            other => 96..other.length(),
        }
    }

    /// Trailing key material reserved for a higher-level protocol.
    pub fn aux_window(self) -> Option<Range<usize>> {
        match self {
            Profile::VaultTag => Some(160..224),
            Profile::MetadataTag => Some(208..336),
            _ => None,
        }
    }

    /// Resolve the pass count for this profile against what the caller asked for.
    ///
    /// A fixed profile rejects a different explicit count; a caller-sourced
    /// profile rejects a missing one.
    pub fn resolve_iterations(self, requested: Option<u32>) -> CryptoResult<u32> {
        match (self.iteration_source(), requested) {
            (IterationSource::Fixed(n), None) => Ok(n),
            (IterationSource::Fixed(n), Some(m)) if n == m => Ok(n),
            (IterationSource::Fixed(n), Some(m)) => Err(CryptoError::Profile {
                profile: self.name(),
                reason: format!("iterations fixed at {n}, caller asked for {m}"),
            }),
            (IterationSource::Caller, Some(m)) => Ok(m),
            (IterationSource::Caller, None) => Err(CryptoError::Profile {
                profile: self.name(),
                reason: "iteration count must be supplied by the caller".into(),
            }),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_are_disjoint_and_in_bounds() {
        for profile in Profile::ALL {
            let mac = profile.mac_window();
            assert_eq!(mac.start, BLOCK_KEY_WINDOW.end, "{profile}: mac follows block key");
            assert!(mac.end <= profile.length(), "{profile}: mac in bounds");
            assert!(!mac.is_empty(), "{profile}: mac non-empty");

            match profile.aux_window() {
                Some(aux) => {
                    assert_eq!(aux.start, mac.end, "{profile}: aux follows mac");
                    assert_eq!(aux.end, profile.length(), "{profile}: aux runs to end");
                }
                None => assert_eq!(mac.end, profile.length(), "{profile}: mac runs to end"),
            }
        }
    }

    #[test]
    fn test_observed_lengths() {
        assert_eq!(Profile::Record.length(), 224);
        assert_eq!(Profile::Label.length(), 336);
        assert_eq!(Profile::File.length(), 416);
    }

    #[test]
    fn test_detached_tag_profiles_carry_aux_key() {
        for profile in Profile::ALL {
            if profile.aux_window().is_some() {
                assert_eq!(profile.integrity(), Integrity::Detached);
            }
        }
    }

    #[test]
    fn test_fixed_iterations() {
        assert_eq!(Profile::Record.resolve_iterations(None).unwrap(), 125);
        assert_eq!(Profile::Record.resolve_iterations(Some(125)).unwrap(), 125);
        assert!(Profile::Record.resolve_iterations(Some(3)).is_err());
    }

    #[test]
    fn test_caller_iterations() {
        assert_eq!(Profile::File.resolve_iterations(Some(7)).unwrap(), 7);
        assert!(Profile::File.resolve_iterations(None).is_err());
    }
}
