//! HMAC-SHA512 binding
//!
//! Two strategies share the same primitive:
//! - embedded: the pipeline prepends `HMAC(mac_key, plaintext)` to the
//!   payload (see [`crate::pipeline`]);
//! - detached: an HMAC over several already-decrypted fields joined by
//!   [`FIELD_SEPARATOR`] is encrypted on its own and stored next to them.
//!
//! Detached tags are keyed with the aux window of the tag artifact's own
//! key blob, never its MAC window.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use tracing::{debug, warn};

use crate::error::{CryptoError, CryptoResult};
use crate::pipeline::{self, CiphertextBlob};
use crate::profile::{Integrity, Profile};
use crate::{kdf, TAG_SIZE};

pub type HmacSha512 = Hmac<Sha512>;

/// Joins the fields covered by a detached tag (ASCII unit separator).
pub const FIELD_SEPARATOR: u8 = 0x1F;

pub fn compute_tag(mac_key: &[u8], data: &[u8]) -> CryptoResult<[u8; TAG_SIZE]> {
    let mut mac = <HmacSha512 as KeyInit>::new_from_slice(mac_key)
        .map_err(|e| CryptoError::Mac(e.to_string()))?;
    mac.update(data);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

/// Byte-for-byte comparison over the full length of both tags.
pub fn tags_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn join_fields(fields: &[&[u8]]) -> Vec<u8> {
    let len = fields.iter().map(|f| f.len() + 1).sum::<usize>();
    let mut joined = Vec::with_capacity(len);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            joined.push(FIELD_SEPARATOR);
        }
        joined.extend_from_slice(field);
    }
    joined
}

fn detached_profile_check(profile: Profile) -> CryptoResult<()> {
    if profile.integrity() != Integrity::Detached || profile.aux_window().is_none() {
        return Err(CryptoError::Profile {
            profile: profile.name(),
            reason: "detached tags need a detached profile with a verification key window".into(),
        });
    }
    Ok(())
}

/// Compute and encrypt a detached tag over `fields`.
///
/// The HMAC is keyed with the verification (aux) window of the tag
/// artifact's own derived blob; the 64-byte tag then goes through the
/// ratchet and CBC layers with no embedded tag.
pub fn seal_detached_tag(
    fields: &[&[u8]],
    password: &[u8],
    iterations: Option<u32>,
    profile: Profile,
) -> CryptoResult<CiphertextBlob> {
    detached_profile_check(profile)?;
    let iterations = profile.resolve_iterations(iterations)?;

    let salt = kdf::random_salt();
    let blob = kdf::derive_for_profile(password, &salt, iterations, profile)?;
    let verification_key = blob
        .aux_key(profile)
        .ok_or_else(|| CryptoError::Profile {
            profile: profile.name(),
            reason: "missing verification key window".into(),
        })?;

    let tag = compute_tag(verification_key, &join_fields(fields))?;

    debug!(profile = %profile, fields = fields.len(), "sealed detached tag");
    Ok(pipeline::seal_layers(&salt, &blob, tag.to_vec()))
}

/// Decrypt a detached tag and compare it with a fresh HMAC over `fields`.
///
/// Returns `Ok(false)` on any mismatch, including bad padding on the tag
/// artifact; `Err` only for structural problems.
pub fn verify_detached_tag(
    sealed: &CiphertextBlob,
    fields: &[&[u8]],
    password: &[u8],
    iterations: Option<u32>,
    profile: Profile,
) -> CryptoResult<bool> {
    detached_profile_check(profile)?;
    let iterations = profile.resolve_iterations(iterations)?;

    let blob = kdf::derive_for_profile(password, sealed.salt(), iterations, profile)?;
    let verification_key = blob
        .aux_key(profile)
        .ok_or_else(|| CryptoError::Profile {
            profile: profile.name(),
            reason: "missing verification key window".into(),
        })?;

    let opened = pipeline::open_layers(sealed, &blob)?;
    let expected = compute_tag(verification_key, &join_fields(fields))?;
    let matches = tags_match(&opened.plaintext, &expected);

    if !(matches && opened.padding_ok) {
        warn!(
            profile = %profile,
            padding_ok = opened.padding_ok,
            "detached tag does not match the supplied fields"
        );
    }
    Ok(matches && opened.padding_ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sha512_rfc4231_case_2() {
        let tag = compute_tag(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(tag),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554\
             9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn test_tag_accepts_any_key_length() {
        assert!(compute_tag(&[], b"data").is_ok());
        assert!(compute_tag(&[0x42; 64], b"data").is_ok());
        // Keys longer than the SHA-512 block are hashed first
        assert_ne!(
            compute_tag(&[0x42; 200], b"data").unwrap(),
            compute_tag(&[0x42; 199], b"data").unwrap()
        );
    }

    #[test]
    fn test_tags_compare_full_length() {
        let a = [1u8; TAG_SIZE];
        let mut b = a;
        assert!(tags_match(&a, &b));
        b[TAG_SIZE - 1] ^= 1;
        assert!(!tags_match(&a, &b), "last byte counts");
        assert!(!tags_match(&a, &a[..32]), "prefix is not a match");
    }

    #[test]
    fn test_join_is_unambiguous_for_shifted_boundaries() {
        let a = join_fields(&[&b"ab"[..], &b"c"[..]]);
        let b = join_fields(&[&b"a"[..], &b"bc"[..]]);
        assert_ne!(a, b);
        assert_eq!(a, b"ab\x1fc");
        assert!(join_fields(&[]).is_empty());
    }

    #[test]
    fn test_detached_roundtrip() {
        let fields: [&[u8]; 3] = [b"report.pdf", b"Q3 numbers", b"content-tag"];
        let sealed = seal_detached_tag(&fields, b"pw", Some(1), Profile::MetadataTag).unwrap();
        assert!(verify_detached_tag(&sealed, &fields, b"pw", Some(1), Profile::MetadataTag).unwrap());
    }

    #[test]
    fn test_detached_rejects_changed_field() {
        let fields: [&[u8]; 2] = [b"title", b"login"];
        let sealed = seal_detached_tag(&fields, b"pw", Some(1), Profile::VaultTag).unwrap();

        let changed: [&[u8]; 2] = [b"title", b"l0gin"];
        assert!(!verify_detached_tag(&sealed, &changed, b"pw", Some(1), Profile::VaultTag).unwrap());
    }

    #[test]
    fn test_detached_rejects_wrong_password() {
        let fields: [&[u8]; 1] = [b"only"];
        let sealed = seal_detached_tag(&fields, b"pw", Some(1), Profile::VaultTag).unwrap();
        assert!(!verify_detached_tag(&sealed, &fields, b"other", Some(1), Profile::VaultTag).unwrap());
    }

    #[test]
    fn test_detached_needs_verification_window() {
        let fields: [&[u8]; 1] = [b"x"];
        assert!(seal_detached_tag(&fields, b"pw", Some(1), Profile::Label).is_err());
        assert!(seal_detached_tag(&fields, b"pw", None, Profile::Record).is_err());
    }
}
