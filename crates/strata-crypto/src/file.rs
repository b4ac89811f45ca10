//! Shared files: content, filename and description under one capability
//!
//! - content: `Profile::File`, password = capability file key (embedded tag)
//! - filename / description: `Profile::Label`, passwords = metadata sub-keys
//! - metadata tag: `Profile::MetadataTag` detached tag over
//!   `filename ␟ description ␟ content tag`, password = file key
//!
//! The metadata tag ties the visible name and description to the content
//! they were uploaded with, so neither can be swapped independently.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capability::Capability;
use crate::error::{CryptoError, CryptoResult};
use crate::integrity::{seal_detached_tag, verify_detached_tag};
use crate::kdf::MetadataSubkeys;
use crate::pipeline::{self, CiphertextBlob};
use crate::profile::Profile;

/// Argon2id passes for the caller-sourced profiles a file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIterations {
    pub content: u32,
    pub label: u32,
    pub metadata_tag: u32,
}

/// The four artifacts stored for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedFile {
    pub content: CiphertextBlob,
    pub name: CiphertextBlob,
    pub description: CiphertextBlob,
    pub metadata_tag: CiphertextBlob,
}

#[derive(Debug)]
pub struct OpenedFile {
    pub content: Vec<u8>,
    pub name: String,
    pub description: String,
    /// Embedded content tag matched
    pub content_ok: bool,
    /// Every artifact unpadded cleanly
    pub padding_ok: bool,
    /// Detached metadata tag matched name, description and content tag
    pub metadata_ok: bool,
}

impl OpenedFile {
    pub fn is_trusted(&self) -> bool {
        self.content_ok && self.padding_ok && self.metadata_ok
    }
}

pub fn seal_file(
    content: &[u8],
    name: &str,
    description: &str,
    capability: &Capability,
    iterations: &FileIterations,
) -> CryptoResult<SealedFile> {
    let subkeys = MetadataSubkeys::derive(capability.metadata_key())?;
    let file_key = capability.file_key();

    let (content_blob, content_tag) = pipeline::encrypt_tagged(
        content,
        file_key,
        None,
        Some(iterations.content),
        Profile::File,
    )?;
    let Some(content_tag) = content_tag else {
        return Err(CryptoError::Profile {
            profile: Profile::File.name(),
            reason: "content sealed without an embedded tag".into(),
        });
    };

    let name_blob = pipeline::encrypt(
        name.as_bytes(),
        subkeys.filename(),
        None,
        Some(iterations.label),
        Profile::Label,
    )?;
    let description_blob = pipeline::encrypt(
        description.as_bytes(),
        subkeys.description(),
        None,
        Some(iterations.label),
        Profile::Label,
    )?;

    let metadata_tag = seal_detached_tag(
        &[name.as_bytes(), description.as_bytes(), &content_tag[..]],
        file_key,
        Some(iterations.metadata_tag),
        Profile::MetadataTag,
    )?;

    debug!(
        file_id = %capability.file_id,
        content_len = content.len(),
        "sealed file"
    );
    Ok(SealedFile {
        content: content_blob,
        name: name_blob,
        description: description_blob,
        metadata_tag,
    })
}

pub fn open_file(
    sealed: &SealedFile,
    capability: &Capability,
    iterations: &FileIterations,
) -> CryptoResult<OpenedFile> {
    let subkeys = MetadataSubkeys::derive(capability.metadata_key())?;
    let file_key = capability.file_key();

    let mut content = pipeline::decrypt(
        &sealed.content,
        file_key,
        Some(iterations.content),
        Profile::File,
    )?;
    let mut name = pipeline::decrypt(
        &sealed.name,
        subkeys.filename(),
        Some(iterations.label),
        Profile::Label,
    )?;
    let mut description = pipeline::decrypt(
        &sealed.description,
        subkeys.description(),
        Some(iterations.label),
        Profile::Label,
    )?;

    let metadata_ok = match content.embedded_tag {
        Some(content_tag) => verify_detached_tag(
            &sealed.metadata_tag,
            &[&name.plaintext[..], &description.plaintext[..], &content_tag[..]],
            file_key,
            Some(iterations.metadata_tag),
            Profile::MetadataTag,
        )?,
        None => false,
    };

    let opened = OpenedFile {
        content_ok: content.integrity_ok,
        padding_ok: content.padding_ok && name.padding_ok && description.padding_ok,
        metadata_ok,
        content: std::mem::take(&mut content.plaintext),
        name: String::from_utf8_lossy(&std::mem::take(&mut name.plaintext)).into_owned(),
        description: String::from_utf8_lossy(&std::mem::take(&mut description.plaintext))
            .into_owned(),
    };
    if !opened.is_trusted() {
        warn!(
            file_id = %capability.file_id,
            content_ok = opened.content_ok,
            padding_ok = opened.padding_ok,
            metadata_ok = opened.metadata_ok,
            "opened file failed verification"
        );
    }
    Ok(opened)
}
