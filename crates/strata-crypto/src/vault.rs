//! Password-vault records
//!
//! Each field is its own `Profile::VaultField` blob under the master key; a
//! `Profile::VaultTag` detached tag binds `title ␟ login ␟ password ␟ website`
//! so fields cannot be shuffled between records.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::error::CryptoResult;
use crate::integrity::{seal_detached_tag, verify_detached_tag};
use crate::keys::MasterKey;
use crate::pipeline::{self, CiphertextBlob, Decrypted};
use crate::profile::Profile;

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub title: String,
    pub login: String,
    pub password: String,
    pub website: String,
}

impl VaultEntry {
    fn fields(&self) -> [&[u8]; 4] {
        [
            self.title.as_bytes(),
            self.login.as_bytes(),
            self.password.as_bytes(),
            self.website.as_bytes(),
        ]
    }
}

impl Drop for VaultEntry {
    fn drop(&mut self) {
        self.password.zeroize();
        self.login.zeroize();
    }
}

impl fmt::Debug for VaultEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultEntry")
            .field("title", &self.title)
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .field("website", &self.website)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEntry {
    pub title: CiphertextBlob,
    pub login: CiphertextBlob,
    pub password: CiphertextBlob,
    pub website: CiphertextBlob,
    pub tag: CiphertextBlob,
}

#[derive(Debug)]
pub struct OpenedEntry {
    /// Best effort: invalid UTF-8 is replaced, never rejected
    pub entry: VaultEntry,
    pub padding_ok: bool,
    /// The detached tag matched the four recovered fields
    pub verified: bool,
}

pub fn seal_entry(
    entry: &VaultEntry,
    master: &MasterKey,
    iterations: u32,
) -> CryptoResult<SealedEntry> {
    let key = master.as_bytes();
    let seal = |field: &str| {
        pipeline::encrypt(field.as_bytes(), key, None, Some(iterations), Profile::VaultField)
    };

    let sealed = SealedEntry {
        title: seal(&entry.title)?,
        login: seal(&entry.login)?,
        password: seal(&entry.password)?,
        website: seal(&entry.website)?,
        tag: seal_detached_tag(&entry.fields(), key, Some(iterations), Profile::VaultTag)?,
    };
    debug!(title_len = entry.title.len(), "sealed vault entry");
    Ok(sealed)
}

pub fn open_entry(
    sealed: &SealedEntry,
    master: &MasterKey,
    iterations: u32,
) -> CryptoResult<OpenedEntry> {
    let key = master.as_bytes();
    let open = |blob: &CiphertextBlob| {
        pipeline::decrypt(blob, key, Some(iterations), Profile::VaultField)
    };

    let parts: [Decrypted; 4] = [
        open(&sealed.title)?,
        open(&sealed.login)?,
        open(&sealed.password)?,
        open(&sealed.website)?,
    ];
    let padding_ok = parts.iter().all(|p| p.padding_ok);

    let [title, login, password, website] = &parts;
    let verified = verify_detached_tag(
        &sealed.tag,
        &[
            &title.plaintext[..],
            &login.plaintext[..],
            &password.plaintext[..],
            &website.plaintext[..],
        ],
        key,
        Some(iterations),
        Profile::VaultTag,
    )?;

    let lossy = |d: &Decrypted| String::from_utf8_lossy(&d.plaintext).into_owned();
    let entry = VaultEntry {
        title: lossy(title),
        login: lossy(login),
        password: lossy(password),
        website: lossy(website),
    };

    if !(verified && padding_ok) {
        warn!(padding_ok, verified, "vault entry failed verification");
    }
    Ok(OpenedEntry {
        entry,
        padding_ok,
        verified,
    })
}
