//! On-disk layout for one strata home directory
//!
//! ```text
//! <dir>/users/<user_id>/kem.pub           Kyber1024 public key (hex)
//! <dir>/users/<user_id>/kem.sec           secret key, sealed under the master key (hex blob)
//! <dir>/users/<user_id>/inbox/*.json      capabilities other users sent here
//! <dir>/users/<user_id>/sent/*.hex        audit copies of capabilities sent from here
//! <dir>/users/<user_id>/vault/*.json      vault entries
//! ```
//!
//! The `users/` tree doubles as the public-key directory: sharing with a
//! user reads their `kem.pub` and writes into their `inbox/`.
//!
//! Ids arrive from pasted capability tags, so every id that becomes part of
//! a path goes through [`path_component`] first.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use strata_crypto::{CiphertextBlob, FileId, InboxEntry, SealedEntry, UserId};
use tracing::debug;

pub struct Keystore {
    root: PathBuf,
}

impl Keystore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn user_dir(&self, user: &UserId) -> Result<PathBuf> {
        Ok(self.root.join("users").join(path_component(user.as_str())?))
    }

    fn public_key_path(&self, user: &UserId) -> Result<PathBuf> {
        Ok(self.user_dir(user)?.join("kem.pub"))
    }

    fn secret_key_path(&self, user: &UserId) -> Result<PathBuf> {
        Ok(self.user_dir(user)?.join("kem.sec"))
    }

    pub async fn has_keys(&self, user: &UserId) -> bool {
        let Ok(path) = self.secret_key_path(user) else {
            return false;
        };
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    pub async fn store_keys(
        &self,
        user: &UserId,
        public_key: &[u8],
        sealed_secret: &CiphertextBlob,
    ) -> Result<()> {
        let dir = self.user_dir(user)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        write_private(&self.secret_key_path(user)?, sealed_secret.to_hex().as_bytes()).await?;
        let pub_path = self.public_key_path(user)?;
        tokio::fs::write(&pub_path, hex::encode(public_key))
            .await
            .with_context(|| format!("writing {}", pub_path.display()))?;
        debug!(user = %user, "stored key pair");
        Ok(())
    }

    pub async fn public_key(&self, user: &UserId) -> Result<Vec<u8>> {
        let path = self.public_key_path(user)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("no public key for user {user} (looked in {})", path.display()))?;
        hex::decode(text.trim()).with_context(|| format!("decoding {}", path.display()))
    }

    pub async fn sealed_secret_key(&self, user: &UserId) -> Result<CiphertextBlob> {
        let path = self.secret_key_path(user)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("no key pair for user {user}; run `strata keygen` first"))?;
        CiphertextBlob::from_hex(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub async fn deliver(
        &self,
        recipient: &UserId,
        owner: &UserId,
        file_id: &FileId,
        entry: &InboxEntry,
    ) -> Result<PathBuf> {
        let name = format!(
            "{}-{}.json",
            path_component(owner.as_str())?,
            path_component(file_id.as_str())?
        );
        let dir = self.user_dir(recipient)?.join("inbox");
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(name);
        tokio::fs::write(&path, entry.to_bytes()?)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub async fn inbox(&self, user: &UserId) -> Result<Vec<(PathBuf, InboxEntry)>> {
        let mut out = Vec::new();
        for path in list(&self.user_dir(user)?.join("inbox"), "json").await? {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let entry = InboxEntry::from_bytes(&bytes)
                .with_context(|| format!("parsing {}", path.display()))?;
            out.push((path, entry));
        }
        Ok(out)
    }

    pub async fn record_sent(
        &self,
        user: &UserId,
        recipient: &UserId,
        file_id: &FileId,
        sealed: &CiphertextBlob,
    ) -> Result<()> {
        let name = format!(
            "{}-{}.hex",
            path_component(file_id.as_str())?,
            path_component(recipient.as_str())?
        );
        let dir = self.user_dir(user)?.join("sent");
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        write_private(&dir.join(name), sealed.to_hex().as_bytes()).await
    }

    pub async fn sent(&self, user: &UserId) -> Result<Vec<(PathBuf, CiphertextBlob)>> {
        let mut out = Vec::new();
        for path in list(&self.user_dir(user)?.join("sent"), "hex").await? {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let blob = CiphertextBlob::from_hex(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            out.push((path, blob));
        }
        Ok(out)
    }

    pub async fn add_vault_entry(&self, user: &UserId, sealed: &SealedEntry) -> Result<PathBuf> {
        let dir = self.user_dir(user)?.join("vault");
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        // Titles are encrypted, so entries are stored under random names
        let path = dir.join(format!("{}.json", FileId::generate()));
        let json = serde_json::to_vec_pretty(sealed).context("serializing vault entry")?;
        write_private(&path, &json).await?;
        Ok(path)
    }

    pub async fn vault(&self, user: &UserId) -> Result<Vec<(PathBuf, SealedEntry)>> {
        let mut out = Vec::new();
        for path in list(&self.user_dir(user)?.join("vault"), "json").await? {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let sealed: SealedEntry = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", path.display()))?;
            out.push((path, sealed));
        }
        Ok(out)
    }
}

/// An id usable as (part of) a single file name: no separators, no dots.
fn path_component(id: &str) -> Result<&str> {
    if id.is_empty() || id.bytes().any(|b| matches!(b, b'/' | b'\\' | b'.' | b':')) {
        bail!("id {id:?} cannot be used as a keystore path");
    }
    Ok(id)
}

/// Files in `dir` with extension `ext`, sorted; a missing directory is empty.
async fn list(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };
    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("listing {}", dir.display()))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == ext) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

async fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("restricting {}", path.display()))?;
    }
    Ok(())
}
