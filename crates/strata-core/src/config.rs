use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{StrataError, StrataResult};

/// Top-level configuration (loaded from strata.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub logging: LoggingConfig,
    pub crypto: CryptoConfig,
    pub keystore: KeystoreConfig,
    /// Warn if the config file is readable by group or others (default: true)
    pub config_file_mode_check: bool,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            crypto: CryptoConfig::default(),
            keystore: KeystoreConfig::default(),
            config_file_mode_check: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

/// Argon2id pass counts per use. Memory cost and parallelism are fixed by
/// the blob format and not configurable.
///
/// Changing a value makes data sealed under the old value unreadable with
/// the new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub file_iterations: u32,
    pub label_iterations: u32,
    pub metadata_tag_iterations: u32,
    pub vault_iterations: u32,
    pub key_material_iterations: u32,
    pub master_key_iterations: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            file_iterations: 20,
            label_iterations: 20,
            metadata_tag_iterations: 20,
            vault_iterations: 50,
            key_material_iterations: 75,
            master_key_iterations: 100,
        }
    }
}

impl CryptoConfig {
    fn validate(&self) -> StrataResult<()> {
        let counts = [
            ("file_iterations", self.file_iterations),
            ("label_iterations", self.label_iterations),
            ("metadata_tag_iterations", self.metadata_tag_iterations),
            ("vault_iterations", self.vault_iterations),
            ("key_material_iterations", self.key_material_iterations),
            ("master_key_iterations", self.master_key_iterations),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(StrataError::Config(format!(
                    "crypto.{name} must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

/// Local storage for keys, inbox entries, sent records and vault entries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    pub dir: PathBuf,
    /// Default 16-character user id for commands that need one
    pub user_id: Option<String>,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/strata"),
            user_id: None,
        }
    }
}

impl KeystoreConfig {
    /// `dir` with a leading `~/` expanded to `$HOME`
    pub fn resolved_dir(&self) -> PathBuf {
        expand_tilde(&self.dir)
    }
}

impl StrataConfig {
    /// Parse and validate a TOML document. `origin` names it in errors.
    pub fn from_toml(content: &str, origin: &Path) -> StrataResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| StrataError::Config(format!("parsing {}: {e}", origin.display())))?;
        config.crypto.validate()?;
        Ok(config)
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var_os("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        Err(_) => path.to_path_buf(),
    }
}

/// Warn when a config file is readable by anyone but its owner.
///
/// Returns whether the mode was acceptable (always true off Unix).
pub fn check_file_mode(path: &Path) -> StrataResult<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = std::fs::metadata(path)?.permissions().mode();
        if mode & 0o077 != 0 {
            tracing::warn!(
                path = %path.display(),
                mode = %format!("{:o}", mode & 0o777),
                "config file is accessible by group or others"
            );
            return Ok(false);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
config_file_mode_check = false

[logging]
level = "debug"
format = "json"

[crypto]
file_iterations = 4
label_iterations = 5
metadata_tag_iterations = 6
vault_iterations = 7
key_material_iterations = 8
master_key_iterations = 9

[keystore]
dir = "/var/lib/strata"
user_id = "alice00000000000"
"#;
        let config = StrataConfig::from_toml(toml_str, Path::new("test.toml")).unwrap();

        assert!(!config.config_file_mode_check);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.crypto.file_iterations, 4);
        assert_eq!(config.crypto.master_key_iterations, 9);
        assert_eq!(config.keystore.dir, PathBuf::from("/var/lib/strata"));
        assert_eq!(config.keystore.user_id.as_deref(), Some("alice00000000000"));
    }

    #[test]
    fn test_parse_defaults() {
        let config = StrataConfig::from_toml("", Path::new("empty.toml")).unwrap();

        assert!(config.config_file_mode_check);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.crypto, CryptoConfig::default());
        assert_eq!(config.crypto.vault_iterations, 50);
        assert!(config.keystore.user_id.is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[crypto]
vault_iterations = 12
"#;
        let config = StrataConfig::from_toml(toml_str, Path::new("p.toml")).unwrap();

        // Overridden
        assert_eq!(config.crypto.vault_iterations, 12);
        // Defaults
        assert_eq!(config.crypto.file_iterations, 20);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let err = StrataConfig::from_toml("[crypto]\nfile_iterations = 0\n", Path::new("z.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("file_iterations"));
    }

    #[test]
    fn test_bad_format_names_file() {
        let err = StrataConfig::from_toml("[logging]\nformat = \"xml\"\n", Path::new("bad.toml"))
            .unwrap_err();
        assert!(matches!(err, StrataError::Config(ref m) if m.contains("bad.toml")));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = StrataConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = StrataConfig::from_toml(&toml_str, Path::new("rt.toml")).unwrap();

        assert_eq!(config.crypto, parsed.crypto);
        assert_eq!(config.keystore.dir, parsed.keystore.dir);
        assert_eq!(config.logging.format, parsed.logging.format);
    }

    #[test]
    fn test_expand_tilde() {
        let home = std::env::var("HOME").unwrap_or_default();
        assert_eq!(
            expand_tilde(Path::new("~/.local/share/strata")),
            PathBuf::from(home).join(".local/share/strata")
        );
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_check() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "").unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(check_file_mode(&path).unwrap());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!check_file_mode(&path).unwrap());
    }
}
