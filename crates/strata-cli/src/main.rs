//! strata: end-to-end encrypted file sharing CLI
//!
//! Commands:
//!   keygen                         - derive the master key, create a Kyber key pair
//!   encrypt <file>                 - seal a file and print its capability tag
//!   decrypt <sealed> --tag <tag>   - open a sealed file with a capability tag
//!   share --tag <tag> --to <user>  - send a capability to another user's inbox
//!   receive                        - open capabilities in your inbox
//!   sent                           - list capabilities you have sent
//!   vault add|show                 - password vault entries
//!   tag check <tag>                - validate a pasted capability tag
//!   config show                    - display current configuration

mod keystore;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use strata_core::config::{self, LogFormat, StrataConfig};
use strata_crypto::kem::{open_secret_key, seal_secret_key};
use strata_crypto::{
    derive_master_key, open_entry, open_file, open_inbox_entry, open_sent, seal_entry,
    seal_file, seal_for_recipient, seal_sent, Capability, FileIterations, KemKeyPair, MasterKey,
    SealedFile, SentCapability, UserId, VaultEntry,
};

use keystore::Keystore;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    version,
    about = "End-to-end encrypted file sharing",
    long_about = "strata: seal files, share their capability tags over Kyber1024, keep a password vault"
)]
struct Cli {
    /// Path to strata.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "STRATA_CONFIG",
        default_value = "~/.config/strata/strata.toml"
    )]
    config: PathBuf,

    /// Acting user id (16 characters; overrides keystore.user_id)
    #[arg(long, short = 'u', env = "STRATA_USER", global = true)]
    user: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "STRATA_LOG", global = true)]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "STRATA_LOG_FORMAT", global = true)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Json,
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Text => LogFormat::Text,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive the master key and create a Kyber1024 key pair
    ///
    /// Without --user a fresh user id is generated and printed.
    Keygen {
        /// Replace an existing key pair
        #[arg(long)]
        force: bool,
    },

    /// Seal a file; prints the capability tag that opens it
    Encrypt {
        input: PathBuf,
        /// Output path (default: <input>.strata)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Stored file name (default: input file name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Open a sealed file with its capability tag
    Decrypt {
        input: PathBuf,
        /// Capability tag: owner,fileId,base64(metadataKey),base64(fileKey)
        #[arg(long, env = "STRATA_TAG")]
        tag: String,
        /// Output path (default: the stored file name in the current directory)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Fail instead of writing output that did not verify
        #[arg(long)]
        strict: bool,
    },

    /// Send a capability tag to another user's inbox
    Share {
        #[arg(long, env = "STRATA_TAG")]
        tag: String,
        /// Recipient user id
        #[arg(long)]
        to: String,
    },

    /// Open the capabilities in your inbox
    Receive,

    /// List the capabilities you have sent
    Sent,

    /// Password vault
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },

    /// Capability tag utilities
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum VaultAction {
    /// Add an entry; the entry password is prompted for
    Add {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        login: String,
        #[arg(long, default_value = "")]
        website: String,
    },
    /// Show entries, optionally only those with a matching title
    Show {
        title: Option<String>,
        /// Print entry passwords
        #[arg(long)]
        reveal: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TagAction {
    /// Validate a capability tag and print its ids
    Check { tag: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = config::expand_tilde(&cli.config);
    let loaded = load_config(&config_path).await?;
    let config = loaded.clone().unwrap_or_default();

    init_logging(
        cli.log.as_deref().unwrap_or(config.logging.level.as_str()),
        cli.log_format.map(Into::into).unwrap_or(config.logging.format),
    );
    if loaded.is_none() {
        warn!(
            "config file not found: {}  (using defaults)",
            config_path.display()
        );
    } else if config.config_file_mode_check {
        config::check_file_mode(&config_path)?;
    }

    let store = Keystore::new(config.keystore.resolved_dir());
    let user = cli.user.clone().or_else(|| config.keystore.user_id.clone());

    match cli.command {
        Commands::Keygen { force } => cmd_keygen(&config, &store, user, force).await,
        Commands::Encrypt {
            input,
            output,
            name,
            description,
        } => {
            let owner = require_user(user)?;
            cmd_encrypt(&config, &owner, &input, output, name, description).await
        }
        Commands::Decrypt {
            input,
            tag,
            output,
            strict,
        } => cmd_decrypt(&config, &input, &tag, output, strict).await,
        Commands::Share { tag, to } => {
            let me = require_user(user)?;
            cmd_share(&config, &store, &me, &tag, &to).await
        }
        Commands::Receive => cmd_receive(&config, &store, &require_user(user)?).await,
        Commands::Sent => cmd_sent(&config, &store, &require_user(user)?).await,
        Commands::Vault { action } => {
            let me = require_user(user)?;
            match action {
                VaultAction::Add {
                    title,
                    login,
                    website,
                } => cmd_vault_add(&config, &store, &me, title, login, website).await,
                VaultAction::Show { title, reveal } => {
                    cmd_vault_show(&config, &store, &me, title.as_deref(), reveal).await
                }
            }
        }
        Commands::Tag {
            action: TagAction::Check { tag },
        } => cmd_tag_check(&tag),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path, loaded.is_some()),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// `None` when the file does not exist
async fn load_config(path: &Path) -> Result<Option<StrataConfig>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config: {}", path.display()))?;
    Ok(Some(StrataConfig::from_toml(&content, path)?))
}

fn require_user(user: Option<String>) -> Result<UserId> {
    let user = user.context("no user id; pass --user or set keystore.user_id in the config")?;
    Ok(UserId::new(user)?)
}

fn file_iterations(config: &StrataConfig) -> FileIterations {
    FileIterations {
        content: config.crypto.file_iterations,
        label: config.crypto.label_iterations,
        metadata_tag: config.crypto.metadata_tag_iterations,
    }
}

/// Read the login password from `STRATA_PASSWORD` or the terminal.
fn read_password(prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("STRATA_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

/// Run CPU-bound crypto off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("crypto task panicked")?
}

async fn unlock(config: &StrataConfig, user: &UserId) -> Result<MasterKey> {
    let password = read_password("Password: ")?;
    let user = user.clone();
    let iterations = config.crypto.master_key_iterations;
    blocking(move || Ok(derive_master_key(&password, &user, iterations)?)).await
}

async fn unlock_keypair(
    config: &StrataConfig,
    store: &Keystore,
    user: &UserId,
) -> Result<KemKeyPair> {
    let sealed = store.sealed_secret_key(user).await?;
    let public_key = store.public_key(user).await?;
    let master = unlock(config, user).await?;

    let iterations = config.crypto.key_material_iterations;
    let opened = blocking(move || Ok(open_secret_key(&sealed, public_key, &master, iterations)?))
        .await?;
    opened
        .into_trusted()
        .context("key pair did not verify (wrong password or damaged key file)")
}

// ── `strata keygen` ───────────────────────────────────────────────────────────

async fn cmd_keygen(
    config: &StrataConfig,
    store: &Keystore,
    user: Option<String>,
    force: bool,
) -> Result<()> {
    let user = match user {
        Some(id) => UserId::new(id)?,
        None => {
            let id = UserId::generate();
            println!("generated user id: {id}");
            id
        }
    };
    if store.has_keys(&user).await && !force {
        anyhow::bail!("user {user} already has a key pair (use --force to replace it)");
    }

    let master = unlock(config, &user).await?;
    let iterations = config.crypto.key_material_iterations;
    let (public_key, sealed) = blocking(move || {
        let pair = KemKeyPair::generate();
        let sealed = seal_secret_key(&pair, &master, iterations)?;
        Ok((pair.public_key.clone(), sealed))
    })
    .await?;

    store.store_keys(&user, &public_key, &sealed).await?;
    info!(user = %user, "key pair created");
    println!("key pair stored for {user}");
    Ok(())
}

// ── `strata encrypt` / `strata decrypt` ───────────────────────────────────────

async fn cmd_encrypt(
    config: &StrataConfig,
    owner: &UserId,
    input: &Path,
    output: Option<PathBuf>,
    name: Option<String>,
    description: String,
) -> Result<()> {
    let content = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let name = name
        .or_else(|| input.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let capability = Capability::generate(owner.clone());
    let iterations = file_iterations(config);
    let cap = capability.clone();
    let sealed = blocking(move || {
        Ok(seal_file(&content, &name, &description, &cap, &iterations)?)
    })
    .await?;

    let output = output.unwrap_or_else(|| {
        let mut p = input.as_os_str().to_owned();
        p.push(".strata");
        PathBuf::from(p)
    });
    let json = serde_json::to_vec_pretty(&sealed).context("serializing sealed file")?;
    tokio::fs::write(&output, json)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    info!(file_id = %capability.file_id, output = %output.display(), "file sealed");
    println!("{capability}");
    Ok(())
}

async fn cmd_decrypt(
    config: &StrataConfig,
    input: &Path,
    tag: &str,
    output: Option<PathBuf>,
    strict: bool,
) -> Result<()> {
    let capability: Capability = tag.parse().context("invalid capability tag")?;
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let sealed: SealedFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing sealed file {}", input.display()))?;

    let iterations = file_iterations(config);
    let opened = blocking(move || Ok(open_file(&sealed, &capability, &iterations)?)).await?;

    if !opened.is_trusted() {
        eprintln!(
            "warning: verification failed (content_ok={}, padding_ok={}, metadata_ok={})",
            opened.content_ok, opened.padding_ok, opened.metadata_ok
        );
        if strict {
            anyhow::bail!("refusing to write unverified output");
        }
    }

    let output = match output {
        Some(p) => p,
        None => Path::new(&opened.name)
            .file_name()
            .map(PathBuf::from)
            .context("stored file name is unusable; pass --output")?,
    };
    tokio::fs::write(&output, &opened.content)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    println!("name:        {}", opened.name);
    println!("description: {}", opened.description);
    println!("written to:  {}", output.display());
    Ok(())
}

// ── `strata share` / `receive` / `sent` ───────────────────────────────────────

async fn cmd_share(
    config: &StrataConfig,
    store: &Keystore,
    me: &UserId,
    tag: &str,
    to: &str,
) -> Result<()> {
    let capability: Capability = tag.parse().context("invalid capability tag")?;
    let recipient = UserId::new(to)?;
    let recipient_pk = store.public_key(&recipient).await?;
    let master = unlock(config, me).await?;

    let sent = SentCapability {
        recipient_id: recipient.clone(),
        capability: capability.clone(),
    };
    let (entry, audit) = blocking(move || {
        let entry = seal_for_recipient(&sent.capability, &recipient_pk)?;
        let audit = seal_sent(&sent, &master)?;
        Ok((entry, audit))
    })
    .await?;

    let path = store
        .deliver(&recipient, &capability.owner_id, &capability.file_id, &entry)
        .await?;
    store
        .record_sent(me, &recipient, &capability.file_id, &audit)
        .await?;

    info!(file_id = %capability.file_id, to = %recipient, inbox = %path.display(), "capability shared");
    println!("shared {} with {recipient}", capability.file_id);
    Ok(())
}

async fn cmd_receive(config: &StrataConfig, store: &Keystore, me: &UserId) -> Result<()> {
    let inbox = store.inbox(me).await?;
    if inbox.is_empty() {
        println!("inbox is empty");
        return Ok(());
    }
    let pair = unlock_keypair(config, store, me).await?;

    let results = blocking(move || {
        inbox
            .into_iter()
            .map(|(path, entry)| Ok((path, open_inbox_entry(&entry, pair.secret_key())?)))
            .collect::<Result<Vec<_>>>()
    })
    .await?;

    for (path, received) in results {
        match received.capability {
            Some(cap) if received.integrity_ok && received.padding_ok => {
                println!("{}  from {}\n  {cap}", cap.file_id, cap.owner_id);
            }
            _ => {
                warn!(path = %path.display(), "inbox entry failed verification");
                println!("{}  (unverified, skipped)", path.display());
            }
        }
    }
    Ok(())
}

async fn cmd_sent(config: &StrataConfig, store: &Keystore, me: &UserId) -> Result<()> {
    let records = store.sent(me).await?;
    if records.is_empty() {
        println!("nothing sent");
        return Ok(());
    }
    let master = unlock(config, me).await?;

    let results = blocking(move || {
        records
            .into_iter()
            .map(|(path, blob)| Ok((path, open_sent(&blob, &master)?)))
            .collect::<Result<Vec<_>>>()
    })
    .await?;

    for (path, opened) in results {
        let valid = opened.is_valid();
        match opened.capability {
            Some(sent) if valid => println!(
                "{}  to {}  (owner {})",
                sent.capability.file_id, sent.recipient_id, sent.capability.owner_id
            ),
            _ => println!("{}  (unverified)", path.display()),
        }
    }
    Ok(())
}

// ── `strata vault` ────────────────────────────────────────────────────────────

async fn cmd_vault_add(
    config: &StrataConfig,
    store: &Keystore,
    me: &UserId,
    title: String,
    login: String,
    website: String,
) -> Result<()> {
    let master = unlock(config, me).await?;
    let entry_password =
        rpassword::prompt_password("Entry password: ").context("reading entry password")?;
    let entry = VaultEntry {
        title,
        login,
        password: entry_password,
        website,
    };

    let iterations = config.crypto.vault_iterations;
    let sealed = blocking(move || Ok(seal_entry(&entry, &master, iterations)?)).await?;
    let path = store.add_vault_entry(me, &sealed).await?;
    info!(path = %path.display(), "vault entry stored");
    Ok(())
}

async fn cmd_vault_show(
    config: &StrataConfig,
    store: &Keystore,
    me: &UserId,
    title: Option<&str>,
    reveal: bool,
) -> Result<()> {
    let sealed = store.vault(me).await?;
    let master = unlock(config, me).await?;

    let iterations = config.crypto.vault_iterations;
    let opened = blocking(move || {
        sealed
            .into_iter()
            .map(|(path, s)| Ok((path, open_entry(&s, &master, iterations)?)))
            .collect::<Result<Vec<_>>>()
    })
    .await?;

    for (path, entry) in opened {
        if title.is_some_and(|t| t != entry.entry.title) {
            continue;
        }
        if !(entry.verified && entry.padding_ok) {
            println!("{}  (unverified)", path.display());
            continue;
        }
        let e = &entry.entry;
        println!("title:    {}", e.title);
        println!("login:    {}", e.login);
        println!(
            "password: {}",
            if reveal { e.password.as_str() } else { "********" }
        );
        println!("website:  {}", e.website);
        println!();
    }
    Ok(())
}

// ── `strata tag check` / `config show` ────────────────────────────────────────

fn cmd_tag_check(tag: &str) -> Result<()> {
    let capability: Capability = tag.parse().context("invalid capability tag")?;
    println!("owner:   {}", capability.owner_id);
    println!("file id: {}", capability.file_id);
    println!("ok");
    Ok(())
}

fn cmd_config_show(config: &StrataConfig, config_path: &Path, found: bool) -> Result<()> {
    if found {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
