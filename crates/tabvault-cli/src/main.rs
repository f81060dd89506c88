//! tabvault: inspect and maintain an exported tabvault store
//!
//! Record commands:
//!   get <key> [--decrypt]               - print a stored value
//!   set <key> <json> [--encrypt]        - write a value (non-JSON is stored as a string)
//!   rm <key>                            - delete a record
//!
//! Migration commands:
//!   status [<key>...]                   - plain / migrated / absent per key
//!   migrate [<key>...] [--all]          - encrypt plaintext records in place
//!   rollback <key>                      - turn an envelope back into plaintext
//!   backup [<key>...] [--out <file>]    - snapshot physical records verbatim
//!   restore <file> [--clear-first]      - write a snapshot back
//!   recommend [<key>...]                - rank keys by sensitivity
//!
//! Encrypted records need the shared secret in the environment variable named
//! by `crypto.secret_env` (default TABVAULT_SECRET).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use prometheus_client::registry::Registry;
use secrecy::SecretString;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tabvault_core::config::VaultConfig;
use tabvault_core::{Namespace, VaultError};
use tabvault_crypto::{CryptoProvider, KeySession, SessionKey};
use tabvault_migrate::{
    KeyState, MigrateOptions, MigrationManager, MigrationMetrics, MigrationStatus, Priority,
    RestoreOptions,
};
use tabvault_store::{FileStore, GetOptions, SecureStore, SetOptions};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tabvault",
    version,
    about = "Encrypted tab storage maintenance",
    long_about = "tabvault: read, write, migrate, and back up records in an exported tabvault store"
)]
struct Cli {
    /// Path to tabvault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "TABVAULT_CONFIG",
        default_value = "~/.config/tabvault/config.toml"
    )]
    config: PathBuf,

    /// Store file (overrides store.path)
    #[arg(long, short = 's', env = "TABVAULT_STORE")]
    store: Option<PathBuf>,

    /// Namespace for logical keys (overrides store.namespace)
    #[arg(long, short = 'n', value_parser = parse_namespace)]
    namespace: Option<Namespace>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TABVAULT_LOG", default_value = "warn")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "TABVAULT_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a stored value as JSON
    Get {
        key: String,
        /// Decrypt envelope records (needs the shared secret)
        #[arg(long, short = 'd')]
        decrypt: bool,
    },

    /// Write a value
    Set {
        key: String,
        /// Value as JSON; anything that does not parse is stored as a string
        value: String,
        /// Store as an encrypted envelope (needs the shared secret)
        #[arg(long, short = 'e')]
        encrypt: bool,
        /// Expire the encrypted record after this many milliseconds
        #[arg(long, requires = "encrypt")]
        expires_in_ms: Option<u64>,
    },

    /// Delete a record
    #[command(alias = "remove")]
    Rm { key: String },

    /// Show whether keys are plaintext, migrated, or absent
    Status {
        /// Keys to check (default: every key in the store)
        keys: Vec<String>,
    },

    /// Encrypt plaintext records in place
    Migrate {
        /// Keys to migrate
        #[arg(required_unless_present = "all")]
        keys: Vec<String>,
        /// Migrate every key in the store
        #[arg(long, conflicts_with = "keys")]
        all: bool,
        /// Expire migrated records after this many milliseconds
        #[arg(long)]
        expires_in_ms: Option<u64>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
        /// Print migration counters in OpenMetrics text format
        #[arg(long)]
        metrics: bool,
    },

    /// Decrypt a migrated record back to plaintext (re-exposes the value)
    Rollback { key: String },

    /// Snapshot physical records without decrypting them
    Backup {
        /// Keys to include (default: every key in the store)
        keys: Vec<String>,
        /// Write the snapshot here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Write a snapshot back into the store
    Restore {
        /// Snapshot file produced by `tabvault backup`
        file: PathBuf,
        /// Remove keys that are not in the snapshot first
        #[arg(long)]
        clear_first: bool,
    },

    /// Rank keys by how urgently they should be encrypted
    Recommend {
        /// Key names to score (default: every key in the store)
        keys: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

impl Commands {
    /// Whether the command cannot work without the shared secret.
    fn needs_secret(&self) -> bool {
        match self {
            Commands::Get { decrypt, .. } => *decrypt,
            Commands::Set { encrypt, .. } => *encrypt,
            Commands::Migrate { .. } | Commands::Rollback { .. } => true,
            _ => false,
        }
    }
}

fn parse_namespace(s: &str) -> Result<Namespace, VaultError> {
    Namespace::new(s)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    let config_path = expand_tilde(&cli.config);
    let config = VaultConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    if let Commands::Config { action: ConfigAction::Show } = cli.command {
        return cmd_config_show(&config, &config_path);
    }

    let vault = Vault::open(
        &config,
        cli.store.as_deref(),
        cli.namespace.clone(),
        cli.command.needs_secret(),
    )?;

    tracing::debug!(store = %vault.file.path().display(), "opened store");

    match cli.command {
        Commands::Get { key, decrypt } => cmd_get(&vault, &key, decrypt)?,
        Commands::Set { key, value, encrypt, expires_in_ms } => {
            cmd_set(&vault, &key, &value, encrypt, expires_in_ms)?
        }
        Commands::Rm { key } => cmd_rm(&vault, &key)?,
        Commands::Status { keys } => cmd_status(&vault, keys)?,
        Commands::Migrate { keys, all, expires_in_ms, json, metrics } => {
            cmd_migrate(&vault, keys, all, expires_in_ms, json, metrics)?
        }
        Commands::Rollback { key } => cmd_rollback(&vault, &key)?,
        Commands::Backup { keys, out } => cmd_backup(&vault, keys, out.as_deref()).await?,
        Commands::Restore { file, clear_first } => cmd_restore(&vault, &file, clear_first).await?,
        Commands::Recommend { keys } => cmd_recommend(&vault, keys)?,
        Commands::Config { .. } => {}
    }

    vault
        .file
        .flush()
        .with_context(|| format!("writing store: {}", vault.file.path().display()))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr; stdout carries command output
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

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(format!("{home}/{rest}"))
    } else {
        path.to_path_buf()
    }
}

// ── Store wiring ──────────────────────────────────────────────────────────────

struct Vault {
    file: Arc<FileStore>,
    store: SecureStore,
    manager: MigrationManager,
}

impl Vault {
    fn open(
        config: &VaultConfig,
        store_override: Option<&Path>,
        namespace: Option<Namespace>,
        needs_secret: bool,
    ) -> Result<Self> {
        let path = expand_tilde(store_override.unwrap_or(config.store.path.as_path()));
        let mut file = FileStore::open(&path)
            .with_context(|| format!("opening store: {}", path.display()))?;
        if let Some(quota) = config.store.quota_bytes {
            file = file.with_quota(quota);
        }
        let file = Arc::new(file);

        let session = open_session(config, needs_secret)?;
        let crypto = CryptoProvider::new(session).context("initializing encryption")?;

        let mut store = SecureStore::new(file.clone(), crypto);
        if let Some(ns) = namespace.or_else(|| config.store.namespace.clone()) {
            store = store.with_namespace(ns);
        }
        let manager = MigrationManager::from_config(store.clone(), &config.migration);

        Ok(Vault { file, store, manager })
    }

    /// Explicit keys, or every key in the store when none were given.
    fn keys_or_all(&self, keys: Vec<String>) -> Result<Vec<String>> {
        if !keys.is_empty() {
            return Ok(keys);
        }
        self.manager.managed_keys().context("listing store keys")
    }
}

/// Session key derived from the configured secret. Without a secret, a
/// throwaway key is used, which is enough for commands that never decrypt.
fn open_session(config: &VaultConfig, required: bool) -> Result<Arc<KeySession>> {
    match std::env::var(&config.crypto.secret_env) {
        Ok(secret) if !secret.is_empty() => {
            let secret = SecretString::from(secret);
            let key = SessionKey::derive(&secret, config.crypto.session_salt.as_bytes())
                .context("deriving session key")?;
            Ok(KeySession::start(key))
        }
        _ if required => anyhow::bail!(
            "{} is not set\n\
             Encrypted records need the shared key-derivation secret:\n\
             \texport {}=...",
            config.crypto.secret_env,
            config.crypto.secret_env
        ),
        _ => Ok(KeySession::ephemeral()),
    }
}

/// JSON if it parses, otherwise the raw text as a JSON string.
fn parse_value(input: &str) -> Value {
    serde_json::from_str(input).unwrap_or_else(|_| Value::String(input.to_string()))
}

// ── `tabvault get / set / rm` ─────────────────────────────────────────────────

fn cmd_get(vault: &Vault, key: &str, decrypt: bool) -> Result<()> {
    let opts = GetOptions {
        decrypt,
        namespace: None,
    };
    match vault.store.get::<Value>(key, &opts) {
        Some(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        None if !decrypt && vault.store.is_migrated(key, None) => {
            anyhow::bail!("{key}: record is encrypted (use --decrypt)")
        }
        None => anyhow::bail!("{key}: not found"),
    }
}

fn cmd_set(
    vault: &Vault,
    key: &str,
    value: &str,
    encrypt: bool,
    expires_in_ms: Option<u64>,
) -> Result<()> {
    let opts = SetOptions {
        encrypt,
        expires_in: expires_in_ms.map(Duration::from_millis),
        namespace: None,
    };
    vault
        .store
        .set(key, &parse_value(value), &opts)
        .with_context(|| format!("writing {key}"))?;
    println!("{key}: written{}", if encrypt { " (encrypted)" } else { "" });
    Ok(())
}

fn cmd_rm(vault: &Vault, key: &str) -> Result<()> {
    vault
        .store
        .remove(key, None)
        .with_context(|| format!("removing {key}"))?;
    println!("{key}: removed");
    Ok(())
}

// ── `tabvault status` ─────────────────────────────────────────────────────────

fn cmd_status(vault: &Vault, keys: Vec<String>) -> Result<()> {
    let keys = vault.keys_or_all(keys)?;
    let status = vault.manager.status(&keys, None);

    let migrated = status.iter().filter(|(_, s)| *s == KeyState::Migrated).count();
    let plain = status.iter().filter(|(_, s)| *s == KeyState::Plain).count();

    println!("store: {}", vault.file.path().display());
    println!("  records:  {}", vault.file.len());
    println!("  migrated: {migrated}");
    println!("  plain:    {plain}");
    println!();
    for (key, state) in &status {
        let label = match state {
            KeyState::Migrated => "migrated",
            KeyState::Plain => "plain",
            KeyState::Absent => "absent",
        };
        println!("  {label:<9} {key}");
    }
    Ok(())
}

// ── `tabvault migrate / rollback` ─────────────────────────────────────────────

fn cmd_migrate(
    vault: &Vault,
    keys: Vec<String>,
    all: bool,
    expires_in_ms: Option<u64>,
    json: bool,
    metrics: bool,
) -> Result<()> {
    let keys = if all { vault.keys_or_all(Vec::new())? } else { keys };
    let opts = MigrateOptions {
        expires_in: expires_in_ms.map(Duration::from_millis),
        namespace: None,
    };

    let counters = MigrationMetrics::new();
    let manager = vault.manager.clone().with_metrics(counters.clone());
    let summary = manager.migrate_all_keys(&keys, &opts);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for record in &summary.results {
            let status = match record.status {
                MigrationStatus::Succeeded => "migrated",
                MigrationStatus::Skipped => "skipped",
                MigrationStatus::Failed => "FAILED",
            };
            match &record.reason {
                Some(reason) => println!("  {status:<9} {}  ({reason})", record.key),
                None => println!("  {status:<9} {}", record.key),
            }
        }
        println!();
        println!("Migration complete:");
        println!("  migrated: {}", summary.succeeded);
        println!("  skipped:  {}", summary.skipped);
        println!("  failed:   {}", summary.failed);
        if counters.verification_warnings.get() > 0 {
            println!(
                "  warning:  {} record(s) failed read-back verification",
                counters.verification_warnings.get()
            );
        }
    }

    if metrics {
        let mut registry = Registry::default();
        counters.register(&mut registry);
        let mut body = String::new();
        prometheus_client::encoding::text::encode(&mut body, &registry)
            .context("encoding metrics")?;
        print!("{body}");
    }

    if !summary.is_clean() {
        anyhow::bail!("{} key(s) could not be migrated", summary.failed);
    }
    Ok(())
}

fn cmd_rollback(vault: &Vault, key: &str) -> Result<()> {
    eprintln!("warning: {key} will be stored as plaintext again");
    vault
        .manager
        .rollback_migration(key, None)
        .with_context(|| format!("rolling back {key}"))?;
    println!("{key}: rolled back");
    Ok(())
}

// ── `tabvault backup / restore` ───────────────────────────────────────────────

async fn cmd_backup(vault: &Vault, keys: Vec<String>, out: Option<&Path>) -> Result<()> {
    let snapshot = if keys.is_empty() {
        vault.manager.create_backup(None)?
    } else {
        vault.manager.create_backup(Some(keys.as_slice()))?
    };
    let json = snapshot.to_json()?;

    match out {
        Some(path) => {
            tokio::fs::write(path, json.as_bytes())
                .await
                .with_context(|| format!("writing backup: {}", path.display()))?;
            eprintln!("backed up {} record(s) to {}", snapshot.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_restore(vault: &Vault, file: &Path, clear_first: bool) -> Result<()> {
    let json = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading backup: {}", file.display()))?;

    let report = vault
        .manager
        .restore_backup(&json, RestoreOptions { clear_first })
        .with_context(|| format!("restoring {}", file.display()))?;

    println!("Restore complete:");
    println!("  restored: {}", report.restored);
    if clear_first {
        println!("  cleared:  {}", report.cleared);
    }
    for (key, err) in &report.failed {
        println!("  FAILED    {key}  ({err})");
    }
    if !report.is_complete() {
        anyhow::bail!("{} record(s) could not be restored", report.failed.len());
    }
    Ok(())
}

// ── `tabvault recommend` ──────────────────────────────────────────────────────

fn cmd_recommend(vault: &Vault, keys: Vec<String>) -> Result<()> {
    let keys = vault.keys_or_all(keys)?;
    for rec in vault.manager.get_migration_recommendations(&keys) {
        let priority = match rec.priority {
            Priority::Critical => "critical",
            Priority::Important => "important",
            Priority::Low => "low",
        };
        println!("  {priority:<10} {:<32} {}", rec.key, rec.reason);
    }
    Ok(())
}

// ── `tabvault config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &VaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
