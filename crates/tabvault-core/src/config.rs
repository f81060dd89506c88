use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};
use crate::types::Namespace;

/// Top-level configuration (loaded from tabvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub store: StoreConfig,
    pub crypto: CryptoConfig,
    pub binding: BindingConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding the exported raw store (default: ~/.local/share/tabvault/store.json)
    pub path: PathBuf,
    /// Byte quota across all records (None = unbounded)
    pub quota_bytes: Option<usize>,
    /// Namespace applied when a command does not name one
    pub namespace: Option<Namespace>,
}

/// Session key derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Environment variable holding the shared key-derivation secret
    pub secret_env: String,
    /// Salt mixed into HKDF (default: "tabvault-session-v1")
    pub session_salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Cross-tab propagation debounce window in milliseconds (default: 100)
    pub sync_debounce_ms: u64,
    /// Whether bindings listen for other tabs' writes by default
    pub sync_across_tabs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Read each migrated key back after writing it (default: true)
    pub verify_writes: bool,
    /// TTL applied to migrated records when the caller gives none
    pub default_expires_in_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/tabvault/store.json"),
            quota_bytes: None,
            namespace: None,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            secret_env: "TABVAULT_SECRET".into(),
            session_salt: "tabvault-session-v1".into(),
        }
    }
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            sync_debounce_ms: 100,
            sync_across_tabs: true,
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            verify_writes: true,
            default_expires_in_ms: None,
        }
    }
}

impl VaultConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| VaultError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[store]
path = "/tmp/tabvault.json"
quota_bytes = 5242880
namespace = "tenant-7"

[crypto]
secret_env = "MY_SECRET"
session_salt = "salt-1"

[binding]
sync_debounce_ms = 250
sync_across_tabs = false

[migration]
verify_writes = false
default_expires_in_ms = 86400000
"#;
        let config: VaultConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.store.path, PathBuf::from("/tmp/tabvault.json"));
        assert_eq!(config.store.quota_bytes, Some(5_242_880));
        assert_eq!(config.store.namespace.as_ref().unwrap().as_str(), "tenant-7");
        assert_eq!(config.crypto.secret_env, "MY_SECRET");
        assert_eq!(config.binding.sync_debounce_ms, 250);
        assert!(!config.binding.sync_across_tabs);
        assert!(!config.migration.verify_writes);
        assert_eq!(config.migration.default_expires_in_ms, Some(86_400_000));
    }

    #[test]
    fn test_parse_defaults() {
        let config: VaultConfig = toml::from_str("").unwrap();

        assert_eq!(config.store.quota_bytes, None);
        assert!(config.store.namespace.is_none());
        assert_eq!(config.crypto.secret_env, "TABVAULT_SECRET");
        assert_eq!(config.binding.sync_debounce_ms, 100);
        assert!(config.binding.sync_across_tabs);
        assert!(config.migration.verify_writes);
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let result: Result<VaultConfig, _> = toml::from_str("[store]\nnamespace = \"a:b\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.binding.sync_debounce_ms, 100);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabvault.toml");
        std::fs::write(&path, "[binding]\nsync_debounce_ms = 40\n").unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.binding.sync_debounce_ms, 40);
        assert_eq!(config.crypto.session_salt, "tabvault-session-v1");
    }
}
