use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tabvault_core::config::MigrationConfig;
use tabvault_core::{Namespace, VaultError, VaultResult};
use tabvault_store::{Envelope, GetOptions, SecureStore, SetOptions};

use crate::backup::{self, BackupSnapshot, RestoreOptions, RestoreReport};
use crate::metrics::MigrationMetrics;
use crate::recommend::{self, Recommendation};
use crate::record::{
    MigrationRecord, MigrationStatus, MigrationSummary, REASON_ALREADY_MIGRATED,
    REASON_CORRUPTED, REASON_NOT_FOUND,
};

#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// TTL for the migrated record. Falls back to the manager default.
    pub expires_in: Option<Duration>,
    pub namespace: Option<Namespace>,
}

impl MigrateOptions {
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn namespace(mut self, ns: Namespace) -> Self {
        self.namespace = Some(ns);
        self
    }
}

/// Physical form of one key, as reported by [`MigrationManager::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Absent,
    Plain,
    Migrated,
}

/// Moves legacy plaintext records into encrypted envelopes.
///
/// Every operation goes through the same [`SecureStore`], so namespacing and
/// key material match what readers use.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    store: SecureStore,
    metrics: MigrationMetrics,
    verify_writes: bool,
    default_expires_in: Option<Duration>,
}

impl MigrationManager {
    pub fn new(store: SecureStore) -> Self {
        MigrationManager {
            store,
            metrics: MigrationMetrics::default(),
            verify_writes: true,
            default_expires_in: None,
        }
    }

    pub fn from_config(store: SecureStore, config: &MigrationConfig) -> Self {
        MigrationManager {
            verify_writes: config.verify_writes,
            default_expires_in: config.default_expires_in_ms.map(Duration::from_millis),
            ..Self::new(store)
        }
    }

    /// Share counters with an already registered [`MigrationMetrics`].
    pub fn with_metrics(mut self, metrics: MigrationMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_verification(mut self, verify_writes: bool) -> Self {
        self.verify_writes = verify_writes;
        self
    }

    pub fn store(&self) -> &SecureStore {
        &self.store
    }

    pub fn metrics(&self) -> &MigrationMetrics {
        &self.metrics
    }

    /// Migrate one key. Never returns an error: every outcome, including a
    /// storage failure, is reported in the record.
    pub fn migrate_key(&self, key: &str, opts: &MigrateOptions) -> MigrationRecord {
        let record = self.migrate_one(key, opts);
        match record.status {
            MigrationStatus::Succeeded => self.metrics.succeeded.inc(),
            MigrationStatus::Skipped => self.metrics.skipped.inc(),
            MigrationStatus::Failed => self.metrics.failed.inc(),
        };
        record
    }

    fn migrate_one(&self, key: &str, opts: &MigrateOptions) -> MigrationRecord {
        let pkey = self.store.physical_key(key, opts.namespace.as_ref());

        let Some(raw) = self.store.read_physical(&pkey) else {
            return MigrationRecord::skipped(key, REASON_NOT_FOUND);
        };
        if Envelope::is_envelope(&raw) {
            return MigrationRecord::skipped(key, REASON_ALREADY_MIGRATED);
        }

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %pkey, "refusing to migrate corrupted record: {e}");
                return MigrationRecord::failed(key, REASON_CORRUPTED);
            }
        };

        let set_opts = SetOptions {
            encrypt: true,
            expires_in: opts.expires_in.or(self.default_expires_in),
            namespace: opts.namespace.clone(),
        };

        // Envelope replaces the plaintext in one write, and only if nobody
        // else touched the record since we read it.
        match self.store.replace(key, &raw, &value, &set_opts) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(key = %pkey, "record changed during migration");
                return MigrationRecord::skipped(key, REASON_ALREADY_MIGRATED);
            }
            Err(e) => return MigrationRecord::failed(key, e.to_string()),
        }

        if self.verify_writes {
            self.verify(key, &pkey, &value, opts.namespace.as_ref());
        }

        tracing::info!(key = %pkey, "migrated record to encrypted envelope");
        MigrationRecord::succeeded(key)
    }

    fn verify(&self, key: &str, pkey: &str, expected: &Value, namespace: Option<&Namespace>) {
        let get_opts = GetOptions {
            decrypt: true,
            namespace: namespace.cloned(),
        };
        let back: Option<Value> = self.store.get(key, &get_opts);
        if back.as_ref() != Some(expected) {
            self.metrics.verification_warnings.inc();
            tracing::warn!(
                key = %pkey,
                readable = back.is_some(),
                "migrated record failed read-back verification; keeping the write"
            );
        }
    }

    /// Migrate every key independently. A failing key never stops the batch.
    pub fn migrate_all_keys<S: AsRef<str>>(
        &self,
        keys: &[S],
        opts: &MigrateOptions,
    ) -> MigrationSummary {
        let summary: MigrationSummary = keys
            .iter()
            .map(|key| self.migrate_key(key.as_ref(), opts))
            .collect();

        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch migration finished"
        );
        summary
    }

    /// Turn an envelope back into a plaintext record.
    ///
    /// This re-exposes the value to anything that can read the raw store and
    /// exists for diagnostics and recovery only. Absent and already-plain
    /// keys are left alone.
    pub fn rollback_migration(&self, key: &str, namespace: Option<&Namespace>) -> VaultResult<()> {
        let pkey = self.store.physical_key(key, namespace);

        let Some(raw) = self.store.read_physical(&pkey) else {
            return Ok(());
        };
        if !Envelope::is_envelope(&raw) {
            tracing::debug!(key = %pkey, "rollback: record is already plaintext");
            return Ok(());
        }

        let get_opts = GetOptions {
            decrypt: true,
            namespace: namespace.cloned(),
        };
        let Some(value) = self.store.get::<Value>(key, &get_opts) else {
            return Err(VaultError::Crypto(format!(
                "cannot roll back {pkey}: record is expired or not decryptable in this session"
            )));
        };

        tracing::warn!(key = %pkey, "rolling back migration; value is stored as plaintext again");

        let set_opts = SetOptions {
            namespace: namespace.cloned(),
            ..Default::default()
        };
        if !self.store.replace(key, &raw, &value, &set_opts)? {
            return Err(VaultError::Storage(format!(
                "cannot roll back {pkey}: record changed concurrently"
            )));
        }
        self.metrics.rollbacks.inc();
        Ok(())
    }

    /// Every physical key under this store's default namespace (or every
    /// key when it has none).
    pub fn tracked_keys(&self) -> VaultResult<Vec<String>> {
        // physical_key of the empty key is exactly the namespace prefix
        let prefix = self.store.physical_key("", None);
        let mut keys = self.store.raw().keys()?;
        keys.retain(|k| k.starts_with(&prefix));
        Ok(keys)
    }

    /// Logical names of every tracked key (namespace prefix removed).
    pub fn managed_keys(&self) -> VaultResult<Vec<String>> {
        let prefix = self.store.physical_key("", None);
        Ok(self
            .tracked_keys()?
            .iter()
            .filter_map(|k| k.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect())
    }

    /// Snapshot the physical records of `keys`, or of every tracked key.
    /// Nothing is decrypted.
    pub fn create_backup(&self, keys: Option<&[String]>) -> VaultResult<BackupSnapshot> {
        let physical = match keys {
            Some(keys) => keys
                .iter()
                .map(|k| self.store.physical_key(k, None))
                .collect(),
            None => self.tracked_keys()?,
        };
        let snapshot = BackupSnapshot::capture(self.store.raw().as_ref(), &physical)?;
        tracing::info!(records = snapshot.len(), "created backup");
        Ok(snapshot)
    }

    /// Restore a snapshot document produced by [`BackupSnapshot::to_json`].
    ///
    /// An unparseable document is rejected before anything is touched. After
    /// that, individual write failures are reported, not rolled back.
    pub fn restore_backup(&self, json: &str, opts: RestoreOptions) -> VaultResult<RestoreReport> {
        let snapshot = BackupSnapshot::parse(json)?;
        let tracked = if opts.clear_first {
            self.tracked_keys()?
        } else {
            Vec::new()
        };

        let report = backup::restore(self.store.raw().as_ref(), &snapshot, &tracked, opts);
        tracing::info!(
            restored = report.restored,
            cleared = report.cleared,
            "restored backup"
        );
        Ok(report)
    }

    pub fn get_migration_recommendations<S: AsRef<str>>(&self, keys: &[S]) -> Vec<Recommendation> {
        recommend::get_migration_recommendations(keys)
    }

    pub fn is_migrated(&self, key: &str, namespace: Option<&Namespace>) -> bool {
        self.store.is_migrated(key, namespace)
    }

    /// Physical form of each key, without decrypting.
    pub fn status<S: AsRef<str>>(
        &self,
        keys: &[S],
        namespace: Option<&Namespace>,
    ) -> Vec<(String, KeyState)> {
        keys.iter()
            .map(|key| {
                let key = key.as_ref();
                let pkey = self.store.physical_key(key, namespace);
                let state = match self.store.read_physical(&pkey) {
                    None => KeyState::Absent,
                    Some(raw) if Envelope::is_envelope(&raw) => KeyState::Migrated,
                    Some(_) => KeyState::Plain,
                };
                (key.to_string(), state)
            })
            .collect()
    }
}
