//! Verbatim snapshots of physical records.
//!
//! A snapshot is one JSON object mapping each physical key to its record
//! exactly as stored (raw JSON text or envelope text). Creating one never
//! decrypts, so it needs no session key; restoring writes the same strings
//! back, so restored records are byte-identical.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tabvault_core::{VaultError, VaultResult};
use tabvault_store::RawStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupSnapshot {
    pub records: BTreeMap<String, String>,
}

impl BackupSnapshot {
    /// Capture `keys` (physical keys) as currently stored. Absent keys are
    /// left out of the snapshot.
    pub fn capture<S: AsRef<str>>(raw: &dyn RawStore, keys: &[S]) -> VaultResult<Self> {
        let mut records = BTreeMap::new();
        for key in keys {
            let key = key.as_ref();
            if let Some(value) = raw.get_item(key)? {
                records.insert(key.to_string(), value);
            }
        }
        Ok(BackupSnapshot { records })
    }

    pub fn to_json(&self) -> VaultResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a snapshot document. Anything but an object of strings is
    /// rejected.
    pub fn parse(json: &str) -> VaultResult<Self> {
        serde_json::from_str(json).map_err(|e| VaultError::InvalidBackup(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Remove tracked keys that are not in the snapshot.
    pub clear_first: bool,
}

/// What a restore actually did. Restores are not transactional: a write
/// failure leaves the keys before it restored and is listed in `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub cleared: usize,
    pub failed: Vec<(String, String)>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Write every snapshot record back. `tracked` is the current set of
/// managed physical keys, consulted only for `clear_first`.
pub fn restore(
    raw: &dyn RawStore,
    snapshot: &BackupSnapshot,
    tracked: &[String],
    opts: RestoreOptions,
) -> RestoreReport {
    let mut report = RestoreReport::default();

    if opts.clear_first {
        for key in tracked.iter().filter(|k| !snapshot.records.contains_key(*k)) {
            match raw.remove_item(key) {
                Ok(()) => report.cleared += 1,
                Err(e) => {
                    tracing::warn!(key = %key, "restore: failed to clear key: {e}");
                    report.failed.push((key.clone(), e.to_string()));
                }
            }
        }
    }

    for (key, value) in &snapshot.records {
        match raw.set_item(key, value) {
            Ok(()) => report.restored += 1,
            Err(e) => {
                tracing::warn!(key = %key, "restore: failed to write key: {e}");
                report.failed.push((key.clone(), e.to_string()));
            }
        }
    }

    if !report.is_complete() {
        tracing::warn!(
            restored = report.restored,
            failed = report.failed.len(),
            "backup only partially restored"
        );
    }
    report
}
