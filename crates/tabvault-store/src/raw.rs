//! The raw persistent store contract and its change notifications.

use std::collections::BTreeMap;

use tokio::sync::broadcast;
use uuid::Uuid;

use tabvault_core::{VaultError, VaultResult};

/// Identifies one tab/window attached to a shared store.
pub type TabId = Uuid;

/// Synchronous string key-value store (the browser-resident storage model).
///
/// Implementations are best-effort: writes may fail with
/// [`VaultError::QuotaExceeded`].
/// Every call is a single read or a single write; nothing is held locked
/// between calls.
pub trait RawStore: Send + Sync {
    fn get_item(&self, key: &str) -> VaultResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> VaultResult<()>;

    /// Remove `key`. Removing an absent key is a no-op.
    fn remove_item(&self, key: &str) -> VaultResult<()>;

    /// Every physical key currently present.
    fn keys(&self) -> VaultResult<Vec<String>>;

    /// Write `value` only if `key` still holds `expected`. Returns `false`
    /// and writes nothing when the record changed in between.
    ///
    /// The default is a read followed by a write. Backends shared by several
    /// writers override it so the check and the write are one step.
    fn replace_item(&self, key: &str, expected: &str, value: &str) -> VaultResult<bool> {
        if self.get_item(key)?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.set_item(key, value)?;
        Ok(true)
    }

    /// Change notifications for writes made by *other* handles, if the
    /// backend can deliver them.
    fn subscribe(&self) -> Option<StorageEvents> {
        None
    }
}

/// A write or removal observed on the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
    pub origin: TabId,
}

/// Receiver half of a store subscription. Events originating from the
/// subscribing tab itself are filtered out.
pub struct StorageEvents {
    rx: broadcast::Receiver<StorageEvent>,
    own: TabId,
}

impl StorageEvents {
    pub fn new(rx: broadcast::Receiver<StorageEvent>, own: TabId) -> Self {
        StorageEvents { rx, own }
    }

    /// Next event from another tab; `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.own => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, tab = %self.own, "storage event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl<T: RawStore + ?Sized> RawStore for std::sync::Arc<T> {
    fn get_item(&self, key: &str) -> VaultResult<Option<String>> {
        (**self).get_item(key)
    }
    fn set_item(&self, key: &str, value: &str) -> VaultResult<()> {
        (**self).set_item(key, value)
    }
    fn remove_item(&self, key: &str) -> VaultResult<()> {
        (**self).remove_item(key)
    }
    fn keys(&self) -> VaultResult<Vec<String>> {
        (**self).keys()
    }
    fn replace_item(&self, key: &str, expected: &str, value: &str) -> VaultResult<bool> {
        (**self).replace_item(key, expected, value)
    }
    fn subscribe(&self) -> Option<StorageEvents> {
        (**self).subscribe()
    }
}

/// Reject writing `key = value` into `items` if the result would exceed
/// `quota` bytes (keys plus values).
pub(crate) fn check_quota(
    items: &BTreeMap<String, String>,
    quota: Option<usize>,
    key: &str,
    value: &str,
) -> VaultResult<()> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let used: usize = items.iter().map(|(k, v)| k.len() + v.len()).sum();
    let replaced = items.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
    let needed = used - replaced + key.len() + value.len();
    if needed > quota {
        return Err(VaultError::QuotaExceeded {
            key: key.to_string(),
            needed,
            quota,
        });
    }
    Ok(())
}
