//! Shared in-memory origin storage with per-tab handles.
//!
//! Models the browser-resident store: one map shared by every tab of an
//! origin, synchronous reads and writes, an optional byte quota, and a
//! storage-change notification delivered to every tab except the writer.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use uuid::Uuid;

use tabvault_core::VaultResult;

use crate::raw::{check_quota, RawStore, StorageEvent, StorageEvents, TabId};

const EVENT_CAPACITY: usize = 256;

struct SharedInner {
    items: RwLock<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
    events: broadcast::Sender<StorageEvent>,
}

/// The shared physical store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<SharedInner>,
}

impl SharedStorage {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A store that rejects writes once keys + values exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self::build(Some(bytes))
    }

    fn build(quota_bytes: Option<usize>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        SharedStorage {
            inner: Arc::new(SharedInner {
                items: RwLock::new(BTreeMap::new()),
                quota_bytes,
                events,
            }),
        }
    }

    /// Attach a new tab with its own identity.
    pub fn open_tab(&self) -> TabStorage {
        TabStorage {
            id: Uuid::new_v4(),
            shared: self.inner.clone(),
        }
    }

    /// Bytes currently used (sum of key and value lengths).
    pub fn used_bytes(&self) -> usize {
        let items = self.inner.items.read().unwrap_or_else(PoisonError::into_inner);
        items.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// Copy of every record, for inspection.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for SharedStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStorage")
            .field("used_bytes", &self.used_bytes())
            .field("quota_bytes", &self.inner.quota_bytes)
            .finish()
    }
}

/// One tab's handle on a [`SharedStorage`].
#[derive(Clone)]
pub struct TabStorage {
    id: TabId,
    shared: Arc<SharedInner>,
}

impl TabStorage {
    pub fn id(&self) -> TabId {
        self.id
    }

    fn write_items(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.shared
            .items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.shared.events.send(StorageEvent {
            key: key.to_string(),
            old_value,
            new_value,
            origin: self.id,
        });
    }
}

impl RawStore for TabStorage {
    fn get_item(&self, key: &str) -> VaultResult<Option<String>> {
        let items = self
            .shared
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> VaultResult<()> {
        let old = {
            let mut items = self.write_items();
            check_quota(&items, self.shared.quota_bytes, key, value)?;
            items.insert(key.to_string(), value.to_string())
        };

        if old.as_deref() != Some(value) {
            self.notify(key, old, Some(value.to_string()));
        }
        Ok(())
    }

    fn replace_item(&self, key: &str, expected: &str, value: &str) -> VaultResult<bool> {
        let old = {
            let mut items = self.write_items();
            if items.get(key).map(String::as_str) != Some(expected) {
                return Ok(false);
            }
            check_quota(&items, self.shared.quota_bytes, key, value)?;
            items.insert(key.to_string(), value.to_string())
        };

        self.notify(key, old, Some(value.to_string()));
        Ok(true)
    }

    fn remove_item(&self, key: &str) -> VaultResult<()> {
        let old = self.write_items().remove(key);

        if old.is_some() {
            self.notify(key, old, None);
        }
        Ok(())
    }

    fn keys(&self) -> VaultResult<Vec<String>> {
        let items = self
            .shared
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(items.keys().cloned().collect())
    }

    fn subscribe(&self) -> Option<StorageEvents> {
        Some(StorageEvents::new(self.shared.events.subscribe(), self.id))
    }
}

impl std::fmt::Debug for TabStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabStorage").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabs_share_records() {
        let shared = SharedStorage::new();
        let a = shared.open_tab();
        let b = shared.open_tab();

        a.set_item("k", "\"v\"").unwrap();
        assert_eq!(b.get_item("k").unwrap().as_deref(), Some("\"v\""));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn remove_absent_is_noop() {
        let tab = SharedStorage::new().open_tab();
        tab.remove_item("missing").unwrap();
        tab.remove_item("missing").unwrap();
        assert!(tab.keys().unwrap().is_empty());
    }

    #[test]
    fn quota_rejects_oversized_write() {
        let shared = SharedStorage::with_quota(16);
        let tab = shared.open_tab();

        tab.set_item("a", "1234567890").unwrap();
        let err = tab.set_item("b", "1234567890").unwrap_err();
        assert!(err.is_quota());
        // Rejected write leaves nothing behind
        assert!(tab.get_item("b").unwrap().is_none());
        assert_eq!(shared.used_bytes(), 11);
    }

    #[test]
    fn quota_counts_replacement_not_addition() {
        let shared = SharedStorage::with_quota(12);
        let tab = shared.open_tab();
        tab.set_item("a", "1234567890").unwrap();
        // Same key, same size: still fits
        tab.set_item("a", "0987654321").unwrap();
        assert_eq!(shared.used_bytes(), 11);
    }

    #[test]
    fn replace_item_checks_expected() {
        let tab = SharedStorage::new().open_tab();
        tab.set_item("k", "old").unwrap();

        assert!(!tab.replace_item("k", "stale", "new").unwrap());
        assert_eq!(tab.get_item("k").unwrap().as_deref(), Some("old"));

        assert!(tab.replace_item("k", "old", "new").unwrap());
        assert_eq!(tab.get_item("k").unwrap().as_deref(), Some("new"));

        assert!(!tab.replace_item("absent", "old", "new").unwrap());
    }

    #[test]
    fn own_writes_do_not_wake_listener() {
        let shared = SharedStorage::new();
        let tab = shared.open_tab();
        let other = shared.open_tab();
        let mut events = tab.subscribe().unwrap();

        let mut recv = tokio_test::task::spawn(async move { events.recv().await });
        tokio_test::assert_pending!(recv.poll());

        tab.set_item("k", "1").unwrap();
        tokio_test::assert_pending!(recv.poll());

        other.set_item("k", "2").unwrap();
        let event = tokio_test::assert_ready!(recv.poll()).unwrap();
        assert_eq!(event.new_value.as_deref(), Some("2"));
        assert_eq!(event.origin, other.id());
    }

    #[test]
    fn unchanged_write_is_silent() {
        let shared = SharedStorage::new();
        let writer = shared.open_tab();
        let mut events = shared.open_tab().subscribe().unwrap();

        writer.set_item("k", "same").unwrap();
        writer.set_item("k", "same").unwrap();
        writer.remove_item("absent").unwrap();

        let mut recv = tokio_test::task::spawn(async move {
            let first = events.recv().await;
            let second = events.recv().await;
            (first, second)
        });
        // Only the first write produced an event
        tokio_test::assert_pending!(recv.poll());
    }

    #[tokio::test]
    async fn events_skip_the_writer() {
        let shared = SharedStorage::new();
        let writer = shared.open_tab();
        let reader = shared.open_tab();

        let mut own = writer.subscribe().unwrap();
        let mut other = reader.subscribe().unwrap();

        writer.set_item("theme", "\"dark\"").unwrap();
        reader.remove_item("theme").unwrap();

        let seen = other.recv().await.unwrap();
        assert_eq!(seen.key, "theme");
        assert_eq!(seen.new_value.as_deref(), Some("\"dark\""));
        assert_eq!(seen.origin, writer.id());

        // The writer only sees the reader's removal
        let removal = own.recv().await.unwrap();
        assert_eq!(removal.new_value, None);
        assert_eq!(removal.old_value.as_deref(), Some("\"dark\""));
        assert_eq!(removal.origin, reader.id());
    }
}
