//! Bindings in two tabs over one shared store.
//!
//! Plain bindings follow the other tab's writes after the debounce window;
//! encrypted bindings never do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use serde_json::{json, Value};

use tabvault_binding::{BindingOptions, ReactiveBinding};
use tabvault_core::{Namespace, VaultResult};
use tabvault_crypto::{CryptoProvider, KeySession};
use tabvault_store::{
    Envelope, GetOptions, RawStore, SecureStore, SetOptions, SharedStorage, TabStorage,
};

fn tab(shared: &SharedStorage) -> SecureStore {
    let crypto = CryptoProvider::new(KeySession::ephemeral()).unwrap();
    SecureStore::new(Arc::new(shared.open_tab()), crypto)
}

#[tokio::test(start_paused = true)]
async fn burst_from_other_tab_is_coalesced() {
    let shared = SharedStorage::new();
    let writer = tab(&shared);
    let binding = ReactiveBinding::new(
        tab(&shared),
        "count",
        0i64,
        BindingOptions::default().debounce(Duration::from_millis(100)),
    );
    let mut rx = binding.subscribe();

    for i in 1..=3i64 {
        writer.set("count", &i, &SetOptions::default()).unwrap();
    }

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), 3);

    // Only the last write of the burst was published
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn separate_writes_are_each_applied() {
    let shared = SharedStorage::new();
    let writer = tab(&shared);
    let binding = ReactiveBinding::new(tab(&shared), "theme", "light".to_string(), BindingOptions::default());
    let mut rx = binding.subscribe();

    writer.set("theme", "dark", &SetOptions::default()).unwrap();
    rx.changed().await.unwrap();
    assert_eq!(binding.get(), "dark");

    tokio::time::sleep(Duration::from_secs(1)).await;

    writer.set("theme", "solarized", &SetOptions::default()).unwrap();
    rx.changed().await.unwrap();
    assert_eq!(binding.get(), "solarized");
}

#[tokio::test(start_paused = true)]
async fn local_write_inside_window_is_not_overwritten() {
    let shared = SharedStorage::new();
    let writer = tab(&shared);
    let store = tab(&shared);
    let binding = ReactiveBinding::new(
        store.clone(),
        "theme",
        "light".to_string(),
        BindingOptions::default().debounce(Duration::from_millis(100)),
    );

    writer.set("theme", "from-other-tab", &SetOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    binding.set("local-newer".to_string()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let stored: String = store.get("theme", &GetOptions::default()).unwrap();
    assert_eq!(stored, "local-newer");
    assert_eq!(binding.get(), stored);
}

#[tokio::test(start_paused = true)]
async fn window_publishes_what_the_store_holds() {
    let shared = SharedStorage::new();
    let writer = tab(&shared);
    let binding = ReactiveBinding::new(
        tab(&shared),
        "count",
        0i64,
        BindingOptions::default().debounce(Duration::from_millis(100)),
    );

    writer.set("count", &1i64, &SetOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    binding.set(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    writer.set("count", &3i64, &SetOptions::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(binding.get(), 3);
    assert_eq!(shared.snapshot()["count"], "3");
}

#[tokio::test(start_paused = true)]
async fn removal_in_other_tab_resets_to_initial() {
    let shared = SharedStorage::new();
    let writer = tab(&shared);
    writer.set("draft", "hello", &SetOptions::default()).unwrap();

    let binding = ReactiveBinding::new(tab(&shared), "draft", String::new(), BindingOptions::default());
    assert_eq!(binding.get(), "hello");
    let mut rx = binding.subscribe();

    writer.remove("draft", None).unwrap();
    rx.changed().await.unwrap();
    assert_eq!(binding.get(), "");
}

#[tokio::test(start_paused = true)]
async fn unrelated_keys_and_own_writes_are_ignored() {
    let shared = SharedStorage::new();
    let writer = tab(&shared);
    let ns = Namespace::new("tenant").unwrap();

    let plain = ReactiveBinding::new(tab(&shared), "count", 0i64, BindingOptions::default());
    let scoped = ReactiveBinding::new(
        tab(&shared),
        "count",
        0i64,
        BindingOptions::default().namespace(ns.clone()),
    );
    let plain_rx = plain.subscribe();
    let mut scoped_rx = scoped.subscribe();

    writer
        .set("count", &9i64, &SetOptions::default().namespace(ns))
        .unwrap();
    writer.set("other", &1i64, &SetOptions::default()).unwrap();

    scoped_rx.changed().await.unwrap();
    assert_eq!(scoped.get(), 9);
    assert_eq!(scoped.physical_key(), "tenant:count");

    // The binding's own write comes back as a value change, not as an event
    plain.set(4).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(plain.get(), 4);
    assert!(plain_rx.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn sync_can_be_turned_off() {
    let shared = SharedStorage::new();
    let writer = tab(&shared);
    let binding = ReactiveBinding::new(
        tab(&shared),
        "count",
        0i64,
        BindingOptions::default().sync_across_tabs(false),
    );

    writer.set("count", &1i64, &SetOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(binding.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_binding_stops_listening() {
    let shared = SharedStorage::new();
    let writer = tab(&shared);
    let binding = ReactiveBinding::new(tab(&shared), "count", 0i64, BindingOptions::default());
    let mut rx = binding.subscribe();

    binding.unsubscribe();
    writer.set("count", &1i64, &SetOptions::default()).unwrap();

    // Sender is gone once the listener task is torn down
    assert!(rx.changed().await.is_err());
    assert_eq!(*rx.borrow(), 0);
}

#[tokio::test]
async fn encrypted_binding_does_not_follow_other_tabs() {
    let shared = SharedStorage::new();
    let writer = tab(&shared);
    let binding = ReactiveBinding::new(
        tab(&shared),
        "token",
        json!(null),
        BindingOptions::encrypted().debounce(Duration::from_millis(5)),
    );
    binding.loaded().await;

    writer.set("token", "leaked?", &SetOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(binding.get(), json!(null));
}

#[tokio::test]
async fn encrypted_binding_migrates_legacy_record() {
    let shared = SharedStorage::new();
    let store = tab(&shared);
    store.raw().set_item("cart", r#"{"items":[1,2]}"#).unwrap();

    let binding = ReactiveBinding::new(store.clone(), "cart", Value::Null, BindingOptions::encrypted());
    binding.loaded().await;

    assert_eq!(binding.get(), json!({"items": [1, 2]}));
    let physical = &shared.snapshot()["cart"];
    assert!(Envelope::is_envelope(physical));
    let v: Value = store.get("cart", &GetOptions::decrypted()).unwrap();
    assert_eq!(v, json!({"items": [1, 2]}));
}

#[tokio::test]
async fn encrypted_set_and_remove_are_awaitable() {
    let shared = SharedStorage::new();
    let store = tab(&shared);
    let binding = ReactiveBinding::new(
        store.clone(),
        "session",
        String::new(),
        BindingOptions::encrypted().expires_in(Duration::from_secs(3600)),
    );
    binding.loaded().await;

    binding.set("s-123".to_string()).await.unwrap();
    let envelope = Envelope::parse(&shared.snapshot()["session"]).unwrap();
    assert!(envelope.expires_at.is_some());

    binding.remove().await.unwrap();
    assert_eq!(binding.get(), "");
    assert!(!store.is_migrated("session", None));
}

/// Raw store that parks its Nth read (after reading) until the test lets it
/// go, keeping a binding's background load in flight.
struct HeldRead {
    inner: TabStorage,
    reads: AtomicUsize,
    hold_at: usize,
    entered: Barrier,
    release: Barrier,
}

impl HeldRead {
    fn new(inner: TabStorage, hold_at: usize) -> Arc<Self> {
        Arc::new(HeldRead {
            inner,
            reads: AtomicUsize::new(0),
            hold_at,
            entered: Barrier::new(2),
            release: Barrier::new(2),
        })
    }

    async fn wait_until_held(self: &Arc<Self>) {
        let gate = self.clone();
        tokio::task::spawn_blocking(move || {
            gate.entered.wait();
        })
        .await
        .unwrap();
    }

    async fn let_go(self: &Arc<Self>) {
        let gate = self.clone();
        tokio::task::spawn_blocking(move || {
            gate.release.wait();
        })
        .await
        .unwrap();
    }
}

impl RawStore for HeldRead {
    fn get_item(&self, key: &str) -> VaultResult<Option<String>> {
        let value = self.inner.get_item(key)?;
        if self.reads.fetch_add(1, Ordering::SeqCst) + 1 == self.hold_at {
            self.entered.wait();
            self.release.wait();
        }
        Ok(value)
    }
    fn set_item(&self, key: &str, value: &str) -> VaultResult<()> {
        self.inner.set_item(key, value)
    }
    fn remove_item(&self, key: &str) -> VaultResult<()> {
        self.inner.remove_item(key)
    }
    fn keys(&self) -> VaultResult<Vec<String>> {
        self.inner.keys()
    }
    fn replace_item(&self, key: &str, expected: &str, value: &str) -> VaultResult<bool> {
        self.inner.replace_item(key, expected, value)
    }
}

#[tokio::test]
async fn local_set_during_encrypted_load_is_kept() {
    let shared = SharedStorage::new();
    // First read finds the envelope, the second decrypts it: park that one
    let raw = HeldRead::new(shared.open_tab(), 2);
    let crypto = CryptoProvider::new(KeySession::ephemeral()).unwrap();
    let store = SecureStore::new(raw.clone(), crypto);
    store
        .set("cart", &json!({"items": [1]}), &SetOptions::encrypted())
        .unwrap();

    let binding = ReactiveBinding::new(store.clone(), "cart", Value::Null, BindingOptions::encrypted());
    raw.wait_until_held().await;
    assert!(!binding.is_loaded());

    binding.set(json!({"items": [2]})).await.unwrap();
    raw.let_go().await;
    binding.loaded().await;

    // The load read the old record; the local write still wins
    assert_eq!(binding.get(), json!({"items": [2]}));
    let stored: Value = store.get("cart", &GetOptions::decrypted()).unwrap();
    assert_eq!(stored, json!({"items": [2]}));
}

#[tokio::test]
async fn other_tab_write_during_encrypted_load_is_picked_up() {
    let shared = SharedStorage::new();
    shared.open_tab().set_item("cart", r#"{"items":[1]}"#).unwrap();

    let raw = HeldRead::new(shared.open_tab(), 1);
    let crypto = CryptoProvider::new(KeySession::ephemeral()).unwrap();
    let store = SecureStore::new(raw.clone(), crypto);
    let binding = ReactiveBinding::new(store.clone(), "cart", Value::Null, BindingOptions::encrypted());

    raw.wait_until_held().await;
    shared.open_tab().set_item("cart", r#"{"items":[3]}"#).unwrap();
    raw.let_go().await;
    binding.loaded().await;

    // The stale legacy read lost its swap and the load read again
    assert_eq!(binding.get(), json!({"items": [3]}));
    assert!(Envelope::is_envelope(&shared.snapshot()["cart"]));
    let stored: Value = store.get("cart", &GetOptions::decrypted()).unwrap();
    assert_eq!(stored, json!({"items": [3]}));
}
