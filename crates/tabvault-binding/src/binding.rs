use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tabvault_core::{VaultError, VaultResult};
use tabvault_store::{Envelope, GetOptions, SecureStore, SetOptions};

use crate::options::BindingOptions;
use crate::sync;

const LOAD_ATTEMPTS: usize = 3;

/// Values a binding can hold.
pub trait Bindable: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {}

impl<T> Bindable for T where T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {}

pub(crate) struct Shared<T> {
    pub(crate) key: String,
    pub(crate) pkey: String,
    pub(crate) store: SecureStore,
    pub(crate) opts: BindingOptions,
    pub(crate) initial: T,
    pub(crate) value: watch::Sender<T>,
    loaded: watch::Sender<bool>,
    /// Set by the first local write; a late background load must not
    /// overwrite it.
    touched: AtomicBool,
    /// Bumped after every local write lands in the store.
    local_writes: AtomicU64,
}

impl<T: Bindable> Shared<T> {
    fn get_options(&self) -> GetOptions {
        GetOptions {
            decrypt: self.opts.encrypt,
            namespace: self.opts.namespace.clone(),
        }
    }

    fn set_options(&self) -> SetOptions {
        SetOptions {
            encrypt: self.opts.encrypt,
            expires_in: self.opts.expires_in,
            namespace: self.opts.namespace.clone(),
        }
    }

    fn write(&self, value: &T) -> VaultResult<()> {
        self.store.set(&self.key, value, &self.set_options())
    }

    /// Blocking read of the encrypted record. A legacy plaintext record is
    /// returned as-is and rewritten as an envelope in the same step; if
    /// another writer changes it first, the record is read again.
    fn read_encrypted(&self) -> Option<T> {
        let mut last = None;
        for _ in 0..LOAD_ATTEMPTS {
            let raw = self.store.read_physical(&self.pkey)?;
            if Envelope::is_envelope(&raw) {
                return self.store.get(&self.key, &self.get_options());
            }

            let value: T = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key = %self.pkey, "failed to parse legacy record: {e}");
                    return None;
                }
            };
            match self.store.replace(&self.key, &raw, &value, &self.set_options()) {
                Ok(true) => {
                    tracing::info!(key = %self.pkey, "encrypted legacy plaintext record on first access");
                    return Some(value);
                }
                Ok(false) => {
                    tracing::debug!(key = %self.pkey, "legacy record changed before it was encrypted; reading again");
                    last = Some(value);
                }
                // already logged by the store
                Err(_) => return Some(value),
            }
        }
        last
    }

    /// Re-read the physical record after another tab changed it and publish
    /// it, unless a local write landed in the meantime.
    pub(crate) fn refresh_from_store(&self) {
        let seen = self.local_writes.load(Ordering::SeqCst);
        let current = self.store.read_physical(&self.pkey);
        let next = match current.as_deref() {
            None => self.initial.clone(),
            Some(raw) if Envelope::is_envelope(raw) => {
                tracing::debug!(key = %self.pkey, "ignoring encrypted write from another tab");
                return;
            }
            Some(raw) => match serde_json::from_str::<T>(raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key = %self.pkey, "ignoring unparseable write from another tab: {e}");
                    return;
                }
            },
        };
        self.value.send_if_modified(|value| {
            if self.local_writes.load(Ordering::SeqCst) != seen || *value == next {
                return false;
            }
            *value = next;
            true
        });
    }

    fn local_write_landed(&self) {
        self.local_writes.fetch_add(1, Ordering::SeqCst);
    }

    fn replace_value(&self, next: T) {
        self.value.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// An observable `(value, set, remove)` handle on one stored key.
///
/// Dropping the binding stops its background tasks.
pub struct ReactiveBinding<T> {
    shared: Arc<Shared<T>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T: Bindable> ReactiveBinding<T> {
    /// Bind `key`. Without encryption the stored value is loaded before this
    /// returns; with it, the binding holds `initial` until the background
    /// load finishes (see [`loaded`](Self::loaded)).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(store: SecureStore, key: impl Into<String>, initial: T, opts: BindingOptions) -> Self {
        let key = key.into();
        let pkey = store.physical_key(&key, opts.namespace.as_ref());
        let (value, _) = watch::channel(initial.clone());
        let (loaded, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            key,
            pkey,
            store,
            opts,
            initial,
            value,
            loaded,
            touched: AtomicBool::new(false),
            local_writes: AtomicU64::new(0),
        });

        let mut tasks = Vec::new();
        if shared.opts.encrypt {
            tasks.push(tokio::spawn(load_encrypted(shared.clone())));
        } else {
            if let Some(stored) = shared.store.get::<T>(&shared.key, &shared.get_options()) {
                shared.value.send_replace(stored);
            }
            shared.loaded.send_replace(true);
        }

        if shared.opts.listens() {
            match shared.store.raw().subscribe() {
                Some(events) => tasks.push(tokio::spawn(sync::listen(shared.clone(), events))),
                None => tracing::debug!(
                    key = %shared.pkey,
                    "store delivers no change notifications; cross-tab sync off"
                ),
            }
        }

        ReactiveBinding { shared, tasks }
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Key used in the raw store (namespace applied).
    pub fn physical_key(&self) -> &str {
        &self.shared.pkey
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.shared.value.borrow().clone()
    }

    /// Receiver that observes every change of the value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.shared.value.subscribe()
    }

    pub fn is_loaded(&self) -> bool {
        *self.shared.loaded.borrow()
    }

    /// Wait for the initial load. Immediate for unencrypted bindings.
    pub async fn loaded(&self) {
        let mut rx = self.shared.loaded.subscribe();
        // The sender lives in `shared`, so this cannot close early
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Store `value`, then publish it. On a write failure the local value is
    /// left unchanged.
    pub async fn set(&self, value: T) -> VaultResult<()> {
        self.shared.touched.store(true, Ordering::SeqCst);

        if self.shared.opts.encrypt {
            let shared = self.shared.clone();
            let to_write = value.clone();
            tokio::task::spawn_blocking(move || shared.write(&to_write))
                .await
                .map_err(|e| VaultError::Storage(format!("encrypting write did not finish: {e}")))??;
        } else {
            self.shared.write(&value)?;
        }

        self.shared.local_write_landed();
        self.shared.replace_value(value);
        Ok(())
    }

    /// Delete the stored record and fall back to the initial value.
    pub async fn remove(&self) -> VaultResult<()> {
        self.shared.touched.store(true, Ordering::SeqCst);
        self.shared
            .store
            .remove(&self.shared.key, self.shared.opts.namespace.as_ref())?;
        self.shared.local_write_landed();
        self.shared.replace_value(self.shared.initial.clone());
        Ok(())
    }

    /// Stop background work. Same as dropping the binding.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for ReactiveBinding<T> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl<T> std::fmt::Debug for ReactiveBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveBinding")
            .field("key", &self.shared.pkey)
            .field("encrypt", &self.shared.opts.encrypt)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

async fn load_encrypted<T: Bindable>(shared: Arc<Shared<T>>) {
    let worker = shared.clone();
    let loaded = match tokio::task::spawn_blocking(move || worker.read_encrypted()).await {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::warn!(key = %shared.pkey, "initial load did not finish: {e}");
            None
        }
    };

    if let Some(value) = loaded {
        if !shared.touched.load(Ordering::SeqCst) {
            shared.replace_value(value);
        }
    }
    shared.loaded.send_replace(true);
}
