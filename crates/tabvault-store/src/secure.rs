//! SecureStore: optionally-encrypted, expiring key-value API over a RawStore.
//!
//! Reads never fail. A missing, expired, undecryptable or unparseable record
//! is logged and reported as absent, so a corrupted record cannot crash a
//! caller. Writes surface storage failures (quota) as errors.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use tabvault_core::{physical_key, Clock, Namespace, SystemClock, VaultResult};
use tabvault_crypto::{CryptoProvider, CryptoResult};

use crate::envelope::Envelope;
use crate::raw::RawStore;

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Decrypt envelope records. Without it an envelope reads as absent.
    pub decrypt: bool,
    pub namespace: Option<Namespace>,
}

impl GetOptions {
    pub fn decrypted() -> Self {
        GetOptions {
            decrypt: true,
            namespace: None,
        }
    }

    pub fn namespace(mut self, ns: Namespace) -> Self {
        self.namespace = Some(ns);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub encrypt: bool,
    /// Time-to-live, stored as `expiresAt` in the envelope.
    pub expires_in: Option<Duration>,
    pub namespace: Option<Namespace>,
}

impl SetOptions {
    pub fn encrypted() -> Self {
        SetOptions {
            encrypt: true,
            ..Default::default()
        }
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn namespace(mut self, ns: Namespace) -> Self {
        self.namespace = Some(ns);
        self
    }
}

/// Encrypted key-value store. Cheap to clone; clones share the raw store
/// and the key session.
#[derive(Clone)]
pub struct SecureStore {
    raw: Arc<dyn RawStore>,
    crypto: CryptoProvider,
    clock: Arc<dyn Clock>,
    namespace: Option<Namespace>,
}

impl SecureStore {
    pub fn new(raw: Arc<dyn RawStore>, crypto: CryptoProvider) -> Self {
        SecureStore {
            raw,
            crypto,
            clock: Arc::new(SystemClock),
            namespace: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Namespace used by operations that do not name one.
    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn raw(&self) -> &Arc<dyn RawStore> {
        &self.raw
    }

    pub fn crypto(&self) -> &CryptoProvider {
        &self.crypto
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The key actually used in the raw store for `key`.
    pub fn physical_key(&self, key: &str, namespace: Option<&Namespace>) -> String {
        physical_key(namespace.or(self.namespace.as_ref()), key)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str, opts: &GetOptions) -> Option<T> {
        let pkey = self.physical_key(key, opts.namespace.as_ref());
        let raw = self.read_physical(&pkey)?;

        let json = match Envelope::parse(&raw) {
            Some(envelope) => {
                if envelope.is_expired(self.clock.now_ms()) {
                    self.evict(&pkey);
                    return None;
                }
                if !opts.decrypt {
                    tracing::debug!(key = %pkey, "encrypted record read without decrypt");
                    return None;
                }
                match self.open(&envelope) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        tracing::warn!(key = %pkey, "failed to decrypt record: {e}");
                        return None;
                    }
                }
            }
            None => raw.into_bytes(),
        };

        match serde_json::from_slice(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %pkey, "failed to parse stored value: {e}");
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        opts: &SetOptions,
    ) -> VaultResult<()> {
        let pkey = self.physical_key(key, opts.namespace.as_ref());
        let record = self.encode_record(&pkey, value, opts)?;

        self.raw.set_item(&pkey, &record).inspect_err(|e| {
            tracing::warn!(key = %pkey, "failed to write record: {e}");
        })
    }

    /// Like [`set`](Self::set), but only lands if the physical record still
    /// equals `expected`. Returns `Ok(false)` when another writer changed it
    /// first.
    pub fn replace<T: Serialize + ?Sized>(
        &self,
        key: &str,
        expected: &str,
        value: &T,
        opts: &SetOptions,
    ) -> VaultResult<bool> {
        let pkey = self.physical_key(key, opts.namespace.as_ref());
        let record = self.encode_record(&pkey, value, opts)?;

        self.raw
            .replace_item(&pkey, expected, &record)
            .inspect_err(|e| {
                tracing::warn!(key = %pkey, "failed to write record: {e}");
            })
    }

    /// Delete the record. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str, namespace: Option<&Namespace>) -> VaultResult<()> {
        let pkey = self.physical_key(key, namespace);
        self.raw.remove_item(&pkey)
    }

    /// True when the physical record is an envelope. Does not decrypt.
    pub fn is_migrated(&self, key: &str, namespace: Option<&Namespace>) -> bool {
        let pkey = self.physical_key(key, namespace);
        self.read_physical(&pkey)
            .is_some_and(|raw| Envelope::is_envelope(&raw))
    }

    /// Read the physical record verbatim, logging (and hiding) read errors.
    pub fn read_physical(&self, pkey: &str) -> Option<String> {
        match self.raw.get_item(pkey) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %pkey, "failed to read record: {e}");
                None
            }
        }
    }

    fn encode_record<T: Serialize + ?Sized>(
        &self,
        pkey: &str,
        value: &T,
        opts: &SetOptions,
    ) -> VaultResult<String> {
        let json = serde_json::to_string(value)?;
        if !opts.encrypt {
            if opts.expires_in.is_some() {
                tracing::warn!(
                    key = %pkey,
                    "expires_in ignored for unencrypted record; raw records carry no expiry"
                );
            }
            return Ok(json);
        }

        let sealed = self.crypto.encrypt(json.as_bytes())?;
        let expires_at = opts
            .expires_in
            .map(|ttl| {
                let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                self.clock.now_ms().saturating_add(ttl_ms)
            });
        Ok(Envelope::seal(&sealed, expires_at).to_json()?)
    }

    fn open(&self, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
        let (ciphertext, nonce) = envelope.decode()?;
        self.crypto.decrypt(&ciphertext, &nonce)
    }

    fn evict(&self, pkey: &str) {
        tracing::debug!(key = %pkey, "evicting expired record");
        if let Err(e) = self.raw.remove_item(pkey) {
            tracing::warn!(key = %pkey, "failed to evict expired record: {e}");
        }
    }
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("namespace", &self.namespace)
            .field("session", &self.crypto.session().id())
            .finish()
    }
}
