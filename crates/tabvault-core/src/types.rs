use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Separator between a namespace and the logical key in a physical key.
pub const NAMESPACE_SEPARATOR: char = ':';

/// A tenant/session prefix isolating logical keys in the raw store.
///
/// Namespaces may not contain the separator, so the physical prefix of one
/// namespace can never be a prefix of another's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> VaultResult<Self> {
        let name = name.into();
        if name.is_empty() || name.contains(NAMESPACE_SEPARATOR) {
            return Err(VaultError::InvalidNamespace(name));
        }
        Ok(Namespace(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Physical key for `key` inside this namespace (`{namespace}:{key}`).
    pub fn scope(&self, key: &str) -> String {
        format!("{}{}{}", self.0, NAMESPACE_SEPARATOR, key)
    }
}

impl TryFrom<String> for Namespace {
    type Error = VaultError;

    fn try_from(value: String) -> VaultResult<Self> {
        Namespace::new(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve a logical key to the key used in the raw store.
///
/// Without a namespace the key is used verbatim, so an un-namespaced key
/// containing `:` addresses the record of the namespace before the colon
/// (`"a:b"` and namespace `a` with key `b` are the same record). Keys in the
/// default space should not contain the separator; tools that walk every
/// physical key rely on this to reach namespaced records.
pub fn physical_key(namespace: Option<&Namespace>, key: &str) -> String {
    match namespace {
        Some(ns) => ns.scope(key),
        None => key.to_string(),
    }
}

/// Wall clock used for expiration, in epoch milliseconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        ManualClock {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
