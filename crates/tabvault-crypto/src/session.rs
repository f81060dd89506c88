//! Session key material and its lifecycle

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use hkdf::Hkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

const SESSION_KEY_INFO: &[u8] = b"tabvault-session-key";

/// A 256-bit session key. Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Generate a random key private to this session.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    /// Derive a key from a shared secret via HKDF-SHA256.
    ///
    /// Tabs holding the same secret and salt derive the same key and can read
    /// each other's records.
    pub fn derive(secret: &SecretString, salt: &[u8]) -> CryptoResult<Self> {
        let ikm = secret.expose_secret().as_bytes();
        if ikm.is_empty() {
            return Err(CryptoError::InvalidKey("empty key-derivation secret".into()));
        }

        let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut okm = [0u8; KEY_SIZE];
        hkdf.expand(SESSION_KEY_INFO, &mut okm)
            .map_err(|e| CryptoError::InvalidKey(format!("HKDF expand failed: {e}")))?;
        Ok(Self::from_bytes(okm))
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Process-wide key state with an explicit lifecycle.
///
/// Created once at session start and shared (via `Arc`) by every provider in
/// the session. `rotate` swaps the key in place; `end` destroys it, after
/// which every encrypt/decrypt fails with [`CryptoError::SessionEnded`].
pub struct KeySession {
    id: Uuid,
    key: RwLock<Option<SessionKey>>,
    generation: AtomicU64,
}

impl KeySession {
    pub fn start(key: SessionKey) -> Arc<Self> {
        let session = KeySession {
            id: Uuid::new_v4(),
            key: RwLock::new(Some(key)),
            generation: AtomicU64::new(1),
        };
        tracing::debug!(session = %session.id, "key session started");
        Arc::new(session)
    }

    /// Start a session with a freshly generated, tab-private key.
    pub fn ephemeral() -> Arc<Self> {
        Self::start(SessionKey::generate())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Incremented on every rotation; 0 once the session has ended.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Replace the key. Records sealed under the previous key become
    /// unreadable in this session.
    pub fn rotate(&self, key: SessionKey) -> CryptoResult<()> {
        let mut slot = self.key.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            return Err(CryptoError::SessionEnded);
        }
        *slot = Some(key);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(session = %self.id, generation, "session key rotated");
        Ok(())
    }

    /// Destroy the key material. Idempotent.
    pub fn end(&self) {
        let mut slot = self.key.write().unwrap_or_else(PoisonError::into_inner);
        if slot.take().is_some() {
            self.generation.store(0, Ordering::SeqCst);
            tracing::debug!(session = %self.id, "key session ended");
        }
    }

    pub(crate) fn with_key<R>(&self, f: impl FnOnce(&SessionKey) -> R) -> CryptoResult<R> {
        let slot = self.key.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(f).ok_or(CryptoError::SessionEnded)
    }
}

impl std::fmt::Debug for KeySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySession")
            .field("id", &self.id)
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_generation() {
        let k1 = SessionKey::generate();
        let k2 = SessionKey::generate();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_derive_deterministic() {
        let secret = SecretString::from("shared-tab-secret");
        let k1 = SessionKey::derive(&secret, b"salt").unwrap();
        let k2 = SessionKey::derive(&secret, b"salt").unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_derive_different_salts() {
        let secret = SecretString::from("shared-tab-secret");
        let k1 = SessionKey::derive(&secret, b"salt-a").unwrap();
        let k2 = SessionKey::derive(&secret, b"salt-b").unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_derive_empty_secret_rejected() {
        let result = SessionKey::derive(&SecretString::from(""), b"salt");
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = SessionKey::from_bytes([7u8; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains('7'));
    }

    #[test]
    fn test_rotate_bumps_generation() {
        let session = KeySession::start(SessionKey::from_bytes([1u8; KEY_SIZE]));
        assert_eq!(session.generation(), 1);
        session.rotate(SessionKey::from_bytes([2u8; KEY_SIZE])).unwrap();
        assert_eq!(session.generation(), 2);
        let bytes = session.with_key(|k| *k.as_bytes()).unwrap();
        assert_eq!(bytes, [2u8; KEY_SIZE]);
    }

    #[test]
    fn test_end_destroys_key() {
        let session = KeySession::ephemeral();
        assert!(session.is_active());
        session.end();
        session.end();
        assert!(!session.is_active());
        assert_eq!(session.generation(), 0);
        assert!(matches!(
            session.with_key(|_| ()),
            Err(CryptoError::SessionEnded)
        ));
        assert!(session.rotate(SessionKey::generate()).is_err());
    }
}
