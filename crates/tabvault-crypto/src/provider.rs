//! XChaCha20-Poly1305 record encryption
//!
//! Each call to [`CryptoProvider::encrypt`] draws a fresh 192-bit nonce from
//! the thread-local CSPRNG. At 192 bits, random nonces do not collide in
//! practice even across many concurrent writers sharing one key.

use std::sync::Arc;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::session::KeySession;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Ciphertext (with trailing Poly1305 tag) plus the nonce it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

/// Authenticated encryption bound to a [`KeySession`].
#[derive(Debug, Clone)]
pub struct CryptoProvider {
    session: Arc<KeySession>,
}

impl CryptoProvider {
    /// Build a provider, failing fast if the environment cannot do crypto.
    ///
    /// Probes the OS entropy source and runs one seal/open round trip under
    /// the session key.
    pub fn new(session: Arc<KeySession>) -> CryptoResult<Self> {
        probe_entropy()?;

        let provider = CryptoProvider { session };
        let probe = b"tabvault-capability-probe";
        let sealed = provider
            .encrypt(probe)
            .map_err(|e| CryptoError::Unsupported(format!("self-test encrypt: {e}")))?;
        let opened = provider
            .decrypt(&sealed.ciphertext, &sealed.nonce)
            .map_err(|e| CryptoError::Unsupported(format!("self-test decrypt: {e}")))?;
        if opened != probe {
            return Err(CryptoError::Unsupported(
                "self-test round trip produced different plaintext".into(),
            ));
        }

        Ok(provider)
    }

    pub fn session(&self) -> &Arc<KeySession> {
        &self.session
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Sealed> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self.session.with_key(|key| {
            XChaCha20Poly1305::new(key.as_bytes().into())
                .encrypt(XNonce::from_slice(&nonce), plaintext)
                .map_err(|e| CryptoError::Encryption(e.to_string()))
        })??;

        Ok(Sealed { ciphertext, nonce })
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> CryptoResult<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonce(nonce.len()));
        }
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Decryption);
        }

        self.session.with_key(|key| {
            XChaCha20Poly1305::new(key.as_bytes().into())
                .decrypt(XNonce::from_slice(nonce), ciphertext)
                .map_err(|_| CryptoError::Decryption)
        })?
    }
}

fn probe_entropy() -> CryptoResult<()> {
    let mut buf = [0u8; 16];
    rand::rngs::OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| CryptoError::Unsupported(format!("no OS entropy source: {e}")))
}
