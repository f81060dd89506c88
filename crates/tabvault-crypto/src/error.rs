use thiserror::Error;

use tabvault_core::VaultError;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The platform cannot provide the primitives (entropy source, AEAD).
    #[error("cryptography unsupported in this environment: {0}")]
    Unsupported(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Authentication failed: wrong key, tampered ciphertext or nonce.
    #[error("decryption failed: invalid key or corrupted data")]
    Decryption,

    #[error("nonce has wrong size: {0} bytes (expected {expected})", expected = crate::NONCE_SIZE)]
    InvalidNonce(usize),

    /// A stored field is not valid base64.
    #[error("malformed encoding: {0}")]
    Encoding(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("key session has ended")]
    SessionEnded,
}

impl From<CryptoError> for VaultError {
    fn from(e: CryptoError) -> Self {
        VaultError::Crypto(e.to_string())
    }
}
