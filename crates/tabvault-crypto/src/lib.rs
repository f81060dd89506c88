//! tabvault-crypto: authenticated encryption for stored records
//!
//! Key lifecycle:
//! ```text
//! SessionKey (256-bit, random per tab or HKDF-SHA256 from a shared secret)
//!   └── KeySession (start → rotate* → end), shared by providers via Arc
//!       └── CryptoProvider: XChaCha20-Poly1305, random 192-bit nonce per encrypt
//! ```
//!
//! Keys are never persisted. A record written in one session can only be
//! read by a session holding the same key, either the same tab or another
//! tab that derived it from the same secret.

pub mod error;
pub mod provider;
pub mod session;

pub use error::{CryptoError, CryptoResult};
pub use provider::{CryptoProvider, Sealed};
pub use session::{KeySession, SessionKey};

/// Size of a session key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
