//! tabvault-store: raw key-value backends and the encrypted SecureStore layer
//!
//! ```text
//! SecureStore ── CryptoProvider (seal/open)
//!      │      └─ Envelope codec  {"ciphertext","nonce","expiresAt"}
//!      ▼
//! RawStore ── TabStorage (shared in-memory origin store, one handle per tab)
//!          └─ FileStore  (JSON file, atomic temp+rename flush)
//! ```

pub mod envelope;
pub mod file;
pub mod memory;
pub mod raw;
pub mod secure;

pub use envelope::Envelope;
pub use file::FileStore;
pub use memory::{SharedStorage, TabStorage};
pub use raw::{RawStore, StorageEvent, StorageEvents, TabId};
pub use secure::{GetOptions, SecureStore, SetOptions};
