use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("storage error: {0}")]
    Storage(String),

    /// The raw store refused a write because it is full.
    #[error("storage quota exceeded writing {key}: {needed} bytes over a {quota} byte quota")]
    QuotaExceeded { key: String, needed: usize, quota: usize },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("invalid namespace {0:?}: must be non-empty and must not contain ':'")]
    InvalidNamespace(String),

    #[error("invalid backup: {0}")]
    InvalidBackup(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// True for write rejections caused by the store running out of space.
    pub fn is_quota(&self) -> bool {
        matches!(self, VaultError::QuotaExceeded { .. })
    }
}
