use thiserror::Error;

/// Infrastructure faults raised by the ledger.
///
/// Business rejections (insufficient funds, version conflicts, ...) are not
/// errors; they are reported through [`crate::domain::outcome::Outcome`].
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Transport error: {0}")]
    TransportError(String),
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LedgerError {
    /// Whether the fault may clear up on its own, making a retry worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageError(_) | Self::TransportError(_))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
