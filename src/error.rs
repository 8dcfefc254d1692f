use thiserror::Error;

#[derive(Error, Debug)]
pub enum FactStoreError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid taxonomy pattern '{pattern}': {details}")]
    InvalidPattern { pattern: String, details: String },

    #[error("Document not found: {0}")]
    DocumentNotFound(i64),

    #[error("Period resolution failed for label '{0}'")]
    PeriodResolution(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt stored value in column '{column}': '{value}'")]
    CorruptStoredValue { column: String, value: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FactStoreError>;
