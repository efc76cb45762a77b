//! Error types for Syndica

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyndicaError>;

#[derive(Error, Debug)]
pub enum SyndicaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Trigger rejected: invalid bearer token")]
    Unauthorized,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyndicaError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SyndicaError::InvalidInput(_) => 3,
            SyndicaError::Unauthorized => 2,
            SyndicaError::Platform(_) => 1,
            SyndicaError::Credential(_) => 1,
            SyndicaError::Config(_) => 1,
            SyndicaError::Store(_) => 1,
        }
    }

    /// True when the error is fatal to an entire sweep rather than to a
    /// single post. Store failures abort the run; everything else is
    /// recovered per post.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyndicaError::Store(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures of a single publish attempt. These never abort a sweep.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Publishing failed: {0}")]
    Publishing(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("No publisher registered for platform: {0}")]
    UnsupportedPlatform(String),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Credential decryption failed (tampered or corrupt ciphertext)")]
    DecryptionFailed,

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Master key must be at least 8 characters")]
    WeakMasterKey,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
