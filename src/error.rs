use thiserror::Error;

/// Errors surfaced by the guard components.
///
/// Outcomes that are part of normal request handling (a forged cookie, a
/// failed login, a hijacked session) are returned as values, not errors.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Fatal misconfiguration: short secret, unusable storage path, missing collaborator
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller passed a value that violates an input contract
    #[error("Validation error: {0}")]
    Validation(String),

    /// An external store failed to load or persist
    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type GuardResult<T> = Result<T, GuardError>;
