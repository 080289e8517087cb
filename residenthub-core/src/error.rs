//! Error types for ResidentHub operations
//!
//! Absence (cache miss, no session) is never an error; it is `None`. These
//! types cover persisted-state failures, upstream provider failures,
//! validation and configuration.

use thiserror::Error;

/// Persisted session state errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to read session store at {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to write session store at {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to serialize session record: {reason}")]
    SerializeFailed { reason: String },

    #[error("Malformed session record: {reason}")]
    Malformed { reason: String },
}

/// Identity provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Sign-in failed for {email}: {reason}")]
    SignInFailed { email: String, reason: String },

    #[error("Sign-out failed: {reason}")]
    SignOutFailed { reason: String },

    #[error("Registration failed for {email}: {reason}")]
    RegistrationFailed { email: String, reason: String },

    #[error("User data not found in database for uid {uid}")]
    ProfileMissing { uid: String },

    #[error("Identity provider unavailable: {reason}")]
    ProviderUnavailable { reason: String },
}

/// Document store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to fetch {collection}: {reason}")]
    FetchFailed { collection: String, reason: String },

    #[error("Failed to write {collection}/{id}: {reason}")]
    WriteFailed {
        collection: String,
        id: String,
        reason: String,
    },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Master error type for all ResidentHub errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for ResidentHub operations.
pub type HubResult<T> = Result<T, HubError>;

// =============================================================================
// TESTS
// =============================================================================
