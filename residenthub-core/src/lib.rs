//! ResidentHub Core - Shared Types
//!
//! Data types, error taxonomy, configuration and field validation shared by
//! the cache and session crates. Nothing in here performs I/O except the
//! configuration loaders.

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod profile;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AuthSettings, CacheSettings, DashboardSettings, HubConfig, MergePolicy, RetryConfig,
    SessionSettings,
};
pub use error::{
    AuthError, ConfigError, HubError, HubResult, SessionError, StoreError, ValidationError,
};
pub use identity::{DurationMs, Timestamp, UserId};
pub use profile::{ProfileUpdate, Role, UserProfile};
pub use validation::{
    validate_apartment_number, validate_email, validate_password, validate_phone,
    validate_required, PasswordCheck,
};
