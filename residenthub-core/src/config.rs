//! Configuration types
//!
//! Every section has working defaults matching the shipped client, so a
//! partial TOML file or a bare environment is valid. `validate()` rejects
//! values that would make the cache or the retry loop misbehave.

use crate::{ConfigError, DurationMs, HubError, HubResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Rule for combining authentication sources into one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Authenticated if any source reports a user.
    #[default]
    AnySignal,
    /// Live listener (once reported) wins, then the session record, then the
    /// legacy token pair.
    Precedence,
}

impl FromStr for MergePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any_signal" | "any" => Ok(MergePolicy::AnySignal),
            "precedence" => Ok(MergePolicy::Precedence),
            other => Err(ConfigError::InvalidValue {
                field: "auth.merge_policy".to_string(),
                value: other.to_string(),
                reason: "expected 'any_signal' or 'precedence'".to_string(),
            }),
        }
    }
}

/// TTL cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// TTL applied when callers do not pass one.
    pub default_ttl_ms: DurationMs,
    /// Soft cap on stored entries; the oldest write is evicted on overflow.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_ms: 300_000, // 5 minutes
            max_entries: 1024,
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// Persisted session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    /// Key holding the JSON session record.
    pub storage_key: String,
    /// Key written by the older token-based sign-in.
    pub legacy_storage_key: String,
    /// Backing file for file-based session stores.
    pub file_path: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            storage_key: "societycare_auth".to_string(),
            legacy_storage_key: "auth_data".to_string(),
            file_path: None,
        }
    }
}

/// Route-guard settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSettings {
    pub merge_policy: MergePolicy,
}

/// Retry configuration for dashboard loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: DurationMs,
    /// Growth factor per attempt. 1.0 grows linearly (`initial * attempt`).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 2000,
            backoff_multiplier: 1.0,
        }
    }
}

impl RetryConfig {
    /// No retries, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// With a multiplier of 1.0 the delay is `initial * attempt`; larger
    /// multipliers grow geometrically from `initial`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let initial = self.initial_backoff_ms as f64;
        let millis = if (self.backoff_multiplier - 1.0).abs() < f64::EPSILON {
            initial * attempt as f64
        } else {
            initial * self.backoff_multiplier.powi(attempt as i32 - 1)
        };
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

/// Dashboard loader settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DashboardSettings {
    pub retry: RetryConfig,
}

/// Master configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    pub cache: CacheSettings,
    pub session: SessionSettings,
    pub auth: AuthSettings,
    pub dashboard: DashboardSettings,
}

impl HubConfig {
    /// Load configuration: TOML file when `RESIDENTHUB_CONFIG` or `--config`
    /// names one, otherwise environment variables. Always validated.
    pub fn load() -> HubResult<Self> {
        let config = match config_path_from_args().or_else(config_path_from_env) {
            Some(path) => Self::from_path(&path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML configuration file.
    pub fn from_path(path: &Path) -> HubResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> HubResult<Self> {
        toml::from_str(contents).map_err(|e| {
            HubError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `RESIDENTHUB_CACHE_TTL_MS`: default cache TTL (default: 300000)
    /// - `RESIDENTHUB_CACHE_MAX_ENTRIES`: soft entry cap (default: 1024)
    /// - `RESIDENTHUB_SESSION_KEY`: session record key (default: societycare_auth)
    /// - `RESIDENTHUB_LEGACY_SESSION_KEY`: legacy token key (default: auth_data)
    /// - `RESIDENTHUB_SESSION_FILE`: file for file-backed session stores
    /// - `RESIDENTHUB_AUTH_MERGE_POLICY`: `any_signal` | `precedence`
    /// - `RESIDENTHUB_DASHBOARD_MAX_RETRIES`: dashboard retries (default: 3)
    /// - `RESIDENTHUB_DASHBOARD_BACKOFF_MS`: initial backoff (default: 2000)
    ///
    /// An unparseable merge policy is an error; numeric variables that fail
    /// to parse fall back to their defaults.
    pub fn from_env() -> HubResult<Self> {
        let defaults = Self::default();

        let merge_policy = match std::env::var("RESIDENTHUB_AUTH_MERGE_POLICY") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.auth.merge_policy,
        };

        Ok(Self {
            cache: CacheSettings {
                default_ttl_ms: env_parse("RESIDENTHUB_CACHE_TTL_MS")
                    .unwrap_or(defaults.cache.default_ttl_ms),
                max_entries: env_parse("RESIDENTHUB_CACHE_MAX_ENTRIES")
                    .unwrap_or(defaults.cache.max_entries),
            },
            session: SessionSettings {
                storage_key: std::env::var("RESIDENTHUB_SESSION_KEY")
                    .unwrap_or(defaults.session.storage_key),
                legacy_storage_key: std::env::var("RESIDENTHUB_LEGACY_SESSION_KEY")
                    .unwrap_or(defaults.session.legacy_storage_key),
                file_path: std::env::var("RESIDENTHUB_SESSION_FILE")
                    .ok()
                    .map(PathBuf::from),
            },
            auth: AuthSettings { merge_policy },
            dashboard: DashboardSettings {
                retry: RetryConfig {
                    max_retries: env_parse("RESIDENTHUB_DASHBOARD_MAX_RETRIES")
                        .unwrap_or(defaults.dashboard.retry.max_retries),
                    initial_backoff_ms: env_parse("RESIDENTHUB_DASHBOARD_BACKOFF_MS")
                        .unwrap_or(defaults.dashboard.retry.initial_backoff_ms),
                    backoff_multiplier: defaults.dashboard.retry.backoff_multiplier,
                },
            },
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> HubResult<()> {
        if self.cache.default_ttl_ms == 0 {
            return Err(invalid("cache.default_ttl_ms", "0", "must be > 0"));
        }
        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", "0", "must be > 0"));
        }
        if self.session.storage_key.trim().is_empty() {
            return Err(HubError::Config(ConfigError::MissingRequired {
                field: "session.storage_key".to_string(),
            }));
        }
        if self.session.legacy_storage_key.trim().is_empty() {
            return Err(HubError::Config(ConfigError::MissingRequired {
                field: "session.legacy_storage_key".to_string(),
            }));
        }
        if self.session.storage_key == self.session.legacy_storage_key {
            return Err(invalid(
                "session.legacy_storage_key",
                &self.session.legacy_storage_key,
                "must differ from session.storage_key",
            ));
        }
        if self.dashboard.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "dashboard.retry.backoff_multiplier",
                &self.dashboard.retry.backoff_multiplier.to_string(),
                "must be >= 1.0",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> HubError {
    HubError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("RESIDENTHUB_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

// =============================================================================
// TESTS
// =============================================================================
