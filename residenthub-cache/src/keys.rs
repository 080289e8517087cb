//! Well-known cache keys.
//!
//! Dashboard collections are cached under fixed names. A key can be scoped
//! to a user so that two sign-ins in the same process never read each
//! other's collections.

use residenthub_core::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between a key name and its user scope.
const SCOPE_SEPARATOR: char = ':';

/// Collections the client caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKey {
    UserProfile,
    Payments,
    Complaints,
    Notices,
    Residents,
}

impl CacheKey {
    pub const ALL: [CacheKey; 5] = [
        CacheKey::UserProfile,
        CacheKey::Payments,
        CacheKey::Complaints,
        CacheKey::Notices,
        CacheKey::Residents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::UserProfile => "user_profile",
            CacheKey::Payments => "payments",
            CacheKey::Complaints => "complaints",
            CacheKey::Notices => "notices",
            CacheKey::Residents => "residents",
        }
    }

    /// Key for `user`'s copy of this collection, e.g. `payments:u1`.
    pub fn scoped(&self, user: &UserId) -> String {
        format!("{}{}{}", self.as_str(), SCOPE_SEPARATOR, user)
    }

    /// Parse either a bare name or a scoped key back to its collection.
    pub fn from_key(key: &str) -> Option<Self> {
        let name = key.split(SCOPE_SEPARATOR).next().unwrap_or(key);
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
