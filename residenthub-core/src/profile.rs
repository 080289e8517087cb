//! User profile documents.
//!
//! Mirrors the `users/{uid}` document written at registration and merged on
//! profile updates. Field names follow the stored camelCase form.

use crate::{Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Society role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Resident,
    /// Any role string this client does not know.
    #[serde(other)]
    Other,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Resident => "resident",
            Role::Other => "other",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile document for a society member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub apartment_number: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

/// Partial profile update, merged into the stored document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apartment_number: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.apartment_number.is_none()
    }

    /// Merge set fields into `profile`, stamping `updated_at`.
    pub fn apply_to(&self, profile: &mut UserProfile, now: Timestamp) {
        if let Some(name) = &self.name {
            profile.name = name.clone();
        }
        if let Some(phone) = &self.phone {
            profile.phone = Some(phone.clone());
        }
        if let Some(apartment) = &self.apartment_number {
            profile.apartment_number = Some(apartment.clone());
        }
        profile.updated_at = Some(now);
    }
}
