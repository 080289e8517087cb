//! Identities as the provider reports them and as the app publishes them.

use residenthub_core::{ProfileUpdate, Role, Timestamp, UserId, UserProfile};
use serde::{Deserialize, Serialize};

use crate::record::AuthToken;

/// Raw account reported by the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderUser {
    pub uid: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub access_token: Option<AuthToken>,
}

impl ProviderUser {
    pub fn new(uid: impl Into<UserId>, email: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
            display_name: None,
            access_token: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_access_token(mut self, token: AuthToken) -> Self {
        self.access_token = Some(token);
        self
    }
}

/// The signed-in user published to the rest of the app.
///
/// Built from a provider account enriched with its profile document, or
/// restored from a persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: UserId,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub apartment_number: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl AuthUser {
    /// Overlay profile fields on the provider account. Profile values win.
    pub fn from_provider(user: &ProviderUser, profile: Option<&UserProfile>) -> Self {
        let mut auth_user = Self {
            uid: user.uid.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            name: user.display_name.clone(),
            role: None,
            apartment_number: None,
            phone: None,
            created_at: None,
            updated_at: None,
        };
        if let Some(profile) = profile {
            if !profile.email.is_empty() {
                auth_user.email = profile.email.clone();
            }
            auth_user.name = Some(profile.name.clone());
            auth_user.role = Some(profile.role);
            auth_user.apartment_number = profile.apartment_number.clone();
            auth_user.phone = profile.phone.clone();
            auth_user.created_at = profile.created_at;
            auth_user.updated_at = profile.updated_at;
        }
        auth_user
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_some_and(|role| role.is_admin())
    }

    /// Shallow-merge a profile update, as the profile screen does after a
    /// successful save.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(name) = &update.name {
            self.name = Some(name.clone());
        }
        if let Some(phone) = &update.phone {
            self.phone = Some(phone.clone());
        }
        if let Some(apartment) = &update.apartment_number {
            self.apartment_number = Some(apartment.clone());
        }
    }
}
