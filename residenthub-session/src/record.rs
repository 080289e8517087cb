//! Persisted session record.
//!
//! Written as a JSON string under the session storage key at sign-in and
//! removed at sign-out. On startup it is the only way to know who is signed
//! in before the identity provider reports.

use residenthub_core::{ProfileUpdate, Role, SessionError, Timestamp, UserId};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::store::SessionStore;
use crate::user::AuthUser;

// ============================================================================
// AUTH TOKEN
// ============================================================================

/// Provider access token that never appears in logs.
#[derive(Clone)]
pub struct AuthToken(SecretString);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token.into().into_boxed_str()))
    }

    /// Expose the token value (only for handing back to the provider).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthToken([REDACTED, {} chars])", self.len())
    }
}

impl PartialEq for AuthToken {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for AuthToken {}

impl Serialize for AuthToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for AuthToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(AuthToken::new)
    }
}

// ============================================================================
// SESSION RECORD
// ============================================================================

/// Snapshot of the signed-in user kept in tab-scoped storage.
///
/// Only `uid` is required. Records written by older clients may lack any of
/// the other fields or hold them with a different type; such fields read as
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub uid: UserId,
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "lenient")]
    pub apartment_number: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub login_time: Option<Timestamp>,
    #[serde(default, deserialize_with = "lenient")]
    pub token: Option<AuthToken>,
}

/// Read an optional field, treating a value of the wrong type as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl SessionRecord {
    /// Record a fresh sign-in.
    pub fn for_sign_in(user: &AuthUser, token: AuthToken, login_time: Timestamp) -> Self {
        Self {
            uid: user.uid.clone(),
            email: Some(user.email.clone()),
            name: user.name.clone(),
            role: user.role,
            apartment_number: user.apartment_number.clone(),
            phone: user.phone.clone(),
            login_time: Some(login_time),
            token: Some(token),
        }
    }

    /// Parse a persisted record.
    ///
    /// A record is structurally valid when it is a JSON object with a
    /// non-empty `uid`.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let record: SessionRecord =
            serde_json::from_str(raw).map_err(|e| SessionError::Malformed {
                reason: e.to_string(),
            })?;
        if record.uid.is_empty() {
            return Err(SessionError::Malformed {
                reason: "uid is empty".to_string(),
            });
        }
        Ok(record)
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::SerializeFailed {
            reason: e.to_string(),
        })
    }

    /// Read and parse the record stored under `key`.
    ///
    /// A missing key and a malformed record both yield `None`. A malformed
    /// record is logged, never returned as an error.
    pub fn load(store: &dyn SessionStore, key: &str) -> Option<Self> {
        let raw = store.get(key)?;
        match Self::parse(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Ignoring malformed session record");
                None
            }
        }
    }

    /// Write this record under `key`.
    pub fn save(&self, store: &dyn SessionStore, key: &str) -> residenthub_core::HubResult<()> {
        store.set(key, &self.to_json()?)
    }

    /// The published identity this record restores to.
    pub fn to_user(&self) -> AuthUser {
        AuthUser {
            uid: self.uid.clone(),
            email: self.email.clone().unwrap_or_default(),
            display_name: None,
            name: self.name.clone(),
            role: self.role,
            apartment_number: self.apartment_number.clone(),
            phone: self.phone.clone(),
            created_at: None,
            updated_at: None,
        }
    }

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
