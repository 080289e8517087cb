//! Caller-driven session operations.
//!
//! Each operation validates its input, talks to the provider and profile
//! store, keeps the persisted session record in step and publishes through
//! the [`AuthStore`]. Upstream failures are returned to the caller and also
//! recorded on the auth state's `error` field.

use residenthub_core::validation::{
    optional_apartment, optional_phone, require, require_email, require_password,
};
use residenthub_core::{
    AuthError, Clock, HubError, HubResult, ProfileUpdate, Role, SessionSettings, UserId,
    UserProfile,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::provider::{IdentityProvider, ProfileStore};
use crate::record::{AuthToken, SessionRecord};
use crate::state::{AuthAction, AuthStore};
use crate::store::SessionStore;
use crate::user::AuthUser;

/// Stored when the provider hands back no access token.
const FALLBACK_TOKEN: &str = "provider-token";

/// Details collected by the registration form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub apartment_number: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Registration {
    pub fn resident(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: Role::Resident,
            apartment_number: None,
            phone: None,
        }
    }

    fn validate(&self) -> HubResult<()> {
        require("name", &self.name)?;
        optional_phone("phone", self.phone.as_deref())?;
        optional_apartment("apartmentNumber", self.apartment_number.as_deref())?;
        Ok(())
    }
}

/// Session operations over injected provider, profile store and storage.
pub struct SessionService {
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    session: Arc<dyn SessionStore>,
    store: AuthStore,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
}

impl SessionService {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        session: Arc<dyn SessionStore>,
        store: AuthStore,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            provider,
            profiles,
            session,
            store,
            clock,
            settings,
        }
    }

    pub fn auth_store(&self) -> &AuthStore {
        &self.store
    }

    /// Sign in, load the profile document, persist the session record and
    /// publish the user.
    pub async fn sign_in(&self, email: &str, password: &str) -> HubResult<AuthUser> {
        require_email("email", email)?;
        require("password", password)?;

        self.store.dispatch(AuthAction::SetLoading(true));
        let result = self.sign_in_inner(email, password).await;
        self.publish_outcome(&result, |user| AuthAction::SetUser(Some(user.clone())));
        result
    }

    async fn sign_in_inner(&self, email: &str, password: &str) -> HubResult<AuthUser> {
        let provider_user = self.provider.sign_in(email, password).await?;
        let profile = self
            .profiles
            .fetch_profile(&provider_user.uid)
            .await?
            .ok_or_else(|| AuthError::ProfileMissing {
                uid: provider_user.uid.to_string(),
            })?;

        let user = AuthUser::from_provider(&provider_user, Some(&profile));
        let token = provider_user
            .access_token
            .clone()
            .unwrap_or_else(|| AuthToken::new(FALLBACK_TOKEN));
        SessionRecord::for_sign_in(&user, token, self.clock.now())
            .save(self.session.as_ref(), &self.settings.storage_key)?;

        tracing::info!(uid = %user.uid, role = ?user.role, "Signed in");
        Ok(user)
    }

    /// Sign out of the provider, drop the persisted record and publish
    /// logout.
    pub async fn sign_out(&self) -> HubResult<()> {
        let result = self.sign_out_inner().await;
        self.publish_outcome(&result, |_| AuthAction::Logout);
        result
    }

    async fn sign_out_inner(&self) -> HubResult<()> {
        self.provider.sign_out().await?;
        self.session.remove(&self.settings.storage_key)?;
        tracing::info!("Signed out and cleared session");
        Ok(())
    }

    /// Create an account and its profile document.
    ///
    /// Does not sign the new user in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        registration: &Registration,
    ) -> HubResult<AuthUser> {
        require_email("email", email)?;
        require_password("password", password)?;
        registration.validate()?;

        self.store.dispatch(AuthAction::SetLoading(true));
        let result = self.register_inner(email, password, registration).await;
        match &result {
            Ok(_) => self.store.dispatch(AuthAction::SetLoading(false)),
            Err(err) => self.store.dispatch(AuthAction::SetError(err.to_string())),
        }
        result
    }

    async fn register_inner(
        &self,
        email: &str,
        password: &str,
        registration: &Registration,
    ) -> HubResult<AuthUser> {
        let provider_user = self
            .provider
            .create_user(email, password, &registration.name)
            .await?;

        let now = self.clock.now();
        let profile = UserProfile {
            uid: provider_user.uid.clone(),
            email: provider_user.email.clone(),
            name: registration.name.clone(),
            role: registration.role,
            apartment_number: non_blank(registration.apartment_number.as_deref()),
            phone: non_blank(registration.phone.as_deref()),
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.profiles.put_profile(&profile).await?;

        tracing::info!(uid = %profile.uid, role = %profile.role, "Registered user");
        Ok(AuthUser::from_provider(&provider_user, Some(&profile)))
    }

    /// Merge `update` into the profile document, then into the published
    /// user and the persisted session record when they belong to `uid`.
    pub async fn update_profile(&self, uid: &UserId, update: &ProfileUpdate) -> HubResult<()> {
        if let Some(name) = &update.name {
            require("name", name)?;
        }
        optional_phone("phone", update.phone.as_deref())?;
        optional_apartment("apartmentNumber", update.apartment_number.as_deref())?;
        if update.is_empty() {
            return Ok(());
        }

        if let Err(err) = self.profiles.merge_profile(uid, update, self.clock.now()).await {
            self.store.dispatch(AuthAction::SetError(err.to_string()));
            return Err(err);
        }

        let is_current = self
            .store
            .snapshot()
            .user
            .is_some_and(|user| &user.uid == uid);
        if is_current {
            self.store.dispatch(AuthAction::UpdateProfile(update.clone()));
        }

        if let Some(mut record) = self.restore_from_session() {
            if &record.uid == uid {
                record.apply(update);
                record.save(self.session.as_ref(), &self.settings.storage_key)?;
            }
        }
        Ok(())
    }

    /// The persisted session record, if present and valid.
    pub fn restore_from_session(&self) -> Option<SessionRecord> {
        SessionRecord::load(self.session.as_ref(), &self.settings.storage_key)
    }

    /// Whether a session string is stored. Does not parse it.
    pub fn is_authenticated_via_session(&self) -> bool {
        self.session.contains(&self.settings.storage_key)
    }

    fn publish_outcome<T>(&self, result: &HubResult<T>, on_ok: impl FnOnce(&T) -> AuthAction) {
        let action = match result {
            Ok(value) => on_ok(value),
            Err(err) => {
                log_failure(err);
                AuthAction::SetError(err.to_string())
            }
        };
        self.store.dispatch(action);
    }
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("settings", &self.settings)
            .finish()
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn log_failure(err: &HubError) {
    match err {
        HubError::Validation(_) => tracing::debug!(error = %err, "Session operation rejected"),
        _ => tracing::warn!(error = %err, "Session operation failed"),
    }
}
