//! Seams to the hosted identity provider and profile document store.

use async_trait::async_trait;
use residenthub_core::{HubResult, ProfileUpdate, Timestamp, UserId, UserProfile};
use std::sync::Arc;

use crate::user::ProviderUser;

/// Callback invoked on every sign-in state change. `None` means signed out.
pub type AuthListener = Arc<dyn Fn(Option<ProviderUser>) + Send + Sync + 'static>;

/// Deregisters a listener. Consumed on call so it can only run once.
pub type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;

/// Hosted identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> HubResult<ProviderUser>;

    async fn sign_out(&self) -> HubResult<()>;

    /// Create an account and set its display name.
    async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> HubResult<ProviderUser>;

    /// Register `listener` for sign-in state changes.
    ///
    /// The listener may be invoked from any thread at any later time until
    /// the returned handle is called.
    fn on_auth_state_changed(&self, listener: AuthListener) -> Unsubscribe;
}

/// `users/{uid}` profile documents.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when no document exists for `uid`.
    async fn fetch_profile(&self, uid: &UserId) -> HubResult<Option<UserProfile>>;

    /// Create or replace the document.
    async fn put_profile(&self, profile: &UserProfile) -> HubResult<()>;

    /// Merge set fields into the existing document and stamp `updated_at`.
    async fn merge_profile(
        &self,
        uid: &UserId,
        update: &ProfileUpdate,
        now: Timestamp,
    ) -> HubResult<()>;
}
