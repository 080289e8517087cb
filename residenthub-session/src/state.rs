//! Observable auth state.
//!
//! [`AuthStore::dispatch`] is the only way to change [`AuthState`]; views
//! hold a `watch::Receiver` and re-render on change.

use residenthub_core::{ProfileUpdate, Role};
use std::sync::Arc;
use tokio::sync::watch;

use crate::decision::LiveAuth;
use crate::record::AuthToken;
use crate::user::AuthUser;

/// Current sign-in state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<AuthUser>,
    pub is_authenticated: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub role: Option<Role>,
    /// Set once a user (or its absence) has been published by any path.
    pub resolved: bool,
}

/// State transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthAction {
    SetLoading(bool),
    /// Publish a user, or `None` for signed out.
    SetUser(Option<AuthUser>),
    SetError(String),
    ClearError,
    Logout,
    /// Shallow-merge into the current user; ignored when signed out.
    UpdateProfile(ProfileUpdate),
}

impl AuthAction {
    pub fn name(&self) -> &'static str {
        match self {
            AuthAction::SetLoading(_) => "set_loading",
            AuthAction::SetUser(_) => "set_user",
            AuthAction::SetError(_) => "set_error",
            AuthAction::ClearError => "clear_error",
            AuthAction::Logout => "logout",
            AuthAction::UpdateProfile(_) => "update_profile",
        }
    }
}

impl AuthState {
    pub fn reduce(&mut self, action: AuthAction) {
        match action {
            AuthAction::SetLoading(loading) => self.loading = loading,
            AuthAction::SetUser(user) => {
                self.is_authenticated = user.is_some();
                self.role = user.as_ref().and_then(|u| u.role);
                self.user = user;
                self.error = None;
                self.loading = false;
                self.resolved = true;
            }
            AuthAction::SetError(message) => {
                self.error = Some(message);
                self.loading = false;
            }
            AuthAction::ClearError => self.error = None,
            AuthAction::Logout => {
                self.user = None;
                self.is_authenticated = false;
                self.role = None;
                self.error = None;
                self.loading = false;
                self.resolved = true;
            }
            AuthAction::UpdateProfile(update) => {
                if let Some(user) = self.user.as_mut() {
                    user.apply(&update);
                }
            }
        }
    }

    /// The live-listener view of this state.
    pub fn live(&self) -> LiveAuth {
        match (&self.user, self.is_authenticated) {
            (Some(user), true) => LiveAuth::SignedIn(user.clone()),
            _ if self.resolved => LiveAuth::SignedOut,
            _ => LiveAuth::Pending,
        }
    }
}

/// State of the older token-based sign-in, still read by route protection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyAuthState {
    pub token: Option<AuthToken>,
    pub user: Option<AuthUser>,
}

impl LegacyAuthState {
    pub fn signed_in(token: AuthToken, user: AuthUser) -> Self {
        Self {
            token: Some(token),
            user: Some(user),
        }
    }

    /// True when both a non-empty token and a user are held.
    pub fn has_user(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.is_empty()) && self.user.is_some()
    }
}

/// Shared handle to the auth state.
#[derive(Debug, Clone)]
pub struct AuthStore {
    state: Arc<watch::Sender<AuthState>>,
    legacy: Arc<watch::Sender<LegacyAuthState>>,
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AuthState::default());
        let (legacy, _) = watch::channel(LegacyAuthState::default());
        Self {
            state: Arc::new(state),
            legacy: Arc::new(legacy),
        }
    }

    pub fn dispatch(&self, action: AuthAction) {
        tracing::trace!(action = action.name(), "Dispatching auth action");
        self.state.send_modify(|state| state.reduce(action));
    }

    pub fn snapshot(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn legacy(&self) -> LegacyAuthState {
        self.legacy.borrow().clone()
    }

    pub fn set_legacy(&self, legacy: LegacyAuthState) {
        self.legacy.send_replace(legacy);
    }
}
