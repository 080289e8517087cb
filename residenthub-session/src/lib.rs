//! ResidentHub Session - Session restore and auth reconciliation
//!
//! - [`SessionRecord`]: the signed-in user persisted in tab-scoped storage.
//! - [`AuthReconciler`]: at startup, restores from that record or falls back
//!   to the identity provider's live listener.
//! - [`RouteGuard`]: merges legacy, session and live auth sources into an
//!   allow/redirect decision under a [`MergePolicy`].
//! - [`SessionService`]: sign-in, sign-out, registration and profile updates.
//!
//! Vendor SDKs sit behind [`IdentityProvider`], [`ProfileStore`] and
//! [`SessionStore`].

pub mod decision;
pub mod provider;
pub mod reconciler;
pub mod record;
pub mod service;
pub mod state;
pub mod store;
pub mod user;

pub use decision::{
    resolve, AuthResolution, AuthSignals, AuthSource, LiveAuth, RouteDecision, RouteGuard,
    SourceKind, LOGIN_PATH,
};
pub use provider::{AuthListener, IdentityProvider, ProfileStore, Unsubscribe};
pub use reconciler::{AuthReconciler, ReconcilerState};
pub use record::{AuthToken, SessionRecord};
pub use residenthub_core::MergePolicy;
pub use service::{Registration, SessionService};
pub use state::{AuthAction, AuthState, AuthStore, LegacyAuthState};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use user::{AuthUser, ProviderUser};
