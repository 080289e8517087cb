//! Startup reconciliation of persisted and live auth state.
//!
//! ```text
//! Uninitialized --start--> Restored    (valid session record, published now)
//!               \--start--> Listening   (listener registered once)
//! ```
//!
//! Both end states are terminal. In `Listening`, provider callbacks are
//! forwarded over a channel to a driver task that enriches signed-in users
//! with their profile document before dispatching. `teardown` deregisters
//! the listener and closes a gate that every dispatch passes through, so no
//! state change is published once it returns.

use residenthub_core::{SessionSettings, UserId};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::provider::{AuthListener, IdentityProvider, ProfileStore, Unsubscribe};
use crate::record::SessionRecord;
use crate::state::{AuthAction, AuthStore};
use crate::store::SessionStore;
use crate::user::{AuthUser, ProviderUser};

/// Startup phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    Uninitialized,
    /// Identity taken from the persisted session record.
    Restored,
    /// Waiting on the identity provider.
    Listening,
}

/// Owns the auth listener for the lifetime of the app shell.
pub struct AuthReconciler {
    session: Arc<dyn SessionStore>,
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    store: AuthStore,
    settings: SessionSettings,
    state: ReconcilerState,
    unsubscribe: Option<Unsubscribe>,
    driver: Option<JoinHandle<()>>,
    /// Open while the reconciler is live. Dispatches from the listener path
    /// happen with this held.
    gate: Arc<Mutex<bool>>,
}

fn lock(gate: &Mutex<bool>) -> MutexGuard<'_, bool> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AuthReconciler {
    pub fn new(
        session: Arc<dyn SessionStore>,
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        store: AuthStore,
        settings: SessionSettings,
    ) -> Self {
        Self {
            session,
            provider,
            profiles,
            store,
            settings,
            state: ReconcilerState::Uninitialized,
            unsubscribe: None,
            driver: None,
            gate: Arc::new(Mutex::new(true)),
        }
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.unsubscribe.is_some()
    }

    /// Run startup once. Later calls return the state already reached.
    ///
    /// The listening path spawns the driver task on the current tokio
    /// runtime. Outside a runtime nothing is registered and the reconciler
    /// stays `Uninitialized`, so a later call can still start it.
    pub fn start(&mut self) -> ReconcilerState {
        if self.state != ReconcilerState::Uninitialized {
            return self.state;
        }
        if !*lock(&self.gate) {
            tracing::debug!("Reconciler already torn down; not starting");
            return self.state;
        }

        if let Some(record) = SessionRecord::load(self.session.as_ref(), &self.settings.storage_key) {
            tracing::info!(uid = %record.uid, "Restored user from session");
            self.store.dispatch(AuthAction::SetUser(Some(record.to_user())));
            self.state = ReconcilerState::Restored;
            return self.state;
        }

        // The driver needs a runtime; check before registering so a failed
        // start leaves nothing to unsubscribe.
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::warn!(error = %err, "No tokio runtime; auth listener not registered");
                return self.state;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel::<Option<ProviderUser>>();
        let gate = Arc::clone(&self.gate);
        let listener: AuthListener = Arc::new(move |user: Option<ProviderUser>| {
            if *lock(&gate) {
                let _ = tx.send(user);
            }
        });
        self.unsubscribe = Some(self.provider.on_auth_state_changed(listener));
        self.driver = Some(runtime.spawn(drive(
            rx,
            Arc::clone(&self.profiles),
            self.store.clone(),
            Arc::clone(&self.gate),
        )));
        tracing::debug!("Auth listener registered");

        self.state = ReconcilerState::Listening;
        self.state
    }

    /// Deregister the listener and stop publishing. Idempotent.
    pub fn teardown(&mut self) {
        *lock(&self.gate) = false;
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
            tracing::debug!("Auth listener unsubscribed");
        }
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl Drop for AuthReconciler {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for AuthReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthReconciler")
            .field("state", &self.state)
            .field("listening", &self.is_listening())
            .field("settings", &self.settings)
            .finish()
    }
}

async fn drive(
    mut events: mpsc::UnboundedReceiver<Option<ProviderUser>>,
    profiles: Arc<dyn ProfileStore>,
    store: AuthStore,
    gate: Arc<Mutex<bool>>,
) {
    while let Some(event) = events.recv().await {
        let action = match event {
            None => AuthAction::SetUser(None),
            Some(user) => enrich(profiles.as_ref(), &user).await,
        };
        let open = lock(&gate);
        if !*open {
            break;
        }
        store.dispatch(action);
    }
}

/// Fetch the profile document for a freshly reported user.
async fn enrich(profiles: &dyn ProfileStore, user: &ProviderUser) -> AuthAction {
    match profiles.fetch_profile(&user.uid).await {
        Ok(profile) => {
            if profile.is_none() {
                tracing::warn!(uid = %user.uid, "No profile document for signed-in user");
            }
            AuthAction::SetUser(Some(AuthUser::from_provider(user, profile.as_ref())))
        }
        Err(err) => {
            tracing::warn!(uid = %user.uid, error = %err, "Profile enrichment failed");
            AuthAction::SetError(enrichment_error(&user.uid, &err.to_string()))
        }
    }
}

fn enrichment_error(uid: &UserId, reason: &str) -> String {
    format!("Failed to load profile for {}: {}", uid, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use async_trait::async_trait;
    use residenthub_core::{HubResult, ProfileUpdate, Timestamp, UserProfile};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        registrations: AtomicUsize,
        unsubscribes: Arc<AtomicUsize>,
        listener: Mutex<Option<AuthListener>>,
    }

    impl CountingProvider {
        fn emit(&self, user: Option<ProviderUser>) {
            let listener = self.listener.lock().unwrap().clone();
            if let Some(listener) = listener {
                listener(user);
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for CountingProvider {
        async fn sign_in(&self, _: &str, _: &str) -> HubResult<ProviderUser> {
            unreachable!()
        }
        async fn sign_out(&self) -> HubResult<()> {
            unreachable!()
        }
        async fn create_user(&self, _: &str, _: &str, _: &str) -> HubResult<ProviderUser> {
            unreachable!()
        }
        fn on_auth_state_changed(&self, listener: AuthListener) -> Unsubscribe {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            *self.listener.lock().unwrap() = Some(listener);
            let unsubscribes = Arc::clone(&self.unsubscribes);
            Box::new(move || {
                unsubscribes.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    struct NoProfiles;

    #[async_trait]
    impl ProfileStore for NoProfiles {
        async fn fetch_profile(&self, _: &UserId) -> HubResult<Option<UserProfile>> {
            Ok(None)
        }
        async fn put_profile(&self, _: &UserProfile) -> HubResult<()> {
            Ok(())
        }
        async fn merge_profile(&self, _: &UserId, _: &ProfileUpdate, _: Timestamp) -> HubResult<()> {
            Ok(())
        }
    }

    fn reconciler(
        raw_session: Option<&str>,
    ) -> (AuthReconciler, Arc<CountingProvider>, AuthStore) {
        let session = match raw_session {
            Some(raw) => MemorySessionStore::with_entry("societycare_auth", raw),
            None => MemorySessionStore::new(),
        };
        let provider = Arc::new(CountingProvider::default());
        let store = AuthStore::new();
        let reconciler = AuthReconciler::new(
            Arc::new(session),
            provider.clone(),
            Arc::new(NoProfiles),
            store.clone(),
            SessionSettings::default(),
        );
        (reconciler, provider, store)
    }

    #[tokio::test]
    async fn test_valid_session_restores_without_listener() {
        let (mut reconciler, provider, store) = reconciler(Some(r#"{"uid":"u1","name":"Asha"}"#));

        assert_eq!(reconciler.start(), ReconcilerState::Restored);
        assert_eq!(provider.registrations.load(Ordering::SeqCst), 0);

        let state = store.snapshot();
        assert!(state.is_authenticated);
        assert_eq!(state.user.unwrap().name.as_deref(), Some("Asha"));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (mut reconciler, provider, _store) = reconciler(None);
        assert_eq!(reconciler.start(), ReconcilerState::Listening);
        assert_eq!(reconciler.start(), ReconcilerState::Listening);
        assert_eq!(provider.registrations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listener_event_is_published() {
        let (mut reconciler, provider, store) = reconciler(None);
        let mut rx = store.subscribe();
        reconciler.start();

        provider.emit(Some(ProviderUser::new("u5", "r@x.co")));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().user.as_ref().map(|u| u.uid.as_str()), Some("u5"));

        provider.emit(None);
        rx.changed().await.unwrap();
        assert!(!rx.borrow().is_authenticated);
    }

    #[tokio::test]
    async fn test_teardown_twice_unsubscribes_once() {
        let (mut reconciler, provider, _store) = reconciler(None);
        reconciler.start();
        reconciler.teardown();
        reconciler.teardown();
        drop(reconciler);
        assert_eq!(provider.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_without_runtime_registers_nothing() {
        let (mut reconciler, provider, _store) = reconciler(None);

        assert_eq!(reconciler.start(), ReconcilerState::Uninitialized);
        assert_eq!(provider.registrations.load(Ordering::SeqCst), 0);
        assert!(!reconciler.is_listening());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        assert_eq!(reconciler.start(), ReconcilerState::Listening);
        assert_eq!(provider.registrations.load(Ordering::SeqCst), 1);

        reconciler.teardown();
        assert_eq!(provider.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_after_teardown_does_nothing() {
        let (mut reconciler, provider, _store) = reconciler(None);
        reconciler.teardown();
        assert_eq!(reconciler.start(), ReconcilerState::Uninitialized);
        assert_eq!(provider.registrations.load(Ordering::SeqCst), 0);
    }
}
