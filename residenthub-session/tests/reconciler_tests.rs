//! Startup reconciliation scenarios.
//!
//! A valid persisted session is published before any listener exists; a
//! missing or malformed one falls through to exactly one listener
//! registration; teardown unsubscribes once and silences later deliveries.

use residenthub_core::SessionSettings;
use residenthub_session::{
    AuthReconciler, AuthStore, MemorySessionStore, ProviderUser, ReconcilerState,
};
use residenthub_test_utils::{fixtures, init_test_tracing, MockIdentityProvider, MockProfileStore};
use std::sync::Arc;
use std::time::Duration;

struct Setup {
    provider: Arc<MockIdentityProvider>,
    profiles: Arc<MockProfileStore>,
    store: AuthStore,
    reconciler: AuthReconciler,
}

fn setup(raw_session: Option<&str>) -> Setup {
    init_test_tracing();
    let session = match raw_session {
        Some(raw) => MemorySessionStore::with_entry("societycare_auth", raw),
        None => MemorySessionStore::new(),
    };
    let provider = Arc::new(MockIdentityProvider::new());
    let profiles = Arc::new(MockProfileStore::with_profile(fixtures::resident_profile("u1")));
    let store = AuthStore::new();
    let reconciler = AuthReconciler::new(
        Arc::new(session),
        provider.clone(),
        profiles.clone(),
        store.clone(),
        SessionSettings::default(),
    );
    Setup {
        provider,
        profiles,
        store,
        reconciler,
    }
}

/// Let spawned tasks run on the current-thread runtime.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn restored_session_is_published_synchronously() {
    let mut s = setup(Some(&fixtures::session_json("u1")));

    assert_eq!(s.reconciler.start(), ReconcilerState::Restored);

    // Visible before any await point.
    let state = s.store.snapshot();
    assert!(state.is_authenticated);
    assert_eq!(state.user.as_ref().map(|u| u.uid.as_str()), Some("u1"));
    assert_eq!(s.provider.registration_count(), 0);
    assert_eq!(s.profiles.fetch_count(), 0);
}

#[tokio::test]
async fn session_with_null_email_is_still_restored() {
    let mut s = setup(Some(r#"{"uid":"u1","email":null}"#));

    assert_eq!(s.reconciler.start(), ReconcilerState::Restored);
    assert_eq!(s.provider.registration_count(), 0);
    let user = s.store.snapshot().user.unwrap();
    assert_eq!(user.uid.as_str(), "u1");
    assert_eq!(user.email, "");
}

#[test]
fn start_outside_runtime_leaves_provider_untouched() {
    let mut s = setup(None);

    assert_eq!(s.reconciler.start(), ReconcilerState::Uninitialized);
    assert_eq!(s.provider.registration_count(), 0);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    runtime.block_on(async {
        assert_eq!(s.reconciler.start(), ReconcilerState::Listening);
    });
    assert_eq!(s.provider.registration_count(), 1);

    s.reconciler.teardown();
    assert_eq!(s.provider.unsubscribe_count(), 1);
    assert_eq!(s.provider.active_listener_count(), 0);
}

#[tokio::test]
async fn malformed_session_falls_back_to_single_listener() {
    let mut s = setup(Some("{not json"));

    assert_eq!(s.reconciler.start(), ReconcilerState::Listening);
    assert_eq!(s.provider.registration_count(), 1);
    assert!(!s.store.snapshot().is_authenticated);
    assert!(s.store.snapshot().error.is_none());
}

#[tokio::test]
async fn session_without_uid_falls_back_to_listener() {
    let mut s = setup(Some(r#"{"email":"asha@greenpark.in"}"#));
    assert_eq!(s.reconciler.start(), ReconcilerState::Listening);
    assert_eq!(s.provider.registration_count(), 1);
}

#[tokio::test]
async fn teardown_before_delivery_unsubscribes_once_and_publishes_nothing() {
    let mut s = setup(None);
    let rx = s.store.subscribe();

    s.reconciler.start();
    assert_eq!(s.provider.active_listener_count(), 1);

    s.reconciler.teardown();
    assert_eq!(s.provider.unsubscribe_count(), 1);
    assert_eq!(s.provider.active_listener_count(), 0);

    s.provider.emit(Some(ProviderUser::new("u1", fixtures::RESIDENT_EMAIL)));
    settle().await;

    drop(s.reconciler);
    assert_eq!(s.provider.unsubscribe_count(), 1);
    assert!(!rx.has_changed().unwrap_or(false));
    assert_eq!(s.store.snapshot(), Default::default());
}

#[tokio::test]
async fn listener_user_is_enriched_with_profile() {
    let mut s = setup(None);
    let mut rx = s.store.subscribe();
    s.reconciler.start();

    s.provider
        .emit(Some(ProviderUser::new("u1", fixtures::RESIDENT_EMAIL).with_display_name("asha")));
    tokio::time::timeout(Duration::from_secs(1), rx.changed())
        .await
        .unwrap()
        .unwrap();

    let state = rx.borrow().clone();
    let user = state.user.unwrap();
    assert_eq!(user.name.as_deref(), Some("Asha Rao"));
    assert_eq!(user.apartment_number.as_deref(), Some("B-204"));
    assert_eq!(s.profiles.fetch_count(), 1);
}

#[tokio::test]
async fn each_change_is_delivered_once_in_order() {
    let mut s = setup(None);
    let mut rx = s.store.subscribe();
    s.reconciler.start();

    s.provider.emit(Some(ProviderUser::new("u1", fixtures::RESIDENT_EMAIL)));
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_authenticated);

    s.provider.emit(None);
    rx.changed().await.unwrap();
    assert!(!rx.borrow_and_update().is_authenticated);
    assert_eq!(s.profiles.fetch_count(), 1);
}

#[tokio::test]
async fn enrichment_failure_is_recorded_not_raised() {
    let mut s = setup(None);
    let mut rx = s.store.subscribe();
    s.profiles.set_fail_fetch(true);
    s.reconciler.start();

    s.provider.emit(Some(ProviderUser::new("u1", fixtures::RESIDENT_EMAIL)));
    rx.changed().await.unwrap();

    let state = rx.borrow().clone();
    assert!(!state.is_authenticated);
    assert!(state.error.unwrap().contains("u1"));
}

#[tokio::test]
async fn missing_profile_publishes_provider_identity() {
    let mut s = setup(None);
    let mut rx = s.store.subscribe();
    s.reconciler.start();

    s.provider.emit(Some(ProviderUser::new("stranger", "x@y.co")));
    rx.changed().await.unwrap();

    let user = rx.borrow().user.clone().unwrap();
    assert_eq!(user.uid.as_str(), "stranger");
    assert_eq!(user.role, None);
}
