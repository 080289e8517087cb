//! ResidentHub Test Utilities
//!
//! Centralized test infrastructure for the ResidentHub workspace:
//! - Mock identity provider, profile store and collection fetcher
//! - Proptest generators for profiles, session records and cache keys
//! - Test fixtures for common scenarios
//! - Custom assertions for the error taxonomy
//! - Test tracing setup

pub use residenthub_cache::{
    CacheKey, CollectionFetcher, ManualClock, ManualScheduler, TimerScheduler, TtlCache,
};
pub use residenthub_core::{
    AuthError, CacheSettings, Clock, HubConfig, HubError, HubResult, MergePolicy, ProfileUpdate,
    Role, SessionError, SessionSettings, StoreError, Timestamp, UserId, UserProfile,
    ValidationError,
};
pub use residenthub_session::{
    AuthListener, AuthToken, IdentityProvider, ProfileStore, ProviderUser, SessionRecord,
    Unsubscribe,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK IDENTITY PROVIDER
// ============================================================================

struct Account {
    password: String,
    user: ProviderUser,
}

/// In-memory identity provider.
///
/// Listeners are only invoked through [`MockIdentityProvider::emit`], so
/// tests decide exactly when an auth change is delivered.
#[derive(Default)]
pub struct MockIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    listeners: Arc<Mutex<HashMap<u64, AuthListener>>>,
    next_id: AtomicU64,
    registrations: AtomicUsize,
    unsubscribes: Arc<AtomicUsize>,
    sign_outs: AtomicUsize,
    fail_sign_out: AtomicBool,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account and return it as the provider would report it.
    pub fn add_account(&self, email: &str, password: &str, uid: &str) -> ProviderUser {
        let user = ProviderUser::new(uid, email)
            .with_access_token(AuthToken::new(format!("token-{}", uid)));
        lock(&self.accounts).insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    /// Deliver an auth change to every registered listener.
    pub fn emit(&self, user: Option<ProviderUser>) {
        let listeners: Vec<AuthListener> = lock(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(user.clone());
        }
    }

    /// Listeners registered over the provider's lifetime.
    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Unsubscribe handles that have been called.
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn active_listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    pub fn set_fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> HubResult<ProviderUser> {
        match lock(&self.accounts).get(email) {
            Some(account) if account.password == password => Ok(account.user.clone()),
            _ => Err(AuthError::SignInFailed {
                email: email.to_string(),
                reason: "invalid credentials".to_string(),
            }
            .into()),
        }
    }

    async fn sign_out(&self) -> HubResult<()> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::SignOutFailed {
                reason: "network unavailable".to_string(),
            }
            .into());
        }
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> HubResult<ProviderUser> {
        let mut accounts = lock(&self.accounts);
        if accounts.contains_key(email) {
            return Err(AuthError::RegistrationFailed {
                email: email.to_string(),
                reason: "email already in use".to_string(),
            }
            .into());
        }
        let uid = format!("uid-{}", accounts.len() + 1);
        let user = ProviderUser::new(uid.as_str(), email).with_display_name(display_name);
        accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        Ok(user)
    }

    fn on_auth_state_changed(&self, listener: AuthListener) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).insert(id, listener);
        self.registrations.fetch_add(1, Ordering::SeqCst);

        let listeners = Arc::clone(&self.listeners);
        let unsubscribes = Arc::clone(&self.unsubscribes);
        Box::new(move || {
            lock(&listeners).remove(&id);
            unsubscribes.fetch_add(1, Ordering::SeqCst);
        })
    }
}

// ============================================================================
// MOCK PROFILE STORE
// ============================================================================

/// In-memory `users` collection.
#[derive(Debug, Default)]
pub struct MockProfileStore {
    profiles: Mutex<HashMap<UserId, UserProfile>>,
    fetches: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: UserProfile) -> Self {
        let store = Self::new();
        store.insert(profile);
        store
    }

    pub fn insert(&self, profile: UserProfile) {
        lock(&self.profiles).insert(profile.uid.clone(), profile);
    }

    pub fn get(&self, uid: &UserId) -> Option<UserProfile> {
        lock(&self.profiles).get(uid).cloned()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self, uid: &UserId) -> HubResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed {
                collection: "users".to_string(),
                id: uid.to_string(),
                reason: "permission denied".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MockProfileStore {
    async fn fetch_profile(&self, uid: &UserId) -> HubResult<Option<UserProfile>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::FetchFailed {
                collection: "users".to_string(),
                reason: "unavailable".to_string(),
            }
            .into());
        }
        Ok(self.get(uid))
    }

    async fn put_profile(&self, profile: &UserProfile) -> HubResult<()> {
        self.check_writable(&profile.uid)?;
        self.insert(profile.clone());
        Ok(())
    }

    async fn merge_profile(
        &self,
        uid: &UserId,
        update: &ProfileUpdate,
        now: Timestamp,
    ) -> HubResult<()> {
        self.check_writable(uid)?;
        let mut profiles = lock(&self.profiles);
        let profile = profiles.entry(uid.clone()).or_insert_with(|| UserProfile {
            uid: uid.clone(),
            email: String::new(),
            name: String::new(),
            role: Role::default(),
            apartment_number: None,
            phone: None,
            created_at: None,
            updated_at: None,
        });
        update.apply_to(profile, now);
        Ok(())
    }
}

// ============================================================================
// MOCK COLLECTION FETCHER
// ============================================================================

/// Fetcher returning canned JSON per collection, failing the first
/// `failures` calls.
#[derive(Debug, Default)]
pub struct MockCollectionFetcher {
    collections: Mutex<HashMap<CacheKey, serde_json::Value>>,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MockCollectionFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(self, key: CacheKey, value: serde_json::Value) -> Self {
        lock(&self.collections).insert(key, value);
        self
    }

    pub fn fail_next(&self, failures: usize) {
        self.failures.store(failures, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CollectionFetcher<serde_json::Value> for MockCollectionFetcher {
    async fn fetch(&self, key: CacheKey, _user: Option<&UserId>) -> HubResult<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::FetchFailed {
                collection: key.to_string(),
                reason: "unavailable".to_string(),
            }
            .into());
        }
        Ok(lock(&self.collections)
            .get(&key)
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new())))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ResidentHub types.

    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        "[A-Za-z0-9]{8,28}".prop_map(UserId::new)
    }

    pub fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![Just(Role::Admin), Just(Role::Resident)]
    }

    pub fn arb_email() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9.]{0,12}@[a-z]{2,10}\\.(com|in|org)"
    }

    pub fn arb_apartment_number() -> impl Strategy<Value = String> {
        "[A-D]-[1-9][0-9]{2}"
    }

    pub fn arb_phone() -> impl Strategy<Value = String> {
        "\\+91[6-9][0-9]{9}"
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2020-01-01 .. 2030-01-01
        (1_577_836_800i64..1_893_456_000i64)
            .prop_map(|secs| DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default())
    }

    pub fn arb_user_profile() -> impl Strategy<Value = UserProfile> {
        (
            arb_user_id(),
            arb_email(),
            "[A-Z][a-z]{2,10}( [A-Z][a-z]{2,10})?",
            arb_role(),
            prop::option::of(arb_apartment_number()),
            prop::option::of(arb_phone()),
            prop::option::of(arb_timestamp()),
        )
            .prop_map(|(uid, email, name, role, apartment_number, phone, created_at)| {
                UserProfile {
                    uid,
                    email,
                    name,
                    role,
                    apartment_number,
                    phone,
                    created_at,
                    updated_at: created_at,
                }
            })
    }

    pub fn arb_session_record() -> impl Strategy<Value = SessionRecord> {
        (
            arb_user_profile(),
            arb_timestamp(),
            prop::option::of("[A-Za-z0-9._-]{16,64}"),
        )
            .prop_map(|(profile, login_time, token)| SessionRecord {
                uid: profile.uid,
                email: Some(profile.email),
                name: Some(profile.name),
                role: Some(profile.role),
                apartment_number: profile.apartment_number,
                phone: profile.phone,
                login_time: Some(login_time),
                token: token.map(AuthToken::new),
            })
    }

    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        prop::sample::select(CacheKey::ALL.to_vec())
    }

    pub fn arb_ttl_ms() -> impl Strategy<Value = u64> {
        1u64..600_000
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common scenarios.

    use super::*;
    use serde_json::json;
    use std::time::Duration;

    pub const RESIDENT_EMAIL: &str = "asha@greenpark.in";
    pub const RESIDENT_PASSWORD: &str = "resident123";
    pub const ADMIN_EMAIL: &str = "admin@greenpark.in";
    pub const ADMIN_PASSWORD: &str = "admin123";

    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::fixed())
    }

    pub fn manual_scheduler(clock: &Arc<ManualClock>) -> Arc<ManualScheduler> {
        Arc::new(ManualScheduler::new(clock.clone()))
    }

    /// A JSON cache with a manual clock and scheduler.
    pub fn json_cache(
        clock: &Arc<ManualClock>,
        scheduler: &Arc<ManualScheduler>,
    ) -> TtlCache<serde_json::Value> {
        let scheduler: Arc<dyn TimerScheduler> = scheduler.clone();
        TtlCache::new(clock.clone(), scheduler, &CacheSettings::default())
    }

    pub fn resident_profile(uid: &str) -> UserProfile {
        UserProfile {
            uid: UserId::new(uid),
            email: RESIDENT_EMAIL.to_string(),
            name: "Asha Rao".to_string(),
            role: Role::Resident,
            apartment_number: Some("B-204".to_string()),
            phone: Some("+919876543210".to_string()),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn admin_profile(uid: &str) -> UserProfile {
        UserProfile {
            uid: UserId::new(uid),
            email: ADMIN_EMAIL.to_string(),
            name: "Society Admin".to_string(),
            role: Role::Admin,
            apartment_number: None,
            phone: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Persisted session JSON for `uid`, in the stored field layout.
    pub fn session_json(uid: &str) -> String {
        json!({
            "uid": uid,
            "email": RESIDENT_EMAIL,
            "name": "Asha Rao",
            "role": "resident",
            "apartmentNumber": "B-204",
            "phone": null,
            "loginTime": "2024-01-01T00:00:00Z",
            "token": "stored-token"
        })
        .to_string()
    }

    pub fn payments() -> serde_json::Value {
        json!([{ "id": 1, "status": "pending" }])
    }

    pub fn five_seconds() -> Duration {
        Duration::from_millis(5000)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the ResidentHub error taxonomy.

    use super::*;

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &HubResult<T>) {
        match result {
            Err(HubError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_auth_error<T: std::fmt::Debug>(result: &HubResult<T>) {
        match result {
            Err(HubError::Auth(_)) => {}
            other => panic!("Expected Auth error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &HubResult<T>) {
        match result {
            Err(HubError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert that sign-in failed because the profile document is missing.
    #[track_caller]
    pub fn assert_profile_missing<T: std::fmt::Debug>(result: &HubResult<T>, uid: &str) {
        match result {
            Err(HubError::Auth(AuthError::ProfileMissing { uid: got })) => {
                assert_eq!(got, uid, "Wrong uid in ProfileMissing");
            }
            other => panic!("Expected ProfileMissing for {}, got: {:?}", uid, other),
        }
    }
}
