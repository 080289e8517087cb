//! Route protection.
//!
//! Three sources can claim a user is signed in: the older token scheme, the
//! persisted session record, and the live provider listener. A
//! [`MergePolicy`] folds them into one decision and reports when they
//! disagree.
//!
//! | Policy       | Authenticated when                                        |
//! |--------------|-----------------------------------------------------------|
//! | `AnySignal`  | any source reports a user                                 |
//! | `Precedence` | live listener if it has reported, else session, else legacy |

use residenthub_core::{MergePolicy, SessionSettings};
use std::fmt;
use std::sync::Arc;

use crate::record::{AuthToken, SessionRecord};
use crate::state::{AuthState, LegacyAuthState};
use crate::store::SessionStore;
use crate::user::AuthUser;

/// Where route protection sends a navigation.
pub const LOGIN_PATH: &str = "/login";

// ============================================================================
// SOURCES
// ============================================================================

/// What the live listener has reported so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveAuth {
    /// Nothing published yet.
    Pending,
    SignedIn(AuthUser),
    SignedOut,
}

/// One authentication source.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthSource {
    /// Older token scheme: in-memory token and user, plus whether its
    /// persisted session string exists.
    Legacy {
        token: Option<AuthToken>,
        user: Option<AuthUser>,
        stored: bool,
    },
    /// Persisted session record. `present` is raw key presence; `record`
    /// is set only when the stored string parses.
    SessionDoc {
        present: bool,
        record: Option<SessionRecord>,
    },
    LiveListener(LiveAuth),
}

/// Discriminant of [`AuthSource`], used to say which source decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Legacy,
    SessionDoc,
    LiveListener,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Legacy => "legacy",
            SourceKind::SessionDoc => "session_doc",
            SourceKind::LiveListener => "live_listener",
        };
        f.write_str(name)
    }
}

impl AuthSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            AuthSource::Legacy { .. } => SourceKind::Legacy,
            AuthSource::SessionDoc { .. } => SourceKind::SessionDoc,
            AuthSource::LiveListener(_) => SourceKind::LiveListener,
        }
    }

    /// Whether this source claims a user, counting presence the way the
    /// compatibility check always has.
    pub fn signals_user(&self) -> bool {
        match self {
            AuthSource::Legacy {
                token,
                user,
                stored,
            } => *stored || (token.as_ref().is_some_and(|t| !t.is_empty()) && user.is_some()),
            AuthSource::SessionDoc { present, .. } => *present,
            AuthSource::LiveListener(live) => matches!(live, LiveAuth::SignedIn(_)),
        }
    }

    /// Whether this source positively says nobody is signed in.
    fn signals_signed_out(&self) -> bool {
        matches!(self, AuthSource::LiveListener(LiveAuth::SignedOut))
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Outcome of merging sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthResolution {
    pub authenticated: bool,
    /// Source that settled the decision, if any source was consulted
    /// positively or authoritatively.
    pub decided_by: Option<SourceKind>,
    /// A source claims a user while the live listener reports signed out.
    pub conflict: bool,
}

/// Merge `sources` under `policy`.
pub fn resolve(policy: MergePolicy, sources: &[AuthSource]) -> AuthResolution {
    let conflict = sources.iter().any(AuthSource::signals_signed_out)
        && sources.iter().any(AuthSource::signals_user);

    let (authenticated, decided_by) = match policy {
        MergePolicy::AnySignal => match sources.iter().find(|s| s.signals_user()) {
            Some(source) => (true, Some(source.kind())),
            None => (false, None),
        },
        MergePolicy::Precedence => resolve_by_precedence(sources),
    };

    AuthResolution {
        authenticated,
        decided_by,
        conflict,
    }
}

fn resolve_by_precedence(sources: &[AuthSource]) -> (bool, Option<SourceKind>) {
    let find = |kind: SourceKind| sources.iter().find(|s| s.kind() == kind);

    if let Some(AuthSource::LiveListener(live)) = find(SourceKind::LiveListener) {
        match live {
            LiveAuth::SignedIn(_) => return (true, Some(SourceKind::LiveListener)),
            LiveAuth::SignedOut => return (false, Some(SourceKind::LiveListener)),
            LiveAuth::Pending => {}
        }
    }
    // Only a record that parses counts here.
    if let Some(AuthSource::SessionDoc {
        record: Some(_), ..
    }) = find(SourceKind::SessionDoc)
    {
        return (true, Some(SourceKind::SessionDoc));
    }
    match find(SourceKind::Legacy) {
        Some(legacy) if legacy.signals_user() => (true, Some(SourceKind::Legacy)),
        _ => (false, None),
    }
}

// ============================================================================
// SIGNALS
// ============================================================================

/// The four raw signals route protection reads.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSignals {
    /// In-memory legacy token and user.
    pub legacy: LegacyAuthState,
    /// Live listener state.
    pub live: LiveAuth,
    /// Legacy session string present in storage.
    pub legacy_stored: bool,
    /// Session record key present in storage, with its parse if valid.
    pub session_present: bool,
    pub session_record: Option<SessionRecord>,
}

impl AuthSignals {
    pub fn sources(&self) -> [AuthSource; 3] {
        [
            AuthSource::Legacy {
                token: self.legacy.token.clone(),
                user: self.legacy.user.clone(),
                stored: self.legacy_stored,
            },
            AuthSource::LiveListener(self.live.clone()),
            AuthSource::SessionDoc {
                present: self.session_present,
                record: self.session_record.clone(),
            },
        ]
    }

    /// Inclusive OR of the four signals.
    pub fn any_signal(&self) -> bool {
        self.legacy.has_user()
            || matches!(self.live, LiveAuth::SignedIn(_))
            || self.legacy_stored
            || self.session_present
    }
}

// ============================================================================
// ROUTE GUARD
// ============================================================================

/// Result of guarding a protected route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    RedirectToLogin,
}

impl RouteDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RouteDecision::Allow)
    }

    /// Path to navigate to instead, if any.
    pub fn redirect_path(&self) -> Option<&'static str> {
        match self {
            RouteDecision::Allow => None,
            RouteDecision::RedirectToLogin => Some(LOGIN_PATH),
        }
    }
}

/// Stateless guard for protected routes.
///
/// Every call re-reads storage and recomputes; nothing is cached or
/// subscribed to.
pub struct RouteGuard {
    storage: Arc<dyn SessionStore>,
    settings: SessionSettings,
    policy: MergePolicy,
}

impl RouteGuard {
    pub fn new(storage: Arc<dyn SessionStore>, settings: SessionSettings, policy: MergePolicy) -> Self {
        Self {
            storage,
            settings,
            policy,
        }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Collect the signals for the given store state.
    pub fn signals(&self, state: &AuthState, legacy: &LegacyAuthState) -> AuthSignals {
        let raw_session = self.storage.get(&self.settings.storage_key);
        let session_record = raw_session
            .as_deref()
            .and_then(|raw| SessionRecord::parse(raw).ok());
        AuthSignals {
            legacy: legacy.clone(),
            live: state.live(),
            legacy_stored: self.storage.contains(&self.settings.legacy_storage_key),
            session_present: raw_session.is_some(),
            session_record,
        }
    }

    pub fn evaluate(&self, state: &AuthState, legacy: &LegacyAuthState) -> AuthResolution {
        let signals = self.signals(state, legacy);
        let resolution = resolve(self.policy, &signals.sources());
        if resolution.conflict {
            tracing::warn!(
                policy = ?self.policy,
                authenticated = resolution.authenticated,
                decided_by = ?resolution.decided_by,
                "Auth sources disagree: live listener reports signed out"
            );
        }
        resolution
    }

    pub fn check(&self, state: &AuthState, legacy: &LegacyAuthState) -> RouteDecision {
        if self.evaluate(state, legacy).authenticated {
            RouteDecision::Allow
        } else {
            RouteDecision::RedirectToLogin
        }
    }
}

impl fmt::Debug for RouteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteGuard")
            .field("settings", &self.settings)
            .field("policy", &self.policy)
            .finish()
    }
}
