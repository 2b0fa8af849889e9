//! Load Sessions
//!
//! One activation's live state. Every asynchronous callback carries a token
//! naming the session (and attempt) it was issued for; the coordinator drops
//! callbacks whose token no longer matches.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::descriptor::ResourceDescriptor;
use crate::variant::FallbackState;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic session token, unique per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next id
    pub fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one fetch attempt within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptToken {
    pub session: SessionId,
    pub seq: u32,
}

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Eligibility without a visibility observer
    EligibilityFallback,
    /// Per-attempt deadline
    AttemptTimeout,
    /// Delay before the next retry
    Backoff,
}

/// Identifies one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub session: SessionId,
    pub seq: u32,
    pub kind: TimerKind,
}

/// Load state published to the rendering layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    PendingVisibility,
    Loading,
    RetryWaiting,
    Loaded,
    Failed,
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Loaded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PendingVisibility => "pending-visibility",
            Self::Loading => "loading",
            Self::RetryWaiting => "retry-waiting",
            Self::Loaded => "loaded",
            Self::Failed => "failed",
        }
    }
}

/// Live state for one activation
#[derive(Debug, Clone)]
pub struct LoadSession {
    id: SessionId,
    descriptor: ResourceDescriptor,
    pub(crate) state: LoadState,
    pub(crate) attempts_used: u32,
    pub(crate) current_variant: String,
    /// Bumped on every attempt start or abandonment
    pub(crate) attempt_seq: u32,
    /// Fetch issued and not yet settled or abandoned
    pub(crate) in_flight: Option<AttemptToken>,
    /// At most one timer is armed at a time; each state owns its own kind
    pub(crate) timer: Option<TimerToken>,
    pub(crate) watching_visibility: bool,
    pub(crate) fallback: FallbackState,
    pub(crate) polyfill_requested: bool,
    pub(crate) awaiting_polyfill: bool,
    /// Eligible, but held back because the network is offline
    pub(crate) held_offline: bool,
    /// `onLoad`/`onError` already fired
    pub(crate) resolved: bool,
}

impl LoadSession {
    pub fn new(descriptor: ResourceDescriptor) -> Self {
        Self {
            id: SessionId::next(),
            descriptor,
            state: LoadState::Idle,
            attempts_used: 0,
            current_variant: String::new(),
            attempt_seq: 0,
            in_flight: None,
            timer: None,
            watching_visibility: false,
            fallback: FallbackState::default(),
            polyfill_requested: false,
            awaiting_polyfill: false,
            held_offline: false,
            resolved: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    pub fn current_variant(&self) -> &str {
        &self.current_variant
    }

    pub fn fallback(&self) -> &FallbackState {
        &self.fallback
    }

    pub fn format_fallback_used(&self) -> bool {
        self.fallback.is_used()
    }

    pub fn polyfill_requested(&self) -> bool {
        self.polyfill_requested
    }

    pub fn is_held_offline(&self) -> bool {
        self.held_offline
    }

    /// Token for the attempt currently in flight
    pub fn attempt_token(&self) -> AttemptToken {
        AttemptToken { session: self.id, seq: self.attempt_seq }
    }

    /// Invalidate the in-flight attempt and return the next token
    pub(crate) fn next_attempt(&mut self) -> AttemptToken {
        self.attempt_seq = self.attempt_seq.wrapping_add(1);
        self.attempt_token()
    }

    /// Arm a timer, replacing any previous one
    pub(crate) fn arm_timer(&mut self, kind: TimerKind) -> TimerToken {
        let token = TimerToken { session: self.id, seq: self.attempt_seq, kind };
        self.timer = Some(token);
        token
    }

    pub fn accepts_attempt(&self, token: AttemptToken) -> bool {
        token == self.attempt_token() && self.state == LoadState::Loading
    }

    pub fn accepts_timer(&self, token: TimerToken) -> bool {
        self.timer == Some(token)
    }
}
