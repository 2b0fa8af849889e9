//! Effects
//!
//! Work the host must perform on behalf of the coordinator.

use std::time::Duration;

use crate::LoadError;
use crate::capability::FeatureName;
use crate::session::{AttemptToken, LoadState, SessionId, TimerToken};

/// Polyfill that can rescue a failing format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolyfillKind {
    Webp,
}

/// Published state, as seen by the rendering layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub session: SessionId,
    pub state: LoadState,
    pub current_variant: String,
    pub attempts_used: u32,
}

/// Host-side effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run the format support probe; report through `on_capability`
    ProbeFormat { feature: FeatureName },
    /// Register a one-shot proximity observation; report through `on_eligible`
    ObserveVisibility { session: SessionId, margin_px: u32 },
    /// Drop the proximity observation, fired or not
    ReleaseVisibility { session: SessionId },
    /// Arm a timer; report through `on_timer`
    StartTimer { token: TimerToken, delay: Duration },
    CancelTimer { token: TimerToken },
    /// Issue a request; report through `on_fetch_outcome`
    Fetch { attempt: AttemptToken, url: String },
    /// Stop waiting on a fetch whose outcome can no longer matter
    AbandonFetch { attempt: AttemptToken },
    /// Load a polyfill; report through `on_polyfill_result`
    LoadPolyfill { session: SessionId, kind: PolyfillKind },
    /// Stop waiting on a polyfill for a superseded session
    AbandonPolyfill { session: SessionId },
    Publish(StateSnapshot),
    /// Terminal success, at most once per activation
    NotifyLoad { session: SessionId },
    /// Terminal failure, at most once per activation
    NotifyError { session: SessionId, reason: LoadError },
}
