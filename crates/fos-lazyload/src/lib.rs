//! fOS Lazy Loading
//!
//! Decision engine behind lazily loaded media widgets: when to start fetching,
//! which variant to request, how to react to failures and when to give up.
//!
//! The engine performs no I/O. Every entry point on [`LifecycleCoordinator`]
//! is a transition that returns the [`Effect`]s the host must carry out
//! (start a timer, issue a fetch, observe visibility, publish state).
//!
//! # Example
//! ```rust,ignore
//! use fos_lazyload::{CapabilityCache, LifecycleCoordinator, LoadOptions, ResourceDescriptor};
//!
//! let caps = CapabilityCache::shared(Default::default());
//! let mut coordinator = LifecycleCoordinator::new(LoadOptions::default(), caps)?;
//! for effect in coordinator.activate(ResourceDescriptor::new("hero.webp")) {
//!     host.execute(effect);
//! }
//! ```

pub mod capability;
pub mod config;
pub mod coordinator;
pub mod descriptor;
pub mod effect;
pub mod network;
pub mod retry;
pub mod session;
pub mod variant;
pub mod visibility;

pub use capability::{CapabilityCache, CapabilitySnapshot, EnvironmentCapabilities, FeatureName};
pub use config::{LoadOptions, RetryConfig};
pub use coordinator::LifecycleCoordinator;
pub use descriptor::{ImageFormat, ResourceDescriptor};
pub use effect::{Effect, PolyfillKind, StateSnapshot};
pub use network::{EffectiveType, NetworkClass, NetworkCondition, NetworkMonitor, NetworkReading};
pub use retry::{FailureKind, FetchFailure, RetryAction, RetryPolicy};
pub use session::{AttemptToken, LoadSession, LoadState, SessionId, TimerKind, TimerToken};
pub use variant::{FallbackState, VariantSelector};
pub use visibility::{GateDecision, ProximityWatcher, ViewportRect, VisibilityGate};

/// Load failure taxonomy surfaced to hosts and renderers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("Transient load failure: {0}")]
    TransientLoadFailure(String),

    #[error("Attempt exceeded {timeout_ms}ms")]
    TimeoutExceeded { timeout_ms: u64 },

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Capability detection failed for {feature}: {reason}")]
    CapabilityDetectionFailure { feature: FeatureName, reason: String },

    #[error("Polyfill load failed: {0}")]
    PolyfillLoadFailure(String),

    #[error("Exhausted retries ({retries} used)")]
    ExhaustedRetries { retries: u32 },

    #[error("Stale callback for session {0}")]
    StaleCallback(SessionId),
}

/// Rejected load options
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("maxDelayMs ({max}) must be >= retryDelayMs ({base})")]
    DelayBounds { base: u64, max: u64 },

    #[error("timeoutMs must be greater than zero")]
    ZeroTimeout,
}
