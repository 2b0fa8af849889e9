//! Retry Policy
//!
//! Maps an attempt outcome to the next action: succeed, back off and retry,
//! request a format polyfill once, or fail for good.

use std::time::Duration;

use crate::LoadError;
use crate::capability::CapabilitySnapshot;
use crate::config::RetryConfig;
use crate::descriptor::ImageFormat;
use crate::network::NetworkCondition;
use crate::session::LoadSession;
use crate::variant::VariantSelector;

/// Why a fetch attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network error, retryable
    Network,
    /// Payload could not be decoded, retryable
    Decode,
    /// Attempt deadline expired, retryable
    Timeout,
    /// Cross-origin or policy violation, fatal
    Security,
    /// Superseded; the result belongs to nobody
    Cancelled,
}

/// Failure reported by the fetch primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Decode, message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Security, message)
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "superseded")
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(FailureKind::Timeout, format!("no response within {}ms", timeout_ms))
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FailureKind::Security
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Network | FailureKind::Decode | FailureKind::Timeout)
    }

    /// Error surfaced for this failure
    pub fn to_error(&self, timeout_ms: u64) -> LoadError {
        match self.kind {
            FailureKind::Timeout => LoadError::TimeoutExceeded { timeout_ms },
            FailureKind::Security => LoadError::SecurityViolation(self.message.clone()),
            FailureKind::Network | FailureKind::Decode => {
                LoadError::TransientLoadFailure(self.message.clone())
            }
            FailureKind::Cancelled => LoadError::TransientLoadFailure("cancelled".into()),
        }
    }
}

/// Decision for the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    Succeed,
    RetryAfter { delay: Duration, next_variant: Option<String> },
    RequestPolyfillThenRetry,
    Fail(LoadError),
    /// Stale result, no transition
    Discard,
}

/// Inputs for re-selecting a variant
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub selector: &'a VariantSelector,
    pub capabilities: &'a CapabilitySnapshot,
    pub network: &'a NetworkCondition,
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `min(base * 2^index, max)`
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt_index).unwrap_or(u64::MAX);
        let ms = self
            .config
            .base_delay_ms()
            .saturating_mul(factor)
            .min(self.config.max_delay_ms());
        Duration::from_millis(ms)
    }

    /// Whether a polyfill could rescue this session
    fn polyfill_path_open(&self, session: &LoadSession, capabilities: &CapabilitySnapshot) -> bool {
        session.descriptor().format == ImageFormat::Webp
            && !capabilities.supports(ImageFormat::Webp)
            && !session.polyfill_requested
    }

    /// Decide what happens after an attempt. Consumes a retry on transient
    /// failures and advances the format fallback chain when it applies.
    pub fn on_outcome(
        &self,
        session: &mut LoadSession,
        outcome: Result<(), &FetchFailure>,
        ctx: SelectionContext<'_>,
    ) -> RetryAction {
        let failure = match outcome {
            Ok(()) => return RetryAction::Succeed,
            Err(failure) => failure,
        };

        if failure.kind == FailureKind::Cancelled {
            return RetryAction::Discard;
        }
        if failure.is_fatal() {
            return RetryAction::Fail(failure.to_error(self.config.timeout_ms()));
        }

        if session.attempts_used < self.config.max_attempts() {
            let delay = self.backoff_delay(session.attempts_used);
            session.attempts_used += 1;
            if session.fallback.applies(session.descriptor(), ctx.capabilities) {
                session.fallback.advance();
            }
            let next_variant = ctx.selector.select_variant(
                session.descriptor(),
                ctx.capabilities,
                ctx.network,
                &session.fallback,
            );
            return RetryAction::RetryAfter { delay, next_variant };
        }

        if self.polyfill_path_open(session, ctx.capabilities) {
            session.polyfill_requested = true;
            return RetryAction::RequestPolyfillThenRetry;
        }

        RetryAction::Fail(LoadError::ExhaustedRetries { retries: session.attempts_used })
    }
}
