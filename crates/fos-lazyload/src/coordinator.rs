//! Lifecycle Coordinator
//!
//! Owns the single authoritative [`LoadSession`] for a widget. Each public
//! method is a transition: it validates the callback's token against the live
//! session, mutates state, and returns the effects the host must run.
//!
//! A callback whose session id (or attempt sequence) no longer matches is
//! dropped without any observable change. Requests issued by superseded
//! sessions may still complete at the transport level; they cannot reach
//! state.

use std::sync::Arc;

use crate::capability::{CapabilityCache, CapabilitySnapshot, FeatureName};
use crate::config::LoadOptions;
use crate::descriptor::ResourceDescriptor;
use crate::effect::{Effect, PolyfillKind, StateSnapshot};
use crate::network::NetworkCondition;
use crate::retry::{FetchFailure, RetryAction, RetryPolicy, SelectionContext};
use crate::session::{AttemptToken, LoadSession, LoadState, SessionId, TimerKind, TimerToken};
use crate::variant::VariantSelector;
use crate::visibility::{GateDecision, VisibilityGate};
use crate::{ConfigError, LoadError};

/// Top-level owner of load sessions for one widget instance
#[derive(Debug)]
pub struct LifecycleCoordinator {
    options: LoadOptions,
    policy: RetryPolicy,
    gate: VisibilityGate,
    selector: VariantSelector,
    capabilities: Arc<CapabilityCache>,
    network: NetworkCondition,
    session: Option<LoadSession>,
    last_published: Option<StateSnapshot>,
}

impl LifecycleCoordinator {
    pub fn new(options: LoadOptions, capabilities: Arc<CapabilityCache>) -> Result<Self, ConfigError> {
        let policy = RetryPolicy::new(options.retry_config()?);
        Ok(Self {
            gate: VisibilityGate::new(options.visibility_margin_px, options.fallback_delay()),
            selector: VariantSelector::new(options.low_bandwidth),
            policy,
            options,
            capabilities,
            network: NetworkCondition::unmonitored(),
            session: None,
            last_published: None,
        })
    }

    /// Start from a known network condition
    pub fn with_network(mut self, network: NetworkCondition) -> Self {
        self.network = network;
        self
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn network(&self) -> &NetworkCondition {
        &self.network
    }

    pub fn session(&self) -> Option<&LoadSession> {
        self.session.as_ref()
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(LoadSession::id)
    }

    pub fn state(&self) -> LoadState {
        self.session.as_ref().map_or(LoadState::Idle, LoadSession::state)
    }

    /// Start (or keep) a load cycle for a descriptor
    pub fn activate(&mut self, descriptor: ResourceDescriptor) -> Vec<Effect> {
        if let Some(session) = &self.session {
            if *session.descriptor() == descriptor {
                tracing::trace!("session {} unchanged, ignoring activation", session.id());
                return Vec::new();
            }
        }

        let mut effects = Vec::new();
        if let Some(mut previous) = self.session.take() {
            tracing::debug!("session {} superseded", previous.id());
            invalidate(&mut previous, &mut effects);
        }

        if self.capabilities.needs_probe(descriptor.format) {
            if let Some(feature) = descriptor.format.feature() {
                effects.push(Effect::ProbeFormat { feature });
            }
        }

        let mut session = LoadSession::new(descriptor);
        let caps = self.capabilities.snapshot(session.descriptor().format);
        tracing::debug!(
            "session {} activated for {}",
            session.id(),
            session.descriptor().primary_src
        );

        match self.gate.evaluate(session.descriptor(), &caps, self.options.critical) {
            GateDecision::Immediate => self.begin_attempt(&mut session, &caps, &mut effects),
            GateDecision::AwaitProximity { margin_px } => {
                session.state = LoadState::PendingVisibility;
                session.watching_visibility = true;
                effects.push(Effect::ObserveVisibility { session: session.id(), margin_px });
            }
            GateDecision::AwaitFallbackDelay { delay } => {
                session.state = LoadState::PendingVisibility;
                let token = session.arm_timer(TimerKind::EligibilityFallback);
                effects.push(Effect::StartTimer { token, delay });
            }
        }

        self.session = Some(session);
        self.publish(&mut effects);
        effects
    }

    /// The visibility probe fired
    pub fn on_eligible(&mut self, id: SessionId) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(mut session) = self.take_live(id) else {
            return effects;
        };

        if session.state == LoadState::PendingVisibility && session.watching_visibility {
            release_visibility(&mut session, &mut effects);
            let caps = self.capabilities.snapshot(session.descriptor().format);
            self.begin_attempt(&mut session, &caps, &mut effects);
        }

        self.restore(session, &mut effects);
        effects
    }

    /// A timer armed through [`Effect::StartTimer`] elapsed
    pub fn on_timer(&mut self, token: TimerToken) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(mut session) = self.take_live(token.session) else {
            return effects;
        };
        if !session.accepts_timer(token) {
            tracing::trace!("session {}: stale {:?} timer", token.session, token.kind);
            self.session = Some(session);
            return effects;
        }
        session.timer = None;

        let caps = self.capabilities.snapshot(session.descriptor().format);
        match (token.kind, session.state) {
            (TimerKind::EligibilityFallback, LoadState::PendingVisibility) => {
                self.begin_attempt(&mut session, &caps, &mut effects);
            }
            (TimerKind::AttemptTimeout, LoadState::Loading) => {
                let failure = FetchFailure::timeout(self.policy.config().timeout_ms());
                tracing::debug!("session {}: {}", session.id(), failure.message);
                abandon_fetch(&mut session, &mut effects);
                self.settle(&mut session, Err(&failure), &caps, &mut effects);
            }
            (TimerKind::Backoff, LoadState::RetryWaiting) => {
                self.begin_attempt(&mut session, &caps, &mut effects);
            }
            (kind, state) => {
                tracing::trace!("session {}: {:?} timer ignored in {:?}", session.id(), kind, state);
            }
        }

        self.restore(session, &mut effects);
        effects
    }

    /// The fetch primitive settled an attempt
    pub fn on_fetch_outcome(
        &mut self,
        attempt: AttemptToken,
        outcome: Result<(), FetchFailure>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(mut session) = self.take_live(attempt.session) else {
            return effects;
        };
        if !session.accepts_attempt(attempt) {
            tracing::trace!("session {}: stale attempt {}", attempt.session, attempt.seq);
            self.session = Some(session);
            return effects;
        }

        session.in_flight = None;
        let caps = self.capabilities.snapshot(session.descriptor().format);
        self.settle(&mut session, outcome.as_ref().map(|_| ()), &caps, &mut effects);

        self.restore(session, &mut effects);
        effects
    }

    /// The polyfill requested through [`Effect::LoadPolyfill`] settled
    pub fn on_polyfill_result(&mut self, id: SessionId, result: Result<(), String>) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(mut session) = self.take_live(id) else {
            return effects;
        };

        if session.awaiting_polyfill {
            session.awaiting_polyfill = false;
            match result {
                Ok(()) => {
                    tracing::info!("session {}: polyfill loaded, retrying primary source", id);
                    session.fallback.polyfill_loaded = true;
                    let caps = self.capabilities.snapshot(session.descriptor().format);
                    self.begin_attempt(&mut session, &caps, &mut effects);
                }
                Err(reason) => {
                    tracing::warn!("session {}: {}", id, LoadError::PolyfillLoadFailure(reason));
                    let retries = session.attempts_used;
                    fail(&mut session, LoadError::ExhaustedRetries { retries }, &mut effects);
                }
            }
        }

        self.restore(session, &mut effects);
        effects
    }

    /// Record a capability probe result in the shared cache
    pub fn on_capability(&mut self, feature: FeatureName, outcome: Result<bool, LoadError>) -> Vec<Effect> {
        self.capabilities.record_probe(feature, &outcome);
        Vec::new()
    }

    /// React to a network class transition. Restarts never consume a retry.
    pub fn on_network_change(&mut self, condition: NetworkCondition) -> Vec<Effect> {
        let mut effects = Vec::new();
        let previous = std::mem::replace(&mut self.network, condition);
        if previous.class == self.network.class {
            return effects;
        }
        let Some(mut session) = self.session.take() else {
            return effects;
        };

        let caps = self.capabilities.snapshot(session.descriptor().format);
        if session.state == LoadState::Loading {
            if self.network.is_offline() {
                tracing::debug!("session {}: offline, abandoning attempt", session.id());
                cancel_timer(&mut session, &mut effects);
                abandon_fetch(&mut session, &mut effects);
                session.next_attempt();
                session.held_offline = true;
                session.state = LoadState::RetryWaiting;
            } else {
                let next = self.selector.select_variant(
                    session.descriptor(),
                    &caps,
                    &self.network,
                    &session.fallback,
                );
                if next.as_deref() != Some(session.current_variant()) {
                    tracing::debug!(
                        "session {}: network {:?}, restarting with {:?}",
                        session.id(),
                        self.network.class,
                        next
                    );
                    self.begin_attempt(&mut session, &caps, &mut effects);
                }
            }
        } else if session.held_offline && !self.network.is_offline() {
            tracing::debug!("session {}: back online, resuming", session.id());
            self.begin_attempt(&mut session, &caps, &mut effects);
        }

        self.restore(session, &mut effects);
        effects
    }

    /// Drop the live session. Neither terminal notification fires afterwards.
    pub fn teardown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(mut session) = self.session.take() {
            tracing::debug!("session {} torn down in {:?}", session.id(), session.state());
            invalidate(&mut session, &mut effects);
        }
        self.last_published = None;
        effects
    }

    /// Take the live session if `id` still names it
    fn take_live(&mut self, id: SessionId) -> Option<LoadSession> {
        match self.session.take() {
            Some(session) if session.id() == id => Some(session),
            other => {
                tracing::trace!("{}", LoadError::StaleCallback(id));
                self.session = other;
                None
            }
        }
    }

    fn restore(&mut self, session: LoadSession, effects: &mut Vec<Effect>) {
        self.session = Some(session);
        self.publish(effects);
    }

    /// Start an attempt, or hold if the network is offline
    fn begin_attempt(
        &self,
        session: &mut LoadSession,
        caps: &CapabilitySnapshot,
        effects: &mut Vec<Effect>,
    ) {
        cancel_timer(session, effects);
        abandon_fetch(session, effects);

        let selected = self.selector.select_variant(
            session.descriptor(),
            caps,
            &self.network,
            &session.fallback,
        );
        let Some(url) = selected else {
            tracing::debug!("session {}: offline, holding", session.id());
            session.held_offline = true;
            if session.attempt_seq > 0 {
                session.state = LoadState::RetryWaiting;
            }
            return;
        };

        session.held_offline = false;
        let attempt = session.next_attempt();
        session.current_variant = url.clone();
        session.state = LoadState::Loading;
        let token = session.arm_timer(TimerKind::AttemptTimeout);

        tracing::debug!("session {}: attempt {} -> {}", session.id(), attempt.seq, url);
        session.in_flight = Some(attempt);
        effects.push(Effect::Fetch { attempt, url });
        effects.push(Effect::StartTimer { token, delay: self.policy.config().timeout() });
    }

    /// Apply the retry policy to an attempt outcome
    fn settle(
        &self,
        session: &mut LoadSession,
        outcome: Result<(), &FetchFailure>,
        caps: &CapabilitySnapshot,
        effects: &mut Vec<Effect>,
    ) {
        let ctx = SelectionContext {
            selector: &self.selector,
            capabilities: caps,
            network: &self.network,
        };
        let action = self.policy.on_outcome(session, outcome, ctx);
        if action == RetryAction::Discard {
            return;
        }
        cancel_timer(session, effects);

        match action {
            RetryAction::Succeed => {
                session.state = LoadState::Loaded;
                if !session.resolved {
                    session.resolved = true;
                    tracing::info!("session {} loaded {}", session.id(), session.current_variant());
                    effects.push(Effect::NotifyLoad { session: session.id() });
                }
            }
            RetryAction::RetryAfter { delay, next_variant } => {
                tracing::debug!(
                    "session {}: retry {}/{} in {:?} ({:?})",
                    session.id(),
                    session.attempts_used(),
                    self.policy.config().max_attempts(),
                    delay,
                    next_variant
                );
                session.state = LoadState::RetryWaiting;
                let token = session.arm_timer(TimerKind::Backoff);
                effects.push(Effect::StartTimer { token, delay });
            }
            RetryAction::RequestPolyfillThenRetry => {
                tracing::debug!("session {}: retries exhausted, requesting polyfill", session.id());
                session.state = LoadState::RetryWaiting;
                session.awaiting_polyfill = true;
                effects.push(Effect::LoadPolyfill {
                    session: session.id(),
                    kind: PolyfillKind::Webp,
                });
            }
            RetryAction::Fail(reason) => fail(session, reason, effects),
            RetryAction::Discard => {}
        }
    }

    /// Queue a snapshot if the visible state changed. Snapshots precede
    /// terminal notifications.
    fn publish(&mut self, effects: &mut Vec<Effect>) {
        let Some(session) = &self.session else {
            return;
        };
        let snapshot = StateSnapshot {
            session: session.id(),
            state: session.state(),
            current_variant: session.current_variant().to_string(),
            attempts_used: session.attempts_used(),
        };
        if self.last_published.as_ref() == Some(&snapshot) {
            return;
        }
        self.last_published = Some(snapshot.clone());

        let at = effects
            .iter()
            .position(|e| matches!(e, Effect::NotifyLoad { .. } | Effect::NotifyError { .. }))
            .unwrap_or(effects.len());
        effects.insert(at, Effect::Publish(snapshot));
    }
}

fn cancel_timer(session: &mut LoadSession, effects: &mut Vec<Effect>) {
    if let Some(token) = session.timer.take() {
        effects.push(Effect::CancelTimer { token });
    }
}

fn abandon_fetch(session: &mut LoadSession, effects: &mut Vec<Effect>) {
    if let Some(attempt) = session.in_flight.take() {
        effects.push(Effect::AbandonFetch { attempt });
    }
}

fn release_visibility(session: &mut LoadSession, effects: &mut Vec<Effect>) {
    if session.watching_visibility {
        session.watching_visibility = false;
        effects.push(Effect::ReleaseVisibility { session: session.id() });
    }
}

/// Release everything a session holds
fn invalidate(session: &mut LoadSession, effects: &mut Vec<Effect>) {
    cancel_timer(session, effects);
    abandon_fetch(session, effects);
    release_visibility(session, effects);
    if session.awaiting_polyfill {
        session.awaiting_polyfill = false;
        effects.push(Effect::AbandonPolyfill { session: session.id() });
    }
}

fn fail(session: &mut LoadSession, reason: LoadError, effects: &mut Vec<Effect>) {
    session.state = LoadState::Failed;
    cancel_timer(session, effects);
    if !session.resolved {
        session.resolved = true;
        tracing::info!("session {} failed: {}", session.id(), reason);
        effects.push(Effect::NotifyError { session: session.id(), reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::EnvironmentCapabilities;

    fn coordinator(options: LoadOptions, env: EnvironmentCapabilities) -> LifecycleCoordinator {
        LifecycleCoordinator::new(options, CapabilityCache::shared(env)).unwrap()
    }

    fn observer_env() -> EnvironmentCapabilities {
        EnvironmentCapabilities { native_lazy_loading: false, visibility_observer: true }
    }

    #[test]
    fn test_rejects_invalid_options() {
        let mut options = LoadOptions::default();
        options.max_delay_ms = 1;
        let result = LifecycleCoordinator::new(options, CapabilityCache::shared(observer_env()));
        assert!(result.is_err());
    }

    #[test]
    fn test_gated_activation_waits_for_visibility() {
        let mut c = coordinator(LoadOptions::default(), observer_env());
        let effects = c.activate(ResourceDescriptor::new("a.jpg"));
        let id = c.current_session_id().unwrap();

        assert_eq!(c.state(), LoadState::PendingVisibility);
        assert!(effects.contains(&Effect::ObserveVisibility { session: id, margin_px: 200 }));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Fetch { .. })));

        let effects = c.on_eligible(id);
        assert_eq!(c.state(), LoadState::Loading);
        assert!(effects.contains(&Effect::ReleaseVisibility { session: id }));
        assert!(effects.iter().any(|e| matches!(e, Effect::Fetch { url, .. } if url == "a.jpg")));

        // Fire-once: a second signal is ignored
        assert!(c.on_eligible(id).is_empty());
    }

    #[test]
    fn test_fallback_delay_mode() {
        let mut c = coordinator(LoadOptions::default(), EnvironmentCapabilities::default());
        let effects = c.activate(ResourceDescriptor::new("a.jpg"));
        let token = effects
            .iter()
            .find_map(|e| match e {
                Effect::StartTimer { token, delay } if token.kind == TimerKind::EligibilityFallback => {
                    assert_eq!(delay.as_millis(), 1000);
                    Some(*token)
                }
                _ => None,
            })
            .unwrap();

        c.on_timer(token);
        assert_eq!(c.state(), LoadState::Loading);
    }

    #[test]
    fn test_probe_requested_for_undetermined_format() {
        let mut c = coordinator(LoadOptions::default(), observer_env());
        let effects = c.activate(
            ResourceDescriptor::new("a.webp").with_format(crate::descriptor::ImageFormat::Webp),
        );
        assert!(effects.contains(&Effect::ProbeFormat { feature: FeatureName::Webp }));

        c.on_capability(FeatureName::Webp, Ok(true));
        let effects = c.activate(
            ResourceDescriptor::new("b.webp").with_format(crate::descriptor::ImageFormat::Webp),
        );
        assert!(!effects.contains(&Effect::ProbeFormat { feature: FeatureName::Webp }));
    }

    #[test]
    fn test_teardown_releases_subscription() {
        let mut c = coordinator(LoadOptions::default(), observer_env());
        c.activate(ResourceDescriptor::new("a.jpg"));
        let id = c.current_session_id().unwrap();

        let effects = c.teardown();
        assert_eq!(effects, vec![Effect::ReleaseVisibility { session: id }]);
        assert_eq!(c.state(), LoadState::Idle);
        assert!(c.on_eligible(id).is_empty());
    }

    #[test]
    fn test_cancelled_outcome_keeps_attempt_alive() {
        let mut c = coordinator(LoadOptions::default().critical(true), observer_env());
        c.activate(ResourceDescriptor::new("a.jpg"));
        let attempt = c.session().unwrap().attempt_token();

        assert!(c.on_fetch_outcome(attempt, Err(FetchFailure::cancelled())).is_empty());
        assert_eq!(c.state(), LoadState::Loading);

        let effects = c.on_fetch_outcome(attempt, Ok(()));
        assert!(effects.contains(&Effect::NotifyLoad { session: attempt.session }));
    }
}
