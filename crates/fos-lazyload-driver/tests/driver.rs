//! End-to-end tests for the lazyload driver
//!
//! Each test replays a short scenario on real timers against the scripted
//! host and inspects what reached the rendering layer.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use fos_lazyload::{
    CapabilityCache, EnvironmentCapabilities, FeatureName, FetchFailure, LoadError, LoadOptions,
    LoadState, PolyfillKind, ResourceDescriptor, SessionId, StateSnapshot,
};
use fos_lazyload_driver::{Driver, DriverHandle, Host, RenderSignal, Scenario, ScriptedHost};
use smol::{Timer, future};

// ============================================================================
// HARNESS
// ============================================================================

fn host(json: &str) -> Rc<ScriptedHost> {
    Rc::new(ScriptedHost::new(Scenario::from_json(json).unwrap()))
}

/// Replay the scenario's own script
fn replay(json: &str) -> (Vec<RenderSignal>, Rc<ScriptedHost>) {
    let host = host(json);
    let (driver, handle, renders) =
        Driver::new(Rc::clone(&host), host.scenario().options.clone(), host.capabilities()).unwrap();

    let (driven, played) = smol::block_on(future::zip(driver.run(), host.play(&handle)));
    driven.unwrap();
    played.unwrap();

    let mut signals = Vec::new();
    while let Ok(signal) = renders.try_recv() {
        signals.push(signal);
    }
    (signals, host)
}

/// Replay a hand-written script against the scenario's responses
fn replay_with<F, Fut>(json: &str, script: F) -> (Vec<RenderSignal>, Rc<ScriptedHost>)
where
    F: FnOnce(DriverHandle) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let host = host(json);
    let (driver, handle, renders) =
        Driver::new(Rc::clone(&host), host.scenario().options.clone(), host.capabilities()).unwrap();

    let (driven, ()) = smol::block_on(future::zip(driver.run(), script(handle)));
    driven.unwrap();

    let mut signals = Vec::new();
    while let Ok(signal) = renders.try_recv() {
        signals.push(signal);
    }
    (signals, host)
}

async fn sleep(ms: u64) {
    Timer::after(Duration::from_millis(ms)).await;
}

fn states(signals: &[RenderSignal]) -> Vec<LoadState> {
    signals
        .iter()
        .filter_map(|s| match s {
            RenderSignal::State(snapshot) => Some(snapshot.state),
            _ => None,
        })
        .collect()
}

fn loaded(signals: &[RenderSignal]) -> Vec<SessionId> {
    signals
        .iter()
        .filter_map(|s| match s {
            RenderSignal::Loaded(id) => Some(*id),
            _ => None,
        })
        .collect()
}

fn failed(signals: &[RenderSignal]) -> Vec<LoadError> {
    signals
        .iter()
        .filter_map(|s| match s {
            RenderSignal::Failed(_, reason) => Some(reason.clone()),
            _ => None,
        })
        .collect()
}

fn last_snapshot(signals: &[RenderSignal]) -> Option<StateSnapshot> {
    signals.iter().rev().find_map(|s| match s {
        RenderSignal::State(snapshot) => Some(snapshot.clone()),
        _ => None,
    })
}

fn last_variant(signals: &[RenderSignal]) -> Option<String> {
    last_snapshot(signals).map(|snapshot| snapshot.current_variant)
}

// ============================================================================
// LOADING
// ============================================================================

#[test]
fn test_critical_loads_once() {
    let (signals, host) = replay(
        r#"{
            "options": {"critical": true},
            "descriptor": {"primarySrc": "a.jpg"},
            "responses": [{"url": "a.jpg", "delayMs": 10}],
            "runMs": 200
        }"#,
    );

    assert_eq!(host.requests(), vec!["a.jpg"]);
    assert_eq!(states(&signals), vec![LoadState::Loading, LoadState::Loaded]);
    assert_eq!(loaded(&signals).len(), 1);
    assert!(failed(&signals).is_empty());
}

#[test]
fn test_retries_exhaust_into_one_error() {
    let (signals, host) = replay(
        r#"{
            "options": {"critical": true, "retryAttempts": 2, "retryDelayMs": 10, "maxDelayMs": 100},
            "descriptor": {"primarySrc": "a.jpg"},
            "runMs": 400
        }"#,
    );

    assert_eq!(host.requests(), vec!["a.jpg", "a.jpg", "a.jpg"]);
    assert_eq!(failed(&signals), vec![LoadError::ExhaustedRetries { retries: 2 }]);
    assert!(loaded(&signals).is_empty());
    assert_eq!(states(&signals).last(), Some(&LoadState::Failed));
}

#[test]
fn test_hanging_fetch_times_out() {
    let (signals, host) = replay(
        r#"{
            "options": {"critical": true, "retryAttempts": 1, "retryDelayMs": 10, "timeoutMs": 50},
            "descriptor": {"primarySrc": "a.jpg"},
            "responses": [{"url": "a.jpg", "outcome": "hang"}],
            "runMs": 400
        }"#,
    );

    assert_eq!(host.requests().len(), 2);
    assert_eq!(failed(&signals), vec![LoadError::ExhaustedRetries { retries: 1 }]);
}

#[test]
fn test_security_failure_is_not_retried() {
    let (signals, host) = replay(
        r#"{
            "options": {"critical": true, "retryDelayMs": 10},
            "descriptor": {"primarySrc": "a.jpg"},
            "responses": [{"url": "a.jpg", "outcome": "security"}],
            "runMs": 200
        }"#,
    );

    assert_eq!(host.requests(), vec!["a.jpg"]);
    assert!(matches!(failed(&signals).as_slice(), [LoadError::SecurityViolation(_)]));
}

// ============================================================================
// FORMAT FALLBACK
// ============================================================================

#[test]
fn test_webp_falls_back_along_chain() {
    let (signals, host) = replay(
        r#"{
            "options": {"critical": true, "retryDelayMs": 10, "maxDelayMs": 100},
            "descriptor": {"primarySrc": "a.webp", "format": "webp"},
            "formatSupport": {"webp": false},
            "responses": [
                {"url": "a.jpg", "outcome": "decode"},
                {"url": "a.png"}
            ],
            "runMs": 400
        }"#,
    );

    assert_eq!(host.requests(), vec!["a.webp", "a.jpg", "a.png"]);
    assert_eq!(loaded(&signals).len(), 1);
    assert_eq!(last_variant(&signals).as_deref(), Some("a.png"));
}

#[test]
fn test_polyfill_rescues_primary() {
    let (signals, host) = replay(
        r#"{
            "options": {"critical": true, "retryAttempts": 0},
            "descriptor": {"primarySrc": "a.webp", "format": "webp"},
            "formatSupport": {"webp": false},
            "responses": [
                {"url": "a.webp", "outcome": "decode", "times": 1},
                {"url": "a.webp"}
            ],
            "runMs": 300
        }"#,
    );

    assert_eq!(host.polyfill_loads(), 1);
    assert_eq!(host.requests(), vec!["a.webp", "a.webp"]);
    assert_eq!(loaded(&signals).len(), 1);
}

#[test]
fn test_failed_polyfill_is_terminal() {
    let (signals, host) = replay(
        r#"{
            "options": {"critical": true, "retryAttempts": 0},
            "descriptor": {"primarySrc": "a.webp", "format": "webp"},
            "formatSupport": {"webp": false},
            "polyfillSucceeds": false,
            "runMs": 300
        }"#,
    );

    assert_eq!(host.polyfill_loads(), 1);
    assert_eq!(host.requests(), vec!["a.webp"]);
    assert_eq!(failed(&signals), vec![LoadError::ExhaustedRetries { retries: 0 }]);
}

// ============================================================================
// VISIBILITY
// ============================================================================

#[test]
fn test_waits_for_scroll_into_range() {
    let (signals, host) = replay(
        r#"{
            "options": {"visibilityMarginPx": 200},
            "descriptor": {"primarySrc": "a.jpg"},
            "environment": {"visibilityObserver": true},
            "element": {"x": 0, "y": 1600, "width": 640, "height": 360},
            "scroll": [{"atMs": 100, "y": 800}],
            "responses": [{"url": "a.jpg"}],
            "runMs": 400
        }"#,
    );

    assert_eq!(host.requests(), vec!["a.jpg"]);
    assert_eq!(
        states(&signals),
        vec![LoadState::PendingVisibility, LoadState::Loading, LoadState::Loaded]
    );
}

#[test]
fn test_offscreen_element_never_fetches() {
    let (signals, host) = replay(
        r#"{
            "descriptor": {"primarySrc": "a.jpg"},
            "environment": {"visibilityObserver": true},
            "element": {"x": 0, "y": 5000, "width": 640, "height": 360},
            "responses": [{"url": "a.jpg"}],
            "runMs": 200
        }"#,
    );

    assert!(host.requests().is_empty());
    assert_eq!(states(&signals), vec![LoadState::PendingVisibility]);
    assert!(loaded(&signals).is_empty());
}

#[test]
fn test_fallback_delay_without_observer() {
    let (signals, host) = replay(
        r#"{
            "options": {"fallbackDelayMs": 50},
            "descriptor": {"primarySrc": "a.jpg"},
            "environment": {"visibilityObserver": false},
            "element": {"x": 0, "y": 5000, "width": 640, "height": 360},
            "responses": [{"url": "a.jpg"}],
            "runMs": 300
        }"#,
    );

    assert_eq!(host.requests(), vec!["a.jpg"]);
    assert_eq!(states(&signals).first(), Some(&LoadState::PendingVisibility));
    assert_eq!(loaded(&signals).len(), 1);
}

// ============================================================================
// NETWORK
// ============================================================================

#[test]
fn test_slow_network_restarts_with_low_res() {
    let (signals, host) = replay(
        r#"{
            "options": {"critical": true, "retryDelayMs": 10},
            "descriptor": {"primarySrc": "a.jpg", "lowResSrc": "a-small.jpg"},
            "network": {"online": true, "effectiveType": "4g"},
            "networkChanges": [{"atMs": 50, "reading": {"online": true, "effectiveType": "2g"}}],
            "responses": [
                {"url": "a.jpg", "outcome": "hang"},
                {"url": "a-small.jpg", "delayMs": 10}
            ],
            "runMs": 300
        }"#,
    );

    assert_eq!(host.requests(), vec!["a.jpg", "a-small.jpg"]);
    assert_eq!(loaded(&signals).len(), 1);
    let last = last_snapshot(&signals).unwrap();
    assert_eq!(last.current_variant, "a-small.jpg");
    assert_eq!(last.attempts_used, 0);
}

#[test]
fn test_offline_start_waits_for_network() {
    let (signals, host) = replay(
        r#"{
            "options": {"critical": true},
            "descriptor": {"primarySrc": "a.jpg"},
            "network": {"online": false},
            "networkChanges": [{"atMs": 100, "reading": {"online": true, "effectiveType": "4g"}}],
            "responses": [{"url": "a.jpg"}],
            "runMs": 300
        }"#,
    );

    assert_eq!(host.requests(), vec!["a.jpg"]);
    assert_eq!(loaded(&signals).len(), 1);
}

// ============================================================================
// SESSIONS
// ============================================================================

#[test]
fn test_descriptor_change_discards_old_load() {
    let (signals, host) = replay_with(
        r#"{
            "descriptor": {"primarySrc": "a.jpg"},
            "options": {"critical": true},
            "responses": [
                {"url": "a.jpg", "delayMs": 100},
                {"url": "b.jpg", "delayMs": 10}
            ]
        }"#,
        |handle| async move {
            handle.activate(ResourceDescriptor::new("a.jpg")).unwrap();
            sleep(20).await;
            handle.activate(ResourceDescriptor::new("b.jpg")).unwrap();
            sleep(250).await;
            handle.shutdown().unwrap();
        },
    );

    assert_eq!(host.requests(), vec!["a.jpg", "b.jpg"]);
    assert_eq!(loaded(&signals).len(), 1);
    assert_eq!(last_variant(&signals).as_deref(), Some("b.jpg"));
}

#[test]
fn test_teardown_silences_pending_load() {
    let (signals, host) = replay_with(
        r#"{
            "descriptor": {"primarySrc": "a.jpg"},
            "options": {"critical": true},
            "responses": [{"url": "a.jpg", "delayMs": 100}]
        }"#,
        |handle| async move {
            handle.activate(ResourceDescriptor::new("a.jpg")).unwrap();
            sleep(20).await;
            handle.teardown().unwrap();
            sleep(200).await;
            handle.shutdown().unwrap();
        },
    );

    assert_eq!(host.requests(), vec!["a.jpg"]);
    assert!(loaded(&signals).is_empty());
    assert!(failed(&signals).is_empty());
}

#[test]
fn test_same_descriptor_is_not_refetched() {
    let (signals, host) = replay_with(
        r#"{
            "descriptor": {"primarySrc": "a.jpg"},
            "options": {"critical": true},
            "responses": [{"url": "a.jpg"}]
        }"#,
        |handle| async move {
            handle.activate(ResourceDescriptor::new("a.jpg")).unwrap();
            sleep(50).await;
            handle.activate(ResourceDescriptor::new("a.jpg")).unwrap();
            sleep(50).await;
            handle.shutdown().unwrap();
        },
    );

    assert_eq!(host.requests(), vec!["a.jpg"]);
    assert_eq!(loaded(&signals).len(), 1);
}

#[test]
fn test_handle_reports_stopped_driver() {
    let host = host(r#"{"descriptor": {"primarySrc": "a.jpg"}}"#);
    let (driver, handle, _renders) =
        Driver::new(Rc::clone(&host), host.scenario().options.clone(), host.capabilities()).unwrap();

    handle.shutdown().unwrap();
    smol::block_on(driver.run()).unwrap();

    assert!(handle.activate(ResourceDescriptor::new("a.jpg")).is_err());
}

/// Host whose fetches never settle. Counts the fetch futures still alive.
#[derive(Default)]
struct HangingHost {
    live: Cell<usize>,
    peak: Cell<usize>,
    started: Cell<usize>,
}

struct LiveFetch<'a>(&'a HangingHost);

impl<'a> LiveFetch<'a> {
    fn enter(host: &'a HangingHost) -> Self {
        let live = host.live.get() + 1;
        host.live.set(live);
        host.peak.set(host.peak.get().max(live));
        host.started.set(host.started.get() + 1);
        Self(host)
    }
}

impl Drop for LiveFetch<'_> {
    fn drop(&mut self) {
        self.0.live.set(self.0.live.get() - 1);
    }
}

impl Host for HangingHost {
    async fn fetch(&self, _url: &str) -> Result<(), FetchFailure> {
        let _live = LiveFetch::enter(self);
        future::pending().await
    }

    async fn probe_format(&self, _feature: FeatureName) -> Result<bool, String> {
        Ok(true)
    }

    async fn load_polyfill(&self, _kind: PolyfillKind) -> Result<(), String> {
        Ok(())
    }

    async fn wait_until_visible(&self, _margin_px: u32) {}
}

#[test]
fn test_retired_fetches_are_dropped() {
    let host = Rc::new(HangingHost::default());
    let options = LoadOptions::default().critical(true).with_retries(5, 1).with_timeout(5);
    let capabilities = CapabilityCache::shared(EnvironmentCapabilities {
        native_lazy_loading: false,
        visibility_observer: true,
    });
    let (driver, handle, _renders) = Driver::new(Rc::clone(&host), options, capabilities).unwrap();

    let script = async move {
        for i in 0..20 {
            handle.activate(ResourceDescriptor::new(&format!("img-{}.jpg", i))).unwrap();
            sleep(20).await;
        }
        handle.shutdown().unwrap();
    };
    let (driven, ()) = smol::block_on(future::zip(driver.run(), script));
    driven.unwrap();

    // Timeouts and descriptor changes each replaced the pending request
    assert!(host.started.get() > 20);
    assert_eq!(host.peak.get(), 1);
    assert_eq!(host.live.get(), 0);
}
