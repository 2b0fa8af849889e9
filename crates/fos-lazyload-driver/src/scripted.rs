//! Scripted host
//!
//! Deterministic environment read from a JSON scenario. Responses, scrolling
//! and network changes follow the script; every request is recorded.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fos_lazyload::{
    CapabilityCache, EnvironmentCapabilities, FeatureName, FetchFailure, LoadOptions,
    NetworkReading, PolyfillKind, ProximityWatcher, ResourceDescriptor, ViewportRect,
};
use serde::Deserialize;
use smol::{Timer, future};

use crate::DriverError;
use crate::driver::DriverHandle;
use crate::host::Host;

/// How often the visibility probe samples the scroll position
const FRAME: Duration = Duration::from_millis(16);

/// Scripted fetch result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptedOutcome {
    #[default]
    Ok,
    Network,
    Decode,
    Security,
    /// Never settles
    Hang,
}

/// Response for one URL
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScriptedResponse {
    pub url: String,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub outcome: ScriptedOutcome,
    /// How many requests this entry answers; unlimited when absent
    #[serde(default)]
    pub times: Option<u32>,
}

/// Scroll the viewport to `y` at `at_ms`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScrollStep {
    pub at_ms: u64,
    pub y: f32,
}

/// Network reading delivered at `at_ms`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimedReading {
    pub at_ms: u64,
    pub reading: NetworkReading,
}

/// Known format support; absent entries make the probe fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatSupport {
    pub webp: Option<bool>,
    pub svg: Option<bool>,
}

impl FormatSupport {
    fn get(&self, feature: FeatureName) -> Option<bool> {
        match feature {
            FeatureName::Webp => self.webp,
            FeatureName::Svg => self.svg,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_viewport() -> ViewportRect {
    ViewportRect::new(0.0, 0.0, 1280.0, 720.0)
}

fn default_run_ms() -> u64 {
    5000
}

/// One widget's scripted life
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub options: LoadOptions,
    pub descriptor: ResourceDescriptor,
    #[serde(default)]
    pub environment: EnvironmentCapabilities,
    #[serde(default)]
    pub format_support: FormatSupport,
    #[serde(default = "default_true")]
    pub polyfill_succeeds: bool,
    /// Initial reading; the host reports no status when absent
    #[serde(default)]
    pub network: Option<NetworkReading>,
    #[serde(default)]
    pub network_changes: Vec<TimedReading>,
    #[serde(default = "default_viewport")]
    pub viewport: ViewportRect,
    /// Element bounds in document coordinates
    #[serde(default)]
    pub element: ViewportRect,
    #[serde(default)]
    pub scroll: Vec<ScrollStep>,
    #[serde(default)]
    pub responses: Vec<ScriptedResponse>,
    /// Shut the driver down after this long
    #[serde(default = "default_run_ms")]
    pub run_ms: u64,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

enum Step {
    Scroll(f32),
    Network(NetworkReading),
}

/// Host backed by a [`Scenario`]
#[derive(Debug)]
pub struct ScriptedHost {
    scenario: Scenario,
    scroll_y: Cell<f32>,
    served: RefCell<Vec<u32>>,
    requests: RefCell<Vec<String>>,
    polyfill_loads: Cell<u32>,
}

impl ScriptedHost {
    pub fn new(scenario: Scenario) -> Self {
        let served = vec![0; scenario.responses.len()];
        Self {
            scenario,
            scroll_y: Cell::new(0.0),
            served: RefCell::new(served),
            requests: RefCell::new(Vec::new()),
            polyfill_loads: Cell::new(0),
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Fresh cache seeded with the scenario's environment
    pub fn capabilities(&self) -> Arc<CapabilityCache> {
        CapabilityCache::shared(self.scenario.environment)
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    pub fn polyfill_loads(&self) -> u32 {
        self.polyfill_loads.get()
    }

    /// Current viewport in document coordinates
    pub fn viewport(&self) -> ViewportRect {
        let base = self.scenario.viewport;
        ViewportRect::new(base.x, base.y + self.scroll_y.get(), base.width, base.height)
    }

    /// Activate, replay scroll and network steps on schedule, then shut down
    pub async fn play(&self, handle: &DriverHandle) -> Result<(), DriverError> {
        let started = Instant::now();

        let mut steps: Vec<(u64, Step)> = self
            .scenario
            .scroll
            .iter()
            .map(|s| (s.at_ms, Step::Scroll(s.y)))
            .chain(
                self.scenario
                    .network_changes
                    .iter()
                    .map(|n| (n.at_ms, Step::Network(n.reading.clone()))),
            )
            .collect();
        steps.sort_by_key(|(at, _)| *at);

        handle.activate(self.scenario.descriptor.clone())?;

        for (at_ms, step) in steps {
            sleep_until(started, at_ms).await;
            match step {
                Step::Scroll(y) => {
                    tracing::debug!("scroll to {}", y);
                    self.scroll_y.set(y);
                }
                Step::Network(reading) => {
                    tracing::debug!("network reading {:?}", reading);
                    handle.network(reading)?;
                }
            }
        }

        sleep_until(started, self.scenario.run_ms).await;
        handle.shutdown()
    }

    fn respond(&self, url: &str) -> Option<ScriptedResponse> {
        let mut served = self.served.borrow_mut();
        let (index, response) = self.scenario.responses.iter().enumerate().find(|(i, r)| {
            r.url == url && r.times.is_none_or(|times| served[*i] < times)
        })?;
        served[index] += 1;
        Some(response.clone())
    }
}

async fn sleep_until(started: Instant, at_ms: u64) {
    let deadline = started + Duration::from_millis(at_ms);
    let now = Instant::now();
    if deadline > now {
        Timer::after(deadline - now).await;
    }
}

impl Host for ScriptedHost {
    async fn fetch(&self, url: &str) -> Result<(), FetchFailure> {
        self.requests.borrow_mut().push(url.to_string());

        let Some(response) = self.respond(url) else {
            return Err(FetchFailure::network(format!("no route to {}", url)));
        };
        if response.delay_ms > 0 {
            Timer::after(Duration::from_millis(response.delay_ms)).await;
        }

        match response.outcome {
            ScriptedOutcome::Ok => Ok(()),
            ScriptedOutcome::Network => Err(FetchFailure::network(format!("connection reset: {}", url))),
            ScriptedOutcome::Decode => Err(FetchFailure::decode(format!("corrupt image data: {}", url))),
            ScriptedOutcome::Security => Err(FetchFailure::security(format!("blocked by policy: {}", url))),
            ScriptedOutcome::Hang => future::pending().await,
        }
    }

    async fn probe_format(&self, feature: FeatureName) -> Result<bool, String> {
        self.scenario
            .format_support
            .get(feature)
            .ok_or_else(|| format!("{} probe unavailable", feature))
    }

    async fn load_polyfill(&self, kind: PolyfillKind) -> Result<(), String> {
        self.polyfill_loads.set(self.polyfill_loads.get() + 1);
        Timer::after(Duration::from_millis(1)).await;
        if self.scenario.polyfill_succeeds {
            Ok(())
        } else {
            Err(format!("{:?} polyfill failed to load", kind))
        }
    }

    async fn wait_until_visible(&self, margin_px: u32) {
        let mut watcher = ProximityWatcher::new(margin_px);
        loop {
            if watcher.check(&self.viewport(), &self.scenario.element) {
                return;
            }
            Timer::after(FRAME).await;
        }
    }

    fn network_reading(&self) -> Option<NetworkReading> {
        self.scenario.network.clone()
    }
}
