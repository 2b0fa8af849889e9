//! Capability Snapshots
//!
//! Format support and environment features, detected once and shared.
//!
//! Support flags only ever move from "not yet determined" to a determined
//! value. The first recorded result wins; later detections are ignored, so
//! instances can share one cache without locking.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Deserialize;

use crate::LoadError;
use crate::descriptor::ImageFormat;

/// Probed feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureName {
    Webp,
    Svg,
}

impl FeatureName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Svg => "svg",
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment features known up front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentCapabilities {
    /// The fetch primitive defers offscreen requests itself
    pub native_lazy_loading: bool,
    /// A visibility probe can be registered
    pub visibility_observer: bool,
}

/// Read-only capability view for one format
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilitySnapshot {
    /// `None` = not yet determined
    pub format_support: BTreeMap<FeatureName, Option<bool>>,
    pub native_lazy_loading_available: bool,
    pub visibility_observer_available: bool,
}

impl CapabilitySnapshot {
    /// Support for a feature, `None` while undetermined
    pub fn support(&self, feature: FeatureName) -> Option<bool> {
        self.format_support.get(&feature).copied().flatten()
    }

    /// Whether a format can be requested as-is. Unknown counts as unsupported.
    pub fn supports(&self, format: ImageFormat) -> bool {
        match format.feature() {
            Some(feature) => self.support(feature) == Some(true),
            None => true,
        }
    }
}

/// Shared capability cache
#[derive(Debug, Default)]
pub struct CapabilityCache {
    webp: OnceLock<bool>,
    svg: OnceLock<bool>,
    environment: EnvironmentCapabilities,
}

impl CapabilityCache {
    pub fn new(environment: EnvironmentCapabilities) -> Self {
        Self {
            webp: OnceLock::new(),
            svg: OnceLock::new(),
            environment,
        }
    }

    /// Cache behind an `Arc`, ready to hand to several coordinators
    pub fn shared(environment: EnvironmentCapabilities) -> Arc<Self> {
        Arc::new(Self::new(environment))
    }

    fn slot(&self, feature: FeatureName) -> &OnceLock<bool> {
        match feature {
            FeatureName::Webp => &self.webp,
            FeatureName::Svg => &self.svg,
        }
    }

    pub fn environment(&self) -> EnvironmentCapabilities {
        self.environment
    }

    pub fn support(&self, feature: FeatureName) -> Option<bool> {
        self.slot(feature).get().copied()
    }

    /// Record a detection result. Returns `true` if this call determined it.
    pub fn record(&self, feature: FeatureName, supported: bool) -> bool {
        let written = self.slot(feature).set(supported).is_ok();
        if written {
            tracing::debug!("capability {} = {}", feature, supported);
        }
        written
    }

    /// Record a probe outcome; a failed probe counts as unsupported
    pub fn record_probe(&self, feature: FeatureName, outcome: &Result<bool, LoadError>) -> bool {
        match outcome {
            Ok(supported) => self.record(feature, *supported),
            Err(err) => {
                tracing::warn!("{}, assuming unsupported", err);
                self.record(feature, false)
            }
        }
    }

    /// Whether a probe is still needed for this format
    pub fn needs_probe(&self, format: ImageFormat) -> bool {
        format
            .feature()
            .is_some_and(|feature| self.support(feature).is_none())
    }

    /// Snapshot for one format
    pub fn snapshot(&self, format: ImageFormat) -> CapabilitySnapshot {
        let mut format_support = BTreeMap::new();
        if let Some(feature) = format.feature() {
            format_support.insert(feature, self.support(feature));
        }
        CapabilitySnapshot {
            format_support,
            native_lazy_loading_available: self.environment.native_lazy_loading,
            visibility_observer_available: self.environment.visibility_observer,
        }
    }
}
