//! Visibility Gate
//!
//! Decides when a resource becomes eligible to load: immediately, when the
//! element comes within a margin of the viewport, or after a fixed delay when
//! the environment cannot observe visibility at all.

use std::time::Duration;

use serde::Deserialize;

use crate::capability::CapabilitySnapshot;
use crate::descriptor::ResourceDescriptor;

/// Axis-aligned rectangle in viewport coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewportRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ViewportRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Grow by a root margin
    pub fn expand(&self, vertical: f32, horizontal: f32) -> Self {
        Self {
            x: self.x - horizontal,
            y: self.y - vertical,
            width: self.width + horizontal * 2.0,
            height: self.height + vertical * 2.0,
        }
    }

    /// Edge-inclusive overlap, so zero-height elements still register
    pub fn touches(&self, other: &ViewportRect) -> bool {
        !(other.right() < self.x
            || other.x > self.right()
            || other.bottom() < self.y
            || other.y > self.bottom())
    }
}

/// Fire-once proximity detector for one element
#[derive(Debug, Clone)]
pub struct ProximityWatcher {
    vertical_margin: f32,
    horizontal_margin: f32,
    fired: bool,
}

impl ProximityWatcher {
    /// Watcher with a vertical-only margin
    pub fn new(margin_px: u32) -> Self {
        Self {
            vertical_margin: margin_px as f32,
            horizontal_margin: 0.0,
            fired: false,
        }
    }

    pub fn with_horizontal_margin(mut self, margin_px: u32) -> Self {
        self.horizontal_margin = margin_px as f32;
        self
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Returns `true` exactly once: the first time the element is in range
    pub fn check(&mut self, viewport: &ViewportRect, element: &ViewportRect) -> bool {
        if self.fired {
            return false;
        }
        let root = viewport.expand(self.vertical_margin, self.horizontal_margin);
        if root.touches(element) {
            self.fired = true;
            return true;
        }
        false
    }
}

/// Outcome of gate evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Eligible now
    Immediate,
    /// Register a one-shot proximity observation
    AwaitProximity { margin_px: u32 },
    /// Degraded mode: eligible after a fixed delay
    AwaitFallbackDelay { delay: Duration },
}

impl GateDecision {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate)
    }
}

/// Eligibility policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityGate {
    margin_px: u32,
    fallback_delay: Duration,
}

impl Default for VisibilityGate {
    fn default() -> Self {
        Self::new(200, Duration::from_millis(1000))
    }
}

impl VisibilityGate {
    pub fn new(margin_px: u32, fallback_delay: Duration) -> Self {
        Self { margin_px, fallback_delay }
    }

    pub fn evaluate(
        &self,
        descriptor: &ResourceDescriptor,
        capabilities: &CapabilitySnapshot,
        critical: bool,
    ) -> GateDecision {
        // Embedded documents have no native lazy-loading attribute
        let native = capabilities.native_lazy_loading_available && !descriptor.is_embedded_document;

        if critical || native {
            GateDecision::Immediate
        } else if capabilities.visibility_observer_available {
            GateDecision::AwaitProximity { margin_px: self.margin_px }
        } else {
            GateDecision::AwaitFallbackDelay { delay: self.fallback_delay }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(native: bool, observer: bool) -> CapabilitySnapshot {
        CapabilitySnapshot {
            native_lazy_loading_available: native,
            visibility_observer_available: observer,
            ..Default::default()
        }
    }

    #[test]
    fn test_gate_modes() {
        let gate = VisibilityGate::default();
        let d = ResourceDescriptor::new("a.jpg");

        assert_eq!(gate.evaluate(&d, &caps(false, false), true), GateDecision::Immediate);
        assert_eq!(gate.evaluate(&d, &caps(true, false), false), GateDecision::Immediate);
        assert_eq!(
            gate.evaluate(&d, &caps(false, true), false),
            GateDecision::AwaitProximity { margin_px: 200 }
        );
        assert_eq!(
            gate.evaluate(&d, &caps(false, false), false),
            GateDecision::AwaitFallbackDelay { delay: Duration::from_millis(1000) }
        );
    }

    #[test]
    fn test_embedded_document_skips_native_lazy() {
        let gate = VisibilityGate::default();
        let d = ResourceDescriptor::new("diagram.svg").embedded_document(true);
        assert_eq!(
            gate.evaluate(&d, &caps(true, true), false),
            GateDecision::AwaitProximity { margin_px: 200 }
        );
    }

    #[test]
    fn test_proximity_fires_once() {
        let mut watcher = ProximityWatcher::new(200);
        let viewport = ViewportRect::new(0.0, 0.0, 800.0, 600.0);

        // 300px below the fold
        let far = ViewportRect::new(0.0, 900.0, 300.0, 200.0);
        assert!(!watcher.check(&viewport, &far));

        // Within the 200px margin
        let near = ViewportRect::new(0.0, 750.0, 300.0, 200.0);
        assert!(watcher.check(&viewport, &near));
        assert!(watcher.has_fired());

        // Re-entry does not re-trigger
        let inside = ViewportRect::new(0.0, 100.0, 300.0, 200.0);
        assert!(!watcher.check(&viewport, &inside));
    }

    #[test]
    fn test_margin_is_vertical_by_default() {
        let viewport = ViewportRect::new(0.0, 0.0, 800.0, 600.0);
        let beside = ViewportRect::new(900.0, 100.0, 50.0, 50.0);

        assert!(!ProximityWatcher::new(200).check(&viewport, &beside));
        assert!(ProximityWatcher::new(200).with_horizontal_margin(150).check(&viewport, &beside));
    }

    #[test]
    fn test_zero_height_element_registers() {
        let mut watcher = ProximityWatcher::new(0);
        let viewport = ViewportRect::new(0.0, 0.0, 800.0, 600.0);
        assert!(watcher.check(&viewport, &ViewportRect::new(10.0, 300.0, 100.0, 0.0)));
    }
}
