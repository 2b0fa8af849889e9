//! Host collaborators
//!
//! Everything the engine needs from its environment: a fetch primitive,
//! capability probes, a polyfill loader, a visibility probe and an optional
//! network status reading.

use fos_lazyload::{FeatureName, FetchFailure, NetworkReading, PolyfillKind};

/// Environment the driver runs against
#[allow(async_fn_in_trait)]
pub trait Host {
    /// Fetch a source. May never resolve; the session's timeout covers that.
    async fn fetch(&self, url: &str) -> Result<(), FetchFailure>;

    /// Probe format support. Errors count as unsupported.
    async fn probe_format(&self, feature: FeatureName) -> Result<bool, String>;

    /// Load a polyfill, once, eventually
    async fn load_polyfill(&self, kind: PolyfillKind) -> Result<(), String>;

    /// Resolve the first time the element comes within `margin_px` of the
    /// viewport. Dropping the future releases the observation.
    async fn wait_until_visible(&self, margin_px: u32);

    /// Current network status; `None` when the host cannot tell
    fn network_reading(&self) -> Option<NetworkReading> {
        None
    }
}
