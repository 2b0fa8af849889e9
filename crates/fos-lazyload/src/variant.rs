//! Variant Selection
//!
//! Picks the concrete source for the next attempt. Pure: no I/O, and the
//! result depends only on the arguments, so selection is re-run on every
//! attempt rather than cached.

use url::Url;

use crate::capability::CapabilitySnapshot;
use crate::descriptor::{ImageFormat, ResourceDescriptor};
use crate::network::NetworkCondition;

/// Format fallback chain, one step per failure
const FALLBACK_CHAIN: &[(&str, &str)] = &[("webp", "jpg"), ("jpg", "png")];

/// Extensions eligible for a derived `-low` variant
const LOW_VARIANT_EXTENSIONS: &[&str] = &["webp", "jpg", "png"];

/// Per-session fallback progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FallbackState {
    /// Chain steps taken so far
    pub depth: u8,
    /// A format polyfill was installed; the primary format is decodable again
    pub polyfill_loaded: bool,
}

impl FallbackState {
    /// Whether the format chain applies to this descriptor
    pub fn applies(&self, descriptor: &ResourceDescriptor, capabilities: &CapabilitySnapshot) -> bool {
        descriptor.format == ImageFormat::Webp
            && !capabilities.supports(ImageFormat::Webp)
            && !self.polyfill_loaded
    }

    pub fn advance(&mut self) {
        self.depth = self.depth.saturating_add(1);
    }

    pub fn is_used(&self) -> bool {
        self.depth > 0
    }
}

/// Variant selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariantSelector {
    low_bandwidth: bool,
}

impl VariantSelector {
    pub fn new(low_bandwidth: bool) -> Self {
        Self { low_bandwidth }
    }

    /// Source for the next attempt, or `None` while offline
    pub fn select_variant(
        &self,
        descriptor: &ResourceDescriptor,
        capabilities: &CapabilitySnapshot,
        network: &NetworkCondition,
        fallback: &FallbackState,
    ) -> Option<String> {
        if network.is_offline() {
            return None;
        }

        if network.is_slow() || self.low_bandwidth {
            if let Some(low) = &descriptor.low_res_src {
                return Some(low.clone());
            }
        }

        let mut src = descriptor.primary_src.clone();
        if self.low_bandwidth {
            if let Some(low) = derive_low_variant(&src) {
                src = low;
            }
        }

        if fallback.applies(descriptor, capabilities) {
            for _ in 0..fallback.depth {
                match next_in_chain(&src) {
                    Some(next) => src = next,
                    None => break,
                }
            }
        }

        Some(src)
    }
}

/// Rewrite the extension one step along the fallback chain.
/// `None` once the extension has no mapping.
pub fn next_in_chain(src: &str) -> Option<String> {
    rewrite_path(src, |path| {
        let (dot, ext) = split_extension(path)?;
        let lower = ext.to_ascii_lowercase();
        let (_, to) = FALLBACK_CHAIN.iter().find(|(from, _)| *from == lower)?;
        Some(format!("{}.{}", &path[..dot], to))
    })
}

/// `photo.jpg` -> `photo-low.jpg`
pub fn derive_low_variant(src: &str) -> Option<String> {
    rewrite_path(src, |path| {
        let (dot, ext) = split_extension(path)?;
        let lower = ext.to_ascii_lowercase();
        if !LOW_VARIANT_EXTENSIONS.contains(&lower.as_str()) {
            return None;
        }
        Some(format!("{}-low.{}", &path[..dot], ext))
    })
}

/// Apply a path rewrite, keeping query and fragment intact
fn rewrite_path(src: &str, rewrite: impl Fn(&str) -> Option<String>) -> Option<String> {
    if let Ok(mut url) = Url::parse(src) {
        if url.cannot_be_a_base() {
            return None;
        }
        let path = rewrite(url.path())?;
        url.set_path(&path);
        return Some(url.to_string());
    }

    // Relative reference
    let cut = src.find(['?', '#']).unwrap_or(src.len());
    let (path, tail) = src.split_at(cut);
    let path = rewrite(path)?;
    Some(format!("{}{}", path, tail))
}

/// Dot position and extension of the last path segment
fn split_extension(path: &str) -> Option<(usize, &str)> {
    let segment_start = path.rfind('/').map_or(0, |i| i + 1);
    let dot = segment_start + path[segment_start..].rfind('.')?;
    let ext = &path[dot + 1..];
    if ext.is_empty() || dot == segment_start {
        return None;
    }
    Some((dot, ext))
}
