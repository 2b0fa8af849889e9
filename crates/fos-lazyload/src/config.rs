//! Load Options
//!
//! The complete set of recognized widget options. Unknown keys are rejected
//! when deserializing, so nothing unchecked reaches the engine.

use std::time::Duration;

use serde::Deserialize;

use crate::ConfigError;

/// Widget load options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct LoadOptions {
    /// Retries allowed after the first attempt
    pub retry_attempts: u32,
    /// Base backoff delay
    pub retry_delay_ms: u64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Skip visibility gating entirely
    pub critical: bool,
    /// Vertical proximity margin around the viewport
    pub visibility_margin_px: u32,
    /// Eligibility delay when no visibility observer exists
    pub fallback_delay_ms: u64,
    /// Capability probe deadline
    pub probe_timeout_ms: u64,
    /// Always prefer the low-resolution variant
    pub low_bandwidth: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_delay_ms: 30_000,
            timeout_ms: 10_000,
            critical: false,
            visibility_margin_px: 200,
            fallback_delay_ms: 1000,
            probe_timeout_ms: 5000,
            low_bandwidth: false,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retries(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn low_bandwidth(mut self, enabled: bool) -> Self {
        self.low_bandwidth = enabled;
        self
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Validate and extract the retry configuration
    pub fn retry_config(&self) -> Result<RetryConfig, ConfigError> {
        RetryConfig::new(
            self.retry_attempts,
            self.retry_delay_ms,
            self.max_delay_ms,
            self.timeout_ms,
        )
    }
}

/// Retry/backoff bounds, validated so that `max_delay_ms >= base_delay_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    timeout_ms: u64,
}

impl RetryConfig {
    pub fn new(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        timeout_ms: u64,
    ) -> Result<Self, ConfigError> {
        if max_delay_ms < base_delay_ms {
            return Err(ConfigError::DelayBounds {
                base: base_delay_ms,
                max: max_delay_ms,
            });
        }
        if timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            timeout_ms,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            timeout_ms: 10_000,
        }
    }
}
