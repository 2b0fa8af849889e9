//! fOS Lazy Loading Driver
//!
//! Runs a [`fos_lazyload::LifecycleCoordinator`] on a single-threaded
//! `smol` executor. The driver turns effects into timers, fetches and probe
//! registrations against a [`Host`], and feeds every result back into the
//! coordinator in arrival order.
//!
//! # Example
//! ```rust,ignore
//! use fos_lazyload_driver::{Driver, ScriptedHost};
//!
//! let (driver, handle, renders) = Driver::new(host, options, caps)?;
//! handle.activate(descriptor)?;
//! smol::block_on(driver.run())?;
//! ```

mod driver;
mod host;
mod scripted;

#[cfg(feature = "http")]
pub mod http;

pub use driver::{Command, Driver, DriverHandle, RenderSignal};
pub use host::Host;
pub use scripted::{
    FormatSupport, Scenario, ScriptedHost, ScriptedOutcome, ScriptedResponse, ScrollStep, TimedReading,
};

/// Driver error
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Invalid options: {0}")]
    Config(#[from] fos_lazyload::ConfigError),

    #[error("Driver stopped")]
    Stopped,

    #[error("Render channel closed")]
    RenderClosed,
}
