//! Clusterdir Telemetry - logging and request tracing.
//!
//! This crate provides:
//! - Configurable `tracing` subscriber setup (pretty, compact, JSON, full)
//! - Stdout, stderr or rotating file output
//! - A per-request span carrying request id, method, route and principal
//!
//! # Example
//!
//! ```rust,no_run
//! use clusterdir_telemetry::{LogConfig, LogFormat, RequestContext, RequestGuard, setup_logging};
//!
//! # fn main() -> Result<(), clusterdir_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("clusterdir_capabilities=debug");
//! setup_logging(&config)?;
//!
//! let guard = RequestGuard::new(RequestContext::new("POST", "/api/clusters"));
//! guard.record_principal("did:key:z6Mk...");
//! tracing::info!("handling request");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::{RequestContext, RequestGuard};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};
