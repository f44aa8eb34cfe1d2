//! Clusterdir Test - shared test utilities.
//!
//! Deterministic keys, a fixed clock, an authority wired to in-memory stores
//! and a logging harness, for use as a dev-dependency.
//!
//! ```rust,ignore
//! use clusterdir_test::{init_test_logging, test_authority, test_principal};
//!
//! #[tokio::test]
//! async fn issues_sessions() {
//!     init_test_logging();
//!     let t = test_authority();
//!     let grant = t.authority.issue_session(&test_principal(9)).unwrap();
//!     assert!(grant.set_cookie.contains("HttpOnly"));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
