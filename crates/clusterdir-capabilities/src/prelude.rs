//! Prelude module - commonly used types for convenient import.
//!
//! Use `use clusterdir_capabilities::prelude::*;` to import all essential types.

// Errors
pub use crate::{CapabilityError, CapabilityResult};

// Capabilities and principals
pub use crate::{Capability, EmailAction, Principal};

// Tokens
pub use crate::{Token, TokenBuilder, TokenId, TokenVerifier};

// Authorization
pub use crate::{AuthRequest, Decision, DenyReason, Method, RequestAuthorizer, RouteTable};

// Authority
pub use crate::{AuthorityContext, SessionCookie, SessionGrant};
