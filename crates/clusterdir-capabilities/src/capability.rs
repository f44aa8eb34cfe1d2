//! Capability grammar and satisfaction.
//!
//! A capability is `{ scheme, path, namespace, segments }`. On the wire it is
//! the UCAN pair `with = "scheme:path"` and `can = "namespace/seg/seg"`, with a
//! bare `can = "*"` standing for the superuser ability (`namespace = "*"`,
//! `segments = ["*"]`).
//!
//! Matching is exact and case-sensitive apart from the three wildcards:
//! a granted path of `*`, a granted namespace of `*`, and a `*` segment.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CapabilityError, CapabilityResult};

/// Wildcard token used in paths, namespaces and segments.
pub const WILDCARD: &str = "*";

/// Resource scheme of the directory API.
pub const API_SCHEME: &str = "api";

/// Resource scheme of email delegations.
pub const MAILTO_SCHEME: &str = "mailto";

/// Namespace of email delegations.
pub const EMAIL_NAMESPACE: &str = "email";

/// A grant of actions over a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    /// Resource scheme (`api`, `mailto`).
    pub scheme: String,
    /// Hierarchical resource part, or `*` for every resource of the scheme.
    pub path: String,
    /// Action namespace, or `*` for every namespace.
    pub namespace: String,
    /// Action segments; `*` grants every action in the namespace.
    pub segments: Vec<String>,
}

/// Actions available on email delegations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmailAction {
    /// Add an address.
    Create,
    /// Read addresses.
    Read,
    /// Remove an address.
    Delete,
}

impl EmailAction {
    /// All email actions.
    pub const ALL: [Self; 3] = [Self::Create, Self::Read, Self::Delete];

    /// Segment name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Delete => "delete",
        }
    }
}

impl Capability {
    /// Create a capability from its four parts.
    #[must_use]
    pub fn new(
        scheme: impl Into<String>,
        path: impl Into<String>,
        namespace: impl Into<String>,
        segments: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            path: path.into(),
            namespace: namespace.into(),
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// The root capability: any action on any `api` resource.
    #[must_use]
    pub fn root() -> Self {
        Self::new(API_SCHEME, WILDCARD, WILDCARD, [WILDCARD])
    }

    /// An email delegation scoped to `did`'s mailbox.
    #[must_use]
    pub fn email(action: EmailAction, did: &str) -> Self {
        Self::new(MAILTO_SCHEME, did, EMAIL_NAMESPACE, [action.as_str()])
    }

    /// Whether this is the superuser ability over every resource.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path == WILDCARD && self.namespace == WILDCARD && self.has_wildcard_segment()
    }

    fn has_wildcard_segment(&self) -> bool {
        self.segments.iter().any(|s| s == WILDCARD)
    }

    /// Does holding `self` permit what `required` asks for?
    ///
    /// - schemes are equal
    /// - paths are equal, or `self.path` is `*`
    /// - namespaces are equal, or `self.namespace` is `*`
    /// - every required segment is granted, or `self` grants `*`
    #[must_use]
    pub fn satisfies(&self, required: &Self) -> bool {
        if self.scheme != required.scheme {
            return false;
        }
        if self.path != WILDCARD && self.path != required.path {
            return false;
        }
        if self.namespace != WILDCARD && self.namespace != required.namespace {
            return false;
        }
        self.has_wildcard_segment()
            || required
                .segments
                .iter()
                .all(|segment| self.segments.contains(segment))
    }

    /// Is `self` an attenuation of `parent` (no broader than it)?
    #[must_use]
    pub fn is_attenuation_of(&self, parent: &Self) -> bool {
        parent.satisfies(self)
    }

    /// The UCAN `with` string.
    #[must_use]
    pub fn with(&self) -> String {
        format!("{}:{}", self.scheme, self.path)
    }

    /// The UCAN `can` string.
    #[must_use]
    pub fn can(&self) -> String {
        if self.namespace == WILDCARD && self.segments.len() == 1 && self.has_wildcard_segment() {
            return WILDCARD.to_string();
        }
        let mut can = self.namespace.clone();
        for segment in &self.segments {
            can.push('/');
            can.push_str(segment);
        }
        can
    }

    /// Parse a UCAN `with`/`can` pair.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidCapability`] if `with` has no scheme,
    /// or `can` has an empty namespace or no segments.
    pub fn parse(with: &str, can: &str) -> CapabilityResult<Self> {
        let invalid = |value: &str, reason: &str| CapabilityError::InvalidCapability {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, path) = with
            .split_once(':')
            .ok_or_else(|| invalid(with, "resource has no scheme"))?;
        if scheme.is_empty() || path.is_empty() {
            return Err(invalid(with, "empty scheme or resource"));
        }

        if can == WILDCARD {
            return Ok(Self::new(scheme, path, WILDCARD, [WILDCARD]));
        }

        let mut parts = can.split('/');
        let namespace = parts
            .next()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| invalid(can, "empty namespace"))?;
        let segments: Vec<&str> = parts.collect();
        if segments.is_empty() {
            return Err(invalid(can, "ability has no segments"));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid(can, "empty ability segment"));
        }

        Ok(Self::new(scheme, path, namespace, segments))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.with(), self.can())
    }
}
