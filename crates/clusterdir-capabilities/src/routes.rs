//! The route table: which capability each API route requires.
//!
//! This table is the security policy of the directory API and is meant to be
//! reviewed as a unit. Every served route must appear here; anything that
//! does not match a rule is denied.
//!
//! Patterns are written without the API prefix. `{name}` matches exactly one
//! path segment. A rule's `resource` is the capability path it requires, with
//! `*` where the pattern has a parameter.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::capability::{API_SCHEME, Capability};
use crate::error::{CapabilityError, CapabilityResult};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Upper-case method name, also the capability segment.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(CapabilityError::RouteTable(format!(
                "unsupported method {other}"
            ))),
        }
    }
}

/// How a route is protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Anyone may call it.
    Public,
    /// A session token must carry a capability for `resource` in `namespace`.
    Capability {
        /// Capability path.
        resource: String,
        /// Action namespace.
        namespace: String,
    },
    /// The request must be signed by a registered client key.
    SignedRequest,
}

/// One entry of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    /// Method.
    pub method: Method,
    /// Path pattern, e.g. `/clusters/{id}`.
    pub pattern: String,
    /// Protection.
    pub access: Access,
}

impl RouteRule {
    /// A public rule.
    #[must_use]
    pub fn public(method: Method, pattern: &str) -> Self {
        Self {
            method,
            pattern: pattern.to_string(),
            access: Access::Public,
        }
    }

    /// A signed-request rule.
    #[must_use]
    pub fn signed(method: Method, pattern: &str) -> Self {
        Self {
            method,
            pattern: pattern.to_string(),
            access: Access::SignedRequest,
        }
    }

    /// A capability rule.
    #[must_use]
    pub fn capability(method: Method, pattern: &str, resource: &str, namespace: &str) -> Self {
        Self {
            method,
            pattern: pattern.to_string(),
            access: Access::Capability {
                resource: resource.to_string(),
                namespace: namespace.to_string(),
            },
        }
    }

    /// The capability this rule requires, if it is a capability rule.
    #[must_use]
    pub fn required_capability(&self) -> Option<Capability> {
        match &self.access {
            Access::Capability {
                resource,
                namespace,
            } => Some(Capability::new(
                API_SCHEME,
                resource.as_str(),
                namespace.as_str(),
                [self.method.as_str()],
            )),
            Access::Public | Access::SignedRequest => None,
        }
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        split_path(&self.pattern)
    }

    fn literal_count(&self) -> usize {
        self.segments().filter(|s| !is_param(s)).count()
    }

    fn matches(&self, path: &[&str]) -> bool {
        let mut pattern = self.segments();
        let mut path = path.iter();
        loop {
            match (pattern.next(), path.next()) {
                (None, None) => return true,
                (Some(p), Some(s)) if is_param(p) || p == *s => {},
                _ => return false,
            }
        }
    }

    /// Pattern with parameter names erased, for duplicate detection.
    fn shape(&self) -> String {
        self.segments()
            .map(|s| if is_param(s) { "{}" } else { s })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn validate(&self) -> CapabilityResult<()> {
        let err = |reason: &str| {
            Err(CapabilityError::RouteTable(format!(
                "{} {}: {reason}",
                self.method, self.pattern
            )))
        };

        if !self.pattern.starts_with('/') {
            return err("pattern must start with '/'");
        }
        if self.pattern.len() > 1 && self.pattern.split('/').skip(1).any(str::is_empty) {
            return err("pattern has an empty segment");
        }

        let Access::Capability {
            resource,
            namespace,
        } = &self.access
        else {
            return Ok(());
        };

        if namespace.is_empty() || namespace.contains('/') || namespace == "*" {
            return err("namespace must be a single concrete name");
        }
        let admin_resource = resource == "/admin" || resource.starts_with("/admin/");
        let admin_namespace = namespace.starts_with("admin-");
        if admin_resource != admin_namespace {
            return err("admin resources must use an admin- namespace and nothing else may");
        }

        let expected: Vec<&str> = self
            .segments()
            .map(|s| if is_param(s) { "*" } else { s })
            .collect();
        let actual: Vec<&str> = split_path(resource).collect();
        if expected != actual {
            return err("resource does not follow the pattern");
        }
        Ok(())
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn is_param(segment: &str) -> bool {
    segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}')
}

/// Validated route table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    prefix: String,
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Build and validate a table.
    ///
    /// `prefix` (e.g. `/api`) is stripped from incoming paths before
    /// matching; pass `""` for none.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::RouteTable`] if a rule is malformed, an
    /// admin resource is paired with a non-admin namespace (or the reverse),
    /// or two rules cover the same method and path shape.
    pub fn new(prefix: &str, rules: Vec<RouteRule>) -> CapabilityResult<Self> {
        let prefix = prefix.trim_end_matches('/');
        if !prefix.is_empty() && !prefix.starts_with('/') {
            return Err(CapabilityError::RouteTable(format!(
                "prefix {prefix} must start with '/'"
            )));
        }

        let mut seen = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert((rule.method, rule.shape())) {
                return Err(CapabilityError::RouteTable(format!(
                    "duplicate rule for {} {}",
                    rule.method, rule.pattern
                )));
            }
        }

        Ok(Self {
            prefix: prefix.to_string(),
            rules,
        })
    }

    /// The directory API's table.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::RouteTable`] if `prefix` is malformed.
    pub fn builtin(prefix: &str) -> CapabilityResult<Self> {
        Self::new(prefix, builtin_rules())
    }

    /// The API prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// All rules.
    #[must_use]
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    fn strip_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        if self.prefix.is_empty() {
            return Some(path);
        }
        let rest = path.strip_prefix(&self.prefix)?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Find the most specific rule for a request.
    ///
    /// Query strings are ignored. Returns `None` for paths outside the
    /// prefix, paths with `.`/`..` segments, and unlisted routes.
    #[must_use]
    pub fn lookup(&self, method: Method, path: &str) -> Option<&RouteRule> {
        let path = self.strip_prefix(path)?;
        let segments: Vec<&str> = split_path(path).collect();
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return None;
        }
        self.rules
            .iter()
            .filter(|rule| rule.method == method && rule.matches(&segments))
            .max_by_key(|rule| rule.literal_count())
    }

    /// The capability a request must present, per the table.
    ///
    /// `None` means the route is public, signed-request only, or unknown.
    #[must_use]
    pub fn derive_required_capability(&self, method: Method, path: &str) -> Option<Capability> {
        self.lookup(method, path)
            .and_then(RouteRule::required_capability)
    }

    /// Check that every served route has a rule with the same pattern.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::RouteTable`] naming the first uncovered route.
    pub fn ensure_covers<'a>(
        &self,
        served: impl IntoIterator<Item = (Method, &'a str)>,
    ) -> CapabilityResult<()> {
        let missing: Vec<String> = served
            .into_iter()
            .filter(|(method, pattern)| {
                !self
                    .rules
                    .iter()
                    .any(|rule| rule.method == *method && rule.pattern == *pattern)
            })
            .map(|(method, pattern)| format!("{method} {pattern}"))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CapabilityError::RouteTable(format!(
                "routes without a policy: {}",
                missing.join(", ")
            )))
        }
    }
}

/// The directory API's rules, unprefixed.
#[must_use]
pub fn builtin_rules() -> Vec<RouteRule> {
    use Method::{Delete, Get, Patch, Post, Put};

    vec![
        // Clusters
        RouteRule::public(Get, "/clusters"),
        RouteRule::capability(Post, "/clusters", "/clusters", "clusters"),
        RouteRule::public(Get, "/clusters/{id}"),
        RouteRule::capability(Put, "/clusters/{id}", "/clusters/*", "clusters"),
        RouteRule::capability(Delete, "/clusters/{id}", "/clusters/*", "clusters"),
        RouteRule::capability(
            Patch,
            "/clusters/{id}/update-timestamp",
            "/clusters/*/update-timestamp",
            "clusters",
        ),
        RouteRule::public(Get, "/clusters/{id}/schema"),
        RouteRule::public(Get, "/clusters/{id}/published-nodes"),
        RouteRule::public(Get, "/clusters/{id}/enums-dropdown"),
        RouteRule::public(Get, "/clusters/{id}/authority-map"),
        // Nodes
        RouteRule::public(Get, "/clusters/{id}/nodes"),
        RouteRule::capability(Post, "/clusters/{id}/nodes", "/clusters/*/nodes", "nodes"),
        RouteRule::capability(
            Put,
            "/clusters/{id}/nodes/{node}",
            "/clusters/*/nodes/*",
            "nodes",
        ),
        RouteRule::capability(
            Delete,
            "/clusters/{id}/nodes/{node}",
            "/clusters/*/nodes/*",
            "nodes",
        ),
        RouteRule::capability(
            Put,
            "/clusters/{id}/nodes/{node}/status",
            "/clusters/*/nodes/*/status",
            "nodes",
        ),
        // Jobs
        RouteRule::capability(Post, "/jobs/clusters", "/jobs/clusters", "jobs"),
        // Users
        RouteRule::capability(Get, "/users", "/users", "users"),
        RouteRule::signed(Patch, "/users/email-reset"),
        // Admin
        RouteRule::capability(
            Get,
            "/admin/capabilities",
            "/admin/capabilities",
            "admin-capabilities",
        ),
        RouteRule::capability(
            Post,
            "/admin/capabilities",
            "/admin/capabilities",
            "admin-capabilities",
        ),
        RouteRule::capability(Get, "/admin/roles", "/admin/roles", "admin-roles"),
        RouteRule::capability(Post, "/admin/roles", "/admin/roles", "admin-roles"),
        RouteRule::capability(
            Get,
            "/admin/roles/{id}/capabilities",
            "/admin/roles/*/capabilities",
            "admin-roles",
        ),
        RouteRule::capability(
            Post,
            "/admin/roles/{id}/capabilities",
            "/admin/roles/*/capabilities",
            "admin-roles",
        ),
        RouteRule::capability(
            Get,
            "/admin/users/{id}/roles",
            "/admin/users/*/roles",
            "admin-users",
        ),
        RouteRule::capability(
            Post,
            "/admin/users/{id}/roles",
            "/admin/users/*/roles",
            "admin-users",
        ),
        // Registration and session
        RouteRule::signed(Post, "/register"),
        RouteRule::signed(Post, "/refresh-token"),
        RouteRule::signed(Post, "/ucans"),
        // Client keys and tokens
        RouteRule::signed(Get, "/keys"),
        RouteRule::signed(Post, "/keys"),
        RouteRule::signed(Delete, "/keys"),
        RouteRule::signed(Get, "/tokens"),
        RouteRule::signed(Post, "/tokens"),
        RouteRule::signed(Delete, "/tokens"),
        // Emails
        RouteRule::signed(Get, "/emails"),
        RouteRule::signed(Post, "/emails"),
        RouteRule::signed(Delete, "/emails"),
        RouteRule::signed(Post, "/emails/send-reset-request"),
        // Profiles
        RouteRule::signed(Get, "/profiles"),
        RouteRule::signed(Post, "/profiles"),
        RouteRule::public(Get, "/profiles/{cuid}"),
        RouteRule::signed(Patch, "/profiles/{cuid}"),
        RouteRule::signed(Delete, "/profiles/{cuid}"),
        RouteRule::signed(Put, "/profiles/{cuid}/update-node-id"),
        // Source indexes
        RouteRule::public(Get, "/source-indexes"),
        RouteRule::signed(Post, "/source-indexes"),
        RouteRule::public(Get, "/source-indexes/{id}"),
        RouteRule::signed(Put, "/source-indexes/{id}"),
        RouteRule::signed(Delete, "/source-indexes/{id}"),
    ]
}
