//! Session cookie carrying the wire token.

use crate::error::{CapabilityError, CapabilityResult};

/// Default cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "ucan_token";

/// Default cookie lifetime (24h). Tokens inside live shorter and get refreshed.
pub const DEFAULT_COOKIE_MAX_AGE_SECS: u64 = 86_400;

/// `Set-Cookie` rendering and `Cookie` parsing for the session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    name: String,
    max_age_secs: u64,
    secure: bool,
}

impl Default for SessionCookie {
    fn default() -> Self {
        Self::new(DEFAULT_COOKIE_NAME)
    }
}

impl SessionCookie {
    /// A cookie named `name`, 24h max-age, `Secure`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_age_secs: DEFAULT_COOKIE_MAX_AGE_SECS,
            secure: true,
        }
    }

    /// Set `Max-Age`.
    #[must_use]
    pub fn with_max_age_secs(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }

    /// Toggle the `Secure` attribute (off for local development only).
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, value: &str, max_age_secs: u64) -> String {
        let mut cookie = format!(
            "{}={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Strict",
            self.name
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value storing `token`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedToken`] if `token` holds characters
    /// that are not allowed in a cookie value.
    pub fn set(&self, token: &str) -> CapabilityResult<String> {
        let cookie_safe = |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.');
        if token.is_empty() || !token.bytes().all(cookie_safe) {
            return Err(CapabilityError::MalformedToken(
                "token is not cookie-safe".to_string(),
            ));
        }
        Ok(self.render(token, self.max_age_secs))
    }

    /// `Set-Cookie` value removing the session, sent when the presented
    /// token fails verification.
    #[must_use]
    pub fn clear(&self) -> String {
        self.render("", 0)
    }

    /// Pull the session token out of a `Cookie` header.
    #[must_use]
    pub fn extract<'a>(&self, cookie_header: &'a str) -> Option<&'a str> {
        cookie_header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .map(|(_, value)| value.trim_matches('"'))
            .filter(|value| !value.is_empty())
    }
}
