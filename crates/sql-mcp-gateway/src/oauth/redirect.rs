//! Redirect URI policy: host allowlist and redirect construction.

use url::Url;

use crate::error::{OAuthError, OAuthResult};

/// One allowlist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    /// Matches the host exactly.
    Exact(String),
    /// `*.example.com`: matches any subdomain, not the apex.
    Subdomain(String),
}

impl HostPattern {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().trim_end_matches('.').to_ascii_lowercase();
        if raw.is_empty() {
            return None;
        }
        match raw.strip_prefix("*.") {
            Some(suffix) if !suffix.is_empty() => Some(Self::Subdomain(format!(".{suffix}"))),
            Some(_) => None,
            None => Some(Self::Exact(raw)),
        }
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(expected) => host == expected,
            Self::Subdomain(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
        }
    }
}

/// Trusted redirect hosts.
#[derive(Debug, Clone, Default)]
pub struct RedirectPolicy {
    allowed: Vec<HostPattern>,
}

impl RedirectPolicy {
    /// Build from configured host entries; blank entries are ignored.
    #[must_use]
    pub fn from_hosts<S: AsRef<str>>(hosts: &[S]) -> Self {
        Self { allowed: hosts.iter().filter_map(|h| HostPattern::parse(h.as_ref())).collect() }
    }

    /// Validate a redirect URI for registration.
    ///
    /// # Errors
    ///
    /// Returns a `redirect_uris` validation error if the URI is not an
    /// absolute http(s) URL without a fragment whose host is allowlisted.
    pub fn validate(&self, uri: &str) -> OAuthResult<Url> {
        let parsed = Url::parse(uri)
            .map_err(|e| OAuthError::validation("redirect_uris", format!("'{uri}' is not a valid URL: {e}")))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(OAuthError::validation(
                "redirect_uris",
                format!("'{uri}' must use http or https"),
            ));
        }
        if parsed.fragment().is_some() {
            return Err(OAuthError::validation(
                "redirect_uris",
                format!("'{uri}' must not contain a fragment"),
            ));
        }

        let host = parsed.host_str().unwrap_or_default();
        if !self.host_allowed(host) {
            return Err(OAuthError::validation(
                "redirect_uris",
                format!("host '{host}' is not in the redirect allowlist"),
            ));
        }
        Ok(parsed)
    }

    /// True if the URI parses and its host is allowlisted.
    #[must_use]
    pub fn is_allowed(&self, uri: &str) -> bool {
        self.validate(uri).is_ok()
    }

    fn host_allowed(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        !host.is_empty() && self.allowed.iter().any(|p| p.matches(&host))
    }
}

/// Append `code` and, when present, `state` to a redirect URI.
///
/// # Errors
///
/// Returns `InvalidRedirect` if the URI does not parse.
pub fn with_code(redirect_uri: &str, code: &str, state: Option<&str>) -> OAuthResult<String> {
    let mut url =
        Url::parse(redirect_uri).map_err(|e| OAuthError::InvalidRedirect(e.to_string()))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("code", code);
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok(url.into())
}
