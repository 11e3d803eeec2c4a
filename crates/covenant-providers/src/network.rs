//! HTTP access: `http.*`.
//!
//! Calls are synchronous; the guest blocks until the response body has been
//! read. Redirects are followed only to hosts on the allow-list.

use std::sync::Arc;
use std::time::Duration;

use covenant_abi::AbiValue;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HostCallError, HostCallResult};
use crate::function::{FunctionKind, HostFunctionTable, host_functions};

/// Default request timeout for [`HttpNetwork`].
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Redirect hops followed before a request fails.
pub const MAX_REDIRECTS: usize = 10;

/// An HTTP request issued by a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method, upper case.
    pub method: String,
    /// Absolute URL.
    pub url: String,
    /// Request body; empty for none.
    pub body: String,
}

impl HttpRequest {
    /// A `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".into(),
            url: url.into(),
            body: String::new(),
        }
    }

    /// A `POST` request.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST".into(),
            url: url.into(),
            body: body.into(),
        }
    }
}

/// The response handed back to a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// Network access available to guests.
pub trait Network: Send + Sync {
    /// Perform a request.
    fn request(&self, request: &HttpRequest) -> HostCallResult<HttpResponse>;
}

/// Pattern for matching hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostPattern {
    /// Exact host match.
    Exact(String),
    /// Wildcard pattern (e.g., "*.example.com").
    Wildcard(String),
    /// Any host.
    Any,
}

impl HostPattern {
    /// Parse `*`, `*.example.com` or `example.com`.
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            Self::Any
        } else if pattern.starts_with("*.") {
            Self::Wildcard(pattern.to_string())
        } else {
            Self::Exact(pattern.to_string())
        }
    }

    /// Check if a host matches this pattern.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(pattern) => pattern.eq_ignore_ascii_case(host),
            Self::Wildcard(pattern) => match pattern.strip_prefix("*.") {
                Some(domain) => {
                    host.eq_ignore_ascii_case(domain)
                        || host
                            .to_ascii_lowercase()
                            .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
                }
                None => pattern == host,
            },
            Self::Any => true,
        }
    }
}

/// Blocking HTTP client restricted to an allow-list of hosts.
pub struct HttpNetwork {
    client: reqwest::blocking::Client,
    allowed: Vec<HostPattern>,
}

impl HttpNetwork {
    /// Create a client that may reach the given hosts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(allowed: Vec<HostPattern>) -> HostCallResult<Self> {
        Self::with_timeout(allowed, DEFAULT_HTTP_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_timeout(allowed: Vec<HostPattern>, timeout: Duration) -> HostCallResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .redirect(redirect_policy(allowed.clone()))
            .build()
            .map_err(|e| HostCallError::Http(e.to_string()))?;
        Ok(Self { client, allowed })
    }

    /// Check a URL against the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`HostCallError::AccessDenied`] for hosts outside the list and
    /// [`HostCallError::InvalidInput`] for unparsable URLs.
    pub fn check_url(&self, url: &str) -> HostCallResult<reqwest::Url> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| HostCallError::InvalidInput(format!("invalid URL {url}: {e}")))?;
        check_host(&self.allowed, &parsed)?;
        Ok(parsed)
    }
}

fn check_host(allowed: &[HostPattern], url: &reqwest::Url) -> HostCallResult<()> {
    let host = url.host_str().unwrap_or_default();
    if allowed.iter().any(|p| p.matches(host)) {
        Ok(())
    } else {
        Err(HostCallError::AccessDenied(format!(
            "host not in allow-list: {host}"
        )))
    }
}

/// Decide whether the `hops`-th redirect, to `url`, may be followed.
fn check_redirect(allowed: &[HostPattern], url: &reqwest::Url, hops: usize) -> HostCallResult<()> {
    if hops > MAX_REDIRECTS {
        return Err(HostCallError::Http(format!("too many redirects ({hops})")));
    }
    check_host(allowed, url)
        .map_err(|e| HostCallError::AccessDenied(format!("redirect to {url}: {e}")))
}

fn redirect_policy(allowed: Vec<HostPattern>) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        let verdict = check_redirect(&allowed, attempt.url(), attempt.previous().len());
        match verdict {
            Ok(()) => attempt.follow(),
            Err(e) => {
                debug!(url = %attempt.url(), error = %e, "Refusing guest HTTP redirect");
                attempt.error(e)
            }
        }
    })
}

impl Network for HttpNetwork {
    fn request(&self, request: &HttpRequest) -> HostCallResult<HttpResponse> {
        let url = self.check_url(&request.url)?;
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| HostCallError::InvalidInput(format!("invalid method: {e}")))?;

        debug!(method = %method, url = %url, "Guest HTTP request");

        let mut builder = self.client.request(method, url);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .map_err(|e| HostCallError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| HostCallError::Http(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

impl std::fmt::Debug for HttpNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNetwork")
            .field("allowed", &self.allowed)
            .finish()
    }
}

/// A network that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

impl Network for OfflineNetwork {
    fn request(&self, request: &HttpRequest) -> HostCallResult<HttpResponse> {
        Err(HostCallError::Unavailable(format!(
            "network is offline: {} {}",
            request.method, request.url
        )))
    }
}

pub(crate) fn register(table: &mut HostFunctionTable, net: Arc<dyn Network>) {
    host_functions!(table, FunctionKind::Effect, "http", with net, {
        "get" => (Str) -> Str, move |a| {
            Ok(AbiValue::Str(net.request(&HttpRequest::get(a.str(0)?))?.body))
        };
        "post" => (Str, Str) -> Str, move |a| {
            Ok(AbiValue::Str(net.request(&HttpRequest::post(a.str(0)?, a.str(1)?))?.body))
        };
        "fetch" => (Str, Str, Str) -> Str, move |a| {
            let request = HttpRequest {
                method: a.str(0)?.to_ascii_uppercase(),
                url: a.str(1)?.to_string(),
                body: a.str(2)?.to_string(),
            };
            Ok(AbiValue::Str(net.request(&request)?.body))
        };
    });
}
