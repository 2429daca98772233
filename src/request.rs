//! Framework-agnostic view of an in-flight HTTP request.
//!
//! Host integrations build a [`HostRequest`] from their server's request
//! type. The bridge reads it; only the body is consumed, exactly once, when
//! a script context is created.

use std::sync::atomic::{AtomicU64, Ordering};

use url::Url;

use crate::error::BridgeError;
use crate::marshal::{HeaderSet, ValueSet};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// An incoming HTTP request as seen by the bridge.
///
/// # Examples
///
/// ```
/// use script_bridge::HostRequest;
///
/// let req = HostRequest::new("GET", "/account?page=2")
///     .with_header("Cookie", "session=abc")
///     .with_remote_addr("203.0.113.9:51234");
///
/// assert_eq!(req.query().get("page"), Some("2"));
/// assert_eq!(req.cookie("session").unwrap().as_deref(), Some("abc"));
/// ```
#[derive(Debug, Clone)]
pub struct HostRequest {
    request_id: String,
    method: String,
    uri: String,
    headers: HeaderSet,
    remote_addr: String,
    body: Vec<u8>,
}

impl HostRequest {
    /// Creates a request with the given method and raw request URI.
    ///
    /// A request id of the form `req-<n>` is assigned; hosts that already
    /// track request ids should override it with [`with_request_id`](Self::with_request_id).
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        let n = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            request_id: format!("req-{}", n),
            method: method.into().to_ascii_uppercase(),
            uri: uri.into(),
            headers: HeaderSet::new(),
            remote_addr: String::new(),
            body: Vec::new(),
        }
    }

    /// Sets the request id used in logs.
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    /// Adds a header occurrence.
    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.add(key, value);
        self
    }

    /// Sets the peer address (`host:port`).
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = addr.into();
        self
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Request id for log correlation.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Upper-case HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Raw request URI as received (`/path?query`).
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    /// Peer address as `host:port`.
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Value of the `Content-Type` header, or the empty string.
    pub fn content_type(&self) -> &str {
        self.headers.get("Content-Type")
    }

    /// Takes the body out of the request. A second call yields an empty body.
    pub(crate) fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    /// Parses the request URI against a placeholder origin.
    ///
    /// # Errors
    ///
    /// Returns `HostOperation` if the URI cannot be parsed.
    pub fn url(&self) -> Result<Url, BridgeError> {
        let base = Url::parse("http://localhost/")
            .map_err(|e| BridgeError::host("Cannot build base url", e))?;
        Url::options()
            .base_url(Some(&base))
            .parse(&self.uri)
            .map_err(|e| BridgeError::host("Cannot parse request url", e))
    }

    /// Path plus query of the request as received, without scheme, host or
    /// fragment. The path is not normalized.
    pub fn relative_url(&self) -> String {
        let uri = self.uri.split('#').next().unwrap_or("");
        let path_and_query = match uri.find("://") {
            Some(i) => {
                let rest = &uri[i + 3..];
                rest.find(|c: char| c == '/' || c == '?').map_or("", |j| &rest[j..])
            }
            None => uri,
        };
        if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{}", path_and_query)
        }
    }

    /// Query values of the request URI.
    pub fn query(&self) -> ValueSet {
        let without_fragment = self.uri.split('#').next().unwrap_or("");
        match without_fragment.split_once('?') {
            Some((_, query)) => ValueSet::parse(query),
            None => ValueSet::new(),
        }
    }

    /// Looks up a request cookie.
    ///
    /// Returns `Ok(None)` when no cookie has that name. A name that is not a
    /// valid cookie name cannot be present, so it is also `None`.
    ///
    /// # Errors
    ///
    /// Lookups over the `Cookie` header do not fail at present.
    pub fn cookie(&self, name: &str) -> Result<Option<String>, BridgeError> {
        if !is_cookie_name(name) {
            return Ok(None);
        }
        for line in self.headers.get_all("Cookie") {
            for pair in line.split(';') {
                let Some((k, v)) = pair.trim().split_once('=') else {
                    continue;
                };
                if k.trim() == name {
                    let v = v.trim();
                    let v = v
                        .strip_prefix('"')
                        .and_then(|s| s.strip_suffix('"'))
                        .unwrap_or(v);
                    return Ok(Some(v.to_string()));
                }
            }
        }
        Ok(None)
    }
}

/// Cookie names are RFC 7230 tokens.
pub(crate) fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Splits `host:port` into its host part.
///
/// Accepts bracketed IPv6 (`[::1]:80`). A missing port, an unbracketed
/// IPv6 literal, or stray brackets are errors.
///
/// # Errors
///
/// Returns `HostOperation` describing the malformed address.
pub fn split_host_port(addr: &str) -> Result<&str, BridgeError> {
    const CONTEXT: &str = "Cannot split host and port";

    let Some(colon) = addr.rfind(':') else {
        return Err(BridgeError::host(
            CONTEXT,
            format!("address {}: missing port in address", addr),
        ));
    };

    let host = if addr.starts_with('[') {
        let Some(end) = addr.find(']') else {
            return Err(BridgeError::host(CONTEXT, format!("address {}: missing ']'", addr)));
        };
        if end + 1 != colon {
            return Err(BridgeError::host(
                CONTEXT,
                format!("address {}: missing port in address", addr),
            ));
        }
        &addr[1..end]
    } else {
        let host = &addr[..colon];
        if host.contains(':') {
            return Err(BridgeError::host(
                CONTEXT,
                format!("address {}: too many colons in address", addr),
            ));
        }
        host
    };

    if host.contains('[') || host.contains(']') || addr[colon + 1..].contains(']') {
        return Err(BridgeError::host(
            CONTEXT,
            format!("address {}: unexpected bracket", addr),
        ));
    }
    Ok(host)
}
