use std::io;

use time::OffsetDateTime;

use crate::error::BridgeError;
use crate::marshal::HeaderSet;
use crate::request::is_cookie_name;

/// Destination of the HTTP response for one request.
///
/// Mirrors the usual server response-writer contract: headers may be mutated
/// until a status is written, the first status written wins, and writing
/// body bytes without a status implies `200`.
pub trait ResponseWriter {
    /// Response headers.
    fn headers(&self) -> &HeaderSet;

    /// Mutable response headers. Changes after the status is written are not sent.
    fn headers_mut(&mut self) -> &mut HeaderSet;

    /// Writes the status line. Only the first call takes effect.
    fn write_header(&mut self, status: u16);

    /// Writes body bytes, writing status `200` first if none was written.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// The status written so far, if any.
    fn status(&self) -> Option<u16>;
}

/// An in-memory [`ResponseWriter`].
///
/// Hosts that buffer responses can use it directly; tests use it to inspect
/// what a script did.
#[derive(Debug, Default, Clone)]
pub struct RecordedResponse {
    headers: HeaderSet,
    status: Option<u16>,
    // Headers as they were when the status was written
    sent_headers: Option<HeaderSet>,
    body: Vec<u8>,
}

impl RecordedResponse {
    /// Creates an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as UTF-8 text, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Headers that were sent with the status line, or the current headers
    /// if no status has been written yet.
    pub fn sent_headers(&self) -> &HeaderSet {
        self.sent_headers.as_ref().unwrap_or(&self.headers)
    }
}

impl ResponseWriter for RecordedResponse {
    fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderSet {
        &mut self.headers
    }

    fn write_header(&mut self, status: u16) {
        if let Some(existing) = self.status {
            tracing::warn!(existing, ignored = status, "superfluous write_header call");
            return;
        }
        self.status = Some(status);
        self.sent_headers = Some(self.headers.clone());
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.write_header(200);
        }
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn status(&self) -> Option<u16> {
        self.status
    }
}

/// Formats a Unix timestamp as an HTTP date (`Mon, 02 Jan 2006 15:04:05 GMT`).
fn http_date(unix: i64) -> Result<String, BridgeError> {
    let format = time::format_description::parse(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT",
    )
    .map_err(|e| BridgeError::host("Cannot build date format", e))?;
    OffsetDateTime::from_unix_timestamp(unix)
        .map_err(|e| BridgeError::host("Cannot set HTTP cookie", e))?
        .format(&format)
        .map_err(|e| BridgeError::host("Cannot format cookie expiry", e))
}

/// A `Set-Cookie` header value.
///
/// Cookies set by scripts are always `HttpOnly` with path `/`; the secure
/// flag follows whether the server runs under TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Path attribute
    pub path: String,
    /// Absolute expiry, Unix seconds
    pub expires: i64,
    /// Secure attribute
    pub secure: bool,
    /// HttpOnly attribute
    pub http_only: bool,
}

impl SetCookie {
    /// Creates the cookie shape scripts are allowed to set.
    pub fn scripted(name: &str, value: &str, expires: i64, secure: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            path: "/".to_string(),
            expires,
            secure,
            http_only: true,
        }
    }

    /// Serialises the header value.
    ///
    /// # Errors
    ///
    /// Returns `HostOperation` for an invalid name or an unrepresentable expiry.
    pub fn header_value(&self) -> Result<String, BridgeError> {
        if !is_cookie_name(&self.name) {
            return Err(BridgeError::host(
                "Cannot set HTTP cookie",
                format!("invalid cookie name '{}'", self.name),
            ));
        }

        let value: String = self
            .value
            .chars()
            .filter(|c| c.is_ascii() && !c.is_ascii_control() && !matches!(c, '"' | ';' | '\\'))
            .collect();
        let value = if value.contains(' ') || value.contains(',') {
            format!("\"{}\"", value)
        } else {
            value
        };

        let expires = http_date(self.expires)?;

        let mut out = format!("{}={}; Path={}; Expires={}", self.name, value, self.path, expires);
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        Ok(out)
    }

    /// The `name=value` pair a client sends back in its `Cookie` header.
    pub fn request_pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_status_wins() {
        let mut w = RecordedResponse::new();
        w.headers_mut().set("X-Before", "1");
        w.write_header(302);
        w.headers_mut().set("X-After", "1");
        w.write_header(200);

        assert_eq!(w.status(), Some(302));
        assert!(w.sent_headers().contains("X-Before"));
        assert!(!w.sent_headers().contains("X-After"));
    }

    #[test]
    fn write_implies_ok() {
        let mut w = RecordedResponse::new();
        w.write(b"hello").unwrap();
        assert_eq!(w.status(), Some(200));
        assert_eq!(w.body_text(), "hello");
    }

    #[test]
    fn scripted_cookie_header() {
        let cookie = SetCookie::scripted("session", "abc123", 0, false);
        assert_eq!(
            cookie.header_value().unwrap(),
            "session=abc123; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly"
        );

        let secure = SetCookie::scripted("session", "abc123", 1_700_000_000, true);
        let value = secure.header_value().unwrap();
        assert!(value.contains("Expires=Tue, 14 Nov 2023 22:13:20 GMT"));
        assert!(value.ends_with("; HttpOnly; Secure"));
        assert_eq!(secure.request_pair(), "session=abc123");
    }

    #[test]
    fn cookie_value_is_sanitized() {
        let cookie = SetCookie::scripted("note", "a;b\"c d", 0, false);
        assert!(cookie.header_value().unwrap().starts_with("note=\"abc d\";"));
    }

    #[test]
    fn invalid_cookie_name_is_rejected() {
        let cookie = SetCookie::scripted("bad name", "v", 0, false);
        assert!(cookie.header_value().is_err());
    }
}
