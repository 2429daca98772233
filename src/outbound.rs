use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use url::Url;

use crate::error::{BridgeError, BridgeErrorKind};
use crate::marshal::{table_to_values, HeaderSet, ValueSet};
use crate::object::loose_string;
use crate::secret::Secret;
use crate::value::{Table, TableKey, Value};

/// Basic authentication credentials for an outbound request.
#[derive(Debug)]
pub struct BasicAuth {
    /// User name
    pub username: String,
    /// Password, redacted in debug output
    pub password: Secret<String>,
}

/// A request the bridge sends on behalf of a full-tier script.
#[derive(Debug)]
pub struct OutboundRequest {
    /// HTTP method, as given by the script
    pub method: String,
    /// Target URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderSet,
    /// Request body
    pub body: Vec<u8>,
    /// Optional basic authentication
    pub auth: Option<BasicAuth>,
    /// Whole-request timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl OutboundRequest {
    /// Creates a bodiless request.
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
            headers: HeaderSet::new(),
            body: Vec::new(),
            auth: None,
            timeout: None,
        }
    }

    /// A `POST` carrying `values` as a urlencoded form.
    pub fn form(url: Url, values: &ValueSet) -> Self {
        let mut request = Self::new("POST", url);
        request
            .headers
            .set("Content-Type", "application/x-www-form-urlencoded");
        request.body = values.encode().into_bytes();
        request
    }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundResponse {
    /// Status code
    pub status: u16,
    /// Response headers, multi-valued
    pub headers: HeaderSet,
    /// Response body
    pub body: Vec<u8>,
}

impl OutboundResponse {
    /// Body as UTF-8 text, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Executes outbound HTTP requests.
///
/// Calls block the requesting thread until the response body has been read.
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and buffers the response.
    ///
    /// # Errors
    ///
    /// Returns `HostOperation` for network and read failures. Non-2xx
    /// statuses are not errors.
    fn execute(&self, request: OutboundRequest) -> Result<OutboundResponse, BridgeError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn execute(&self, request: OutboundRequest) -> Result<OutboundResponse, BridgeError> {
        (**self).execute(request)
    }
}

/// Blocking `reqwest` transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a transport with no default timeout.
    ///
    /// # Errors
    ///
    /// Returns `HostOperation` when the client cannot be constructed.
    pub fn new() -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| BridgeError::host("Cannot create http client", e))?;
        Ok(Self { client })
    }

    /// Uses a preconfigured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: OutboundRequest) -> Result<OutboundResponse, BridgeError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| BridgeError::host("Cannot create http request", e))?;

        let mut builder = self.client.request(method, request.url);
        for (name, values) in request.headers.iter() {
            for value in values {
                builder = builder.header(name, value.as_str());
            }
        }
        if let Some(auth) = &request.auth {
            builder = builder.basic_auth(&auth.username, Some(auth.password.expose_secret()));
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .body(request.body)
            .send()
            .map_err(|e| BridgeError::host("Cannot execute http request", e))?;

        let status = response.status().as_u16();
        let mut headers = HeaderSet::new();
        for (name, value) in response.headers() {
            headers.add(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        let body = response
            .bytes()
            .map_err(|e| BridgeError::host("Cannot read http response", e))?
            .to_vec();

        Ok(OutboundResponse {
            status,
            headers,
            body,
        })
    }
}

/// Metadata about a request seen by a [`RecordingTransport`].
///
/// Holds the body length only, never the body or credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// HTTP method
    pub method: String,
    /// Target URL
    pub url: String,
    /// Length of the request body in bytes
    pub body_len: usize,
    /// Whether basic authentication was attached
    pub authenticated: bool,
}

/// A transport that answers every request with a canned response and
/// records what was sent, without network I/O.
#[derive(Debug)]
pub struct RecordingTransport {
    response: OutboundResponse,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingTransport {
    /// Answers every request with status 200 and `body`.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self::with_response(OutboundResponse {
            status: 200,
            headers: HeaderSet::new(),
            body: body.into(),
        })
    }

    /// Answers every request with `response`.
    pub fn with_response(response: OutboundResponse) -> Self {
        Self {
            response,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of requests executed so far.
    pub fn request_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Snapshot of the recorded requests.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl HttpTransport for RecordingTransport {
    fn execute(&self, request: OutboundRequest) -> Result<OutboundResponse, BridgeError> {
        let call = RecordedCall {
            method: request.method,
            url: request.url.to_string(),
            body_len: request.body.len(),
            authenticated: request.auth.is_some(),
        };
        self.calls
            .lock()
            .map_err(|_| BridgeError::host("Cannot record http request", "lock poisoned"))?
            .push(call);
        Ok(self.response.clone())
    }
}

/// Settings of one generic client request, read from a script table.
///
/// Recognised keys: `timeout` (duration string), `method` and `url`
/// (required strings), `data` (table or raw string), `headers` (string
/// pairs), `authentication` (`username`/`password`).
#[derive(Debug)]
pub struct ClientConfig {
    /// Optional timeout
    pub timeout: Option<Duration>,
    /// Request method
    pub method: String,
    /// Request URL, unparsed
    pub url: String,
    /// Encoded request body
    pub body: String,
    /// Header pairs in table order; later pairs replace earlier ones
    pub headers: Vec<(String, String)>,
    /// Basic authentication
    pub auth: Option<BasicAuth>,
}

impl ClientConfig {
    /// Reads the configuration table.
    ///
    /// # Errors
    ///
    /// Returns `ArgumentType` when `method` or `url` is not a string and
    /// `HostOperation` for a malformed timeout.
    pub fn from_table(table: &Table) -> Result<Self, BridgeError> {
        let timeout = match table.get_str("timeout") {
            Value::String(s) => {
                let d = parse_duration(s)
                    .map_err(|e| BridgeError::host("Cannot format timeout duration", e.message))?;
                (!d.is_zero()).then_some(d)
            }
            _ => None,
        };

        let method = table.get_str("method").as_str().ok_or_else(|| {
            BridgeError::argument(1, "string", "Invalid request method type. Expected string")
        })?;
        let url = table.get_str("url").as_str().ok_or_else(|| {
            BridgeError::argument(1, "string", "Invalid request url type. Expected string")
        })?;

        let body = match table.get_str("data") {
            Value::Table(data) => {
                let mut values = ValueSet::new();
                for (k, v) in data.iter() {
                    values.set(k.to_string(), v.to_string());
                }
                values.encode()
            }
            Value::String(s) => s.clone(),
            _ => String::new(),
        };

        let headers = match table.get_str("headers") {
            Value::Table(h) => h
                .iter()
                .filter_map(|(k, v)| match (k, v) {
                    (TableKey::Name(k), Value::String(v)) => {
                        Some((k.clone(), v.clone()))
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        let auth = table.get_str("authentication").as_table().map(|a| BasicAuth {
            username: loose_string(a.get_str("username")),
            password: Secret::new(loose_string(a.get_str("password"))),
        });

        Ok(Self {
            timeout,
            method: method.to_string(),
            url: url.to_string(),
            body,
            headers,
            auth,
        })
    }

    /// Turns the configuration into a request.
    ///
    /// # Errors
    ///
    /// Returns `HostOperation` when the URL or method is unusable.
    pub fn into_request(self) -> Result<OutboundRequest, BridgeError> {
        let url = Url::parse(&self.url)
            .map_err(|e| BridgeError::host("Cannot create http request", e))?;
        if self.method.is_empty() || !self.method.bytes().all(is_token_byte) {
            return Err(BridgeError::host(
                "Cannot create http request",
                format!("invalid method {:?}", self.method),
            ));
        }

        let mut request = OutboundRequest::new(self.method, url);
        for (k, v) in &self.headers {
            request.headers.set(k, v.as_str());
        }
        request.body = self.body.into_bytes();
        request.auth = self.auth;
        request.timeout = self.timeout;
        Ok(request)
    }
}

/// Converts a script form table for `postForm`. A missing table is an empty form.
pub(crate) fn form_values(data: Option<&Table>) -> Result<ValueSet, BridgeError> {
    data.map(table_to_values)
        .transpose()
        .map(Option::unwrap_or_default)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Parses a duration string such as `"300ms"`, `"1.5s"` or `"2h45m"`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A leading `+`
/// is allowed; negative durations are rejected. `"0"` needs no unit.
///
/// # Errors
///
/// Returns a `HostOperation` error describing the malformed input.
pub fn parse_duration(input: &str) -> Result<Duration, BridgeError> {
    const MAX_NANOS: u128 = i64::MAX as u128;

    let invalid = || {
        BridgeError::new(
            BridgeErrorKind::HostOperation,
            format!("time: invalid duration {:?}", input),
        )
    };

    let mut s = input;
    let mut negative = false;
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let int_len = s.bytes().take_while(u8::is_ascii_digit).count();
        let int_part = &s[..int_len];
        s = &s[int_len..];

        let mut frac_part = "";
        if let Some(rest) = s.strip_prefix('.') {
            let frac_len = rest.bytes().take_while(u8::is_ascii_digit).count();
            frac_part = &rest[..frac_len];
            s = &rest[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = s
            .char_indices()
            .find(|(_, c)| *c == '.' || c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        let nanos_per_unit: u128 = match &s[..unit_len] {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            "" => {
                return Err(BridgeError::new(
                    BridgeErrorKind::HostOperation,
                    format!("time: missing unit in duration {:?}", input),
                ))
            }
            unit => {
                return Err(BridgeError::new(
                    BridgeErrorKind::HostOperation,
                    format!("time: unknown unit {:?} in duration {:?}", unit, input),
                ))
            }
        };
        s = &s[unit_len..];

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        if whole > MAX_NANOS {
            return Err(invalid());
        }
        let mut value = whole.checked_mul(nanos_per_unit).ok_or_else(invalid)?;
        let mut scale = nanos_per_unit;
        for digit in frac_part.bytes() {
            scale /= 10;
            if scale == 0 {
                break;
            }
            value = value
                .checked_add(u128::from(digit - b'0') * scale)
                .ok_or_else(invalid)?;
        }
        total = total.checked_add(value).ok_or_else(invalid)?;
        if total > MAX_NANOS {
            return Err(invalid());
        }
    }

    if negative && total != 0 {
        return Err(BridgeError::new(
            BridgeErrorKind::HostOperation,
            format!("time: negative duration {:?} is not a timeout", input),
        ));
    }
    Ok(Duration::from_nanos(total as u64))
}
