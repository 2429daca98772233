//! Host collaborators the bridge delegates to.
//!
//! Template rendering, widget compilation, one-time-code verification and
//! blacklisting live outside the bridge. Hosts plug them in through these
//! traits when building a [`Bridge`](crate::Bridge).

use std::fmt;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::BridgeError;
use crate::request::HostRequest;
use crate::response::ResponseWriter;
use crate::secret::Secret;

/// Opaque handle to the session of the current request.
///
/// Obtained from the host's session layer when a context is bound. The
/// bridge only passes it along; it never creates or mutates sessions.
#[derive(Clone)]
pub struct SessionHandle {
    token: Arc<Secret<String>>,
}

impl SessionHandle {
    /// Wraps a session token issued by the host.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(Secret::new(token.into())),
        }
    }

    /// An empty handle for requests without a session.
    pub fn anonymous() -> Self {
        Self::new(String::new())
    }

    /// The session token. Do not log it.
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.token() == other.token()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionHandle").field(&self.token).finish()
    }
}

/// Renders a named template into the response.
pub trait TemplateRenderer: Send + Sync {
    /// Renders `template` with `args`. Failures are logged by the caller,
    /// never surfaced to scripts.
    fn render(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &HostRequest,
        template: &str,
        args: &JsonMap<String, JsonValue>,
    ) -> Result<(), BridgeError>;
}

/// Result of compiling the widget list for a render.
///
/// `widgets` holds every widget that compiled, even when `error` is set.
#[derive(Debug, Default)]
pub struct WidgetCompilation {
    /// Compiled widget output keyed by widget name
    pub widgets: JsonMap<String, JsonValue>,
    /// First failure, if any widget failed
    pub error: Option<BridgeError>,
}

/// Compiles the display widgets injected into every rendered template.
pub trait WidgetCompiler: Send + Sync {
    /// Runs once per template render.
    fn compile(
        &self,
        request: &HostRequest,
        writer: &mut dyn ResponseWriter,
        session: &SessionHandle,
    ) -> WidgetCompilation;
}

/// Failure of a one-time-code verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpError {
    /// The code is wrong; scripts see `false`
    InvalidCode,
    /// Anything else (malformed secret, malformed token); scripts see an error
    Other(String),
}

impl fmt::Display for OtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtpError::InvalidCode => write!(f, "invalid code"),
            OtpError::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for OtpError {}

/// Verifies time-based one-time codes.
pub trait OtpVerifier: Send + Sync {
    /// Checks `token` against `secret`, accepting codes within `window` steps.
    fn verify(&self, secret: &str, token: &str, window: u32) -> Result<bool, OtpError>;
}

/// Removes blacklisted content from a string.
pub trait Blacklister: Send + Sync {
    /// Returns `line` with every occurrence of the blacklisted `chars` removed.
    fn blacklist(&self, line: &str, chars: &str) -> String;
}

/// Default [`Blacklister`]: drops every character that appears in `chars`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharBlacklist;

impl Blacklister for CharBlacklist {
    fn blacklist(&self, line: &str, chars: &str) -> String {
        line.chars().filter(|c| !chars.contains(*c)).collect()
    }
}
