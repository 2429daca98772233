use std::fmt;

use crate::tier::Tier;

/// An error raised by a bridge operation.
///
/// Returning a `BridgeError` from a bridged call terminates the current
/// script execution. The host handler converts it into an HTTP failure
/// response exactly once, at the top of the per-request call stack
/// (see [`Bridge::execute`](crate::Bridge::execute)).
///
/// "Not found" outcomes (absent cookie, absent form file, unknown vocation)
/// are never errors; they are returned as `Value::Nil` or `false`.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeError {
    /// The kind of failure
    pub kind: BridgeErrorKind,
    /// Human-readable message, including the underlying cause when there is one
    pub message: String,
}

impl BridgeError {
    /// Creates a new error.
    pub fn new(kind: BridgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A script passed an argument of the wrong type.
    ///
    /// `position` is 1-based and excludes the receiver object.
    pub fn argument(position: usize, expected: &'static str, message: impl Into<String>) -> Self {
        Self::new(
            BridgeErrorKind::ArgumentType { position, expected },
            message,
        )
    }

    /// A host operation (network, file, parse) failed.
    pub fn host(context: &str, cause: impl fmt::Display) -> Self {
        Self::new(BridgeErrorKind::HostOperation, format!("{}: {}", context, cause))
    }

    /// The method is not installed on the object for this tier.
    pub fn missing_capability(method: &str, tier: Tier) -> Self {
        Self::new(
            BridgeErrorKind::MissingCapability {
                method: method.to_string(),
                tier,
            },
            format!("method '{}' is not available to {} scripts", method, tier),
        )
    }

    /// A collaborator required by the operation was never registered.
    pub fn not_registered(what: &str) -> Self {
        Self::new(
            BridgeErrorKind::NotRegistered,
            format!("{} has not been registered", what),
        )
    }

    /// HTTP status the host writes when this error reaches the top of a request.
    pub fn status_code(&self) -> u16 {
        500
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BridgeError {}

/// The kind of bridge error.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeErrorKind {
    /// A script-supplied argument had the wrong type
    ArgumentType {
        /// 1-based argument position
        position: usize,
        /// Name of the expected type
        expected: &'static str,
    },
    /// The method is absent from the active capability tier
    MissingCapability {
        /// Script-visible method name
        method: String,
        /// Tier of the calling object
        tier: Tier,
    },
    /// The generic validator name is not in the registry
    UnknownValidator,
    /// A host operation failed (network, file, parse, malformed address)
    HostOperation,
    /// A table could not be converted because its shape is ambiguous
    AmbiguousTable,
    /// A required collaborator or object shape was not registered
    NotRegistered,
    /// Configuration or reference data could not be loaded
    Config,
}

impl fmt::Display for BridgeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeErrorKind::ArgumentType { position, expected } => {
                write!(f, "bad argument #{} (expected {})", position, expected)
            }
            BridgeErrorKind::MissingCapability { method, tier } => {
                write!(f, "missing capability '{}' for {} tier", method, tier)
            }
            BridgeErrorKind::UnknownValidator => write!(f, "unknown validator"),
            BridgeErrorKind::HostOperation => write!(f, "host operation failed"),
            BridgeErrorKind::AmbiguousTable => write!(f, "ambiguous table"),
            BridgeErrorKind::NotRegistered => write!(f, "not registered"),
            BridgeErrorKind::Config => write!(f, "configuration error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_error_names_expected_type() {
        let err = BridgeError::argument(1, "string", "Invalid url type. Expected string");
        assert_eq!(
            err.kind,
            BridgeErrorKind::ArgumentType {
                position: 1,
                expected: "string"
            }
        );
        let shown = err.to_string();
        assert!(shown.contains("bad argument #1"));
        assert!(shown.contains("expected string"));
    }

    #[test]
    fn missing_capability_mentions_method_and_tier() {
        let err = BridgeError::missing_capability("get", Tier::Regular);
        assert!(err.message.contains("'get'"));
        assert!(err.message.contains("regular"));
    }

    #[test]
    fn host_error_carries_cause() {
        let err = BridgeError::host("Cannot split host and port", "missing port in address");
        assert_eq!(err.kind, BridgeErrorKind::HostOperation);
        assert!(err.message.ends_with("missing port in address"));
        assert_eq!(err.status_code(), 500);
    }
}
