//! Dynamic dispatch surface seen by scripts.
//!
//! Script engines call into the bridge by method name with a slice of
//! [`Value`] arguments. Argument positions are 1-based and exclude the
//! receiver, so `http:setHeader("X", "y")` has `"X"` at position 1.

use crate::error::BridgeError;
use crate::value::{Table, Value};

/// An object scripts can call methods on and read fields from.
pub trait ScriptObject {
    /// Invokes `method` with `args`, returning the script-visible results.
    ///
    /// # Errors
    ///
    /// `MissingCapability` when the method is not installed on this object,
    /// otherwise whatever the operation raises.
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Vec<Value>, BridgeError>;

    /// Names of the callable methods.
    fn methods(&self) -> &'static [&'static str];

    /// Reads a field; unknown fields are nil.
    fn field(&self, name: &str) -> Value;
}

/// Argument at 1-based `position`; missing arguments are nil.
pub fn arg(args: &[Value], position: usize) -> &Value {
    static NIL: Value = Value::Nil;
    position
        .checked_sub(1)
        .and_then(|i| args.get(i))
        .unwrap_or(&NIL)
}

/// Requires a string argument.
///
/// # Errors
///
/// Returns `ArgumentType` carrying `message` when the argument is not a string.
pub fn expect_string<'v>(
    args: &'v [Value],
    position: usize,
    message: &str,
) -> Result<&'v str, BridgeError> {
    arg(args, position)
        .as_str()
        .ok_or_else(|| BridgeError::argument(position, "string", message))
}

/// Requires a table argument.
///
/// # Errors
///
/// Returns `ArgumentType` carrying `message` when the argument is not a table.
pub fn expect_table<'v>(
    args: &'v [Value],
    position: usize,
    message: &str,
) -> Result<&'v Table, BridgeError> {
    arg(args, position)
        .as_table()
        .ok_or_else(|| BridgeError::argument(position, "table", message))
}

/// Requires a finite number argument, truncated toward zero.
///
/// # Errors
///
/// Returns `ArgumentType` carrying `message` for anything else, strings included.
pub fn expect_integer(args: &[Value], position: usize, message: &str) -> Result<i64, BridgeError> {
    match arg(args, position) {
        Value::Number(n) if n.is_finite() => Ok(n.trunc() as i64),
        _ => Err(BridgeError::argument(position, "number", message)),
    }
}

/// Like [`expect_integer`], with nil read as `None`.
///
/// # Errors
///
/// Returns `ArgumentType` carrying `message` for non-nil, non-number arguments.
pub fn optional_integer(
    args: &[Value],
    position: usize,
    message: &str,
) -> Result<Option<i64>, BridgeError> {
    if arg(args, position).is_nil() {
        return Ok(None);
    }
    expect_integer(args, position, message).map(Some)
}

/// Optional string argument; nil is `None`.
///
/// # Errors
///
/// Returns `ArgumentType` carrying `message` for non-nil, non-string arguments.
pub fn optional_string<'v>(
    args: &'v [Value],
    position: usize,
    message: &str,
) -> Result<Option<&'v str>, BridgeError> {
    match arg(args, position) {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(s.as_str())),
        _ => Err(BridgeError::argument(position, "string", message)),
    }
}

/// Optional table argument; nil is `None`.
///
/// # Errors
///
/// Returns `ArgumentType` carrying `message` for non-nil, non-table arguments.
pub fn optional_table<'v>(
    args: &'v [Value],
    position: usize,
    message: &str,
) -> Result<Option<&'v Table>, BridgeError> {
    match arg(args, position) {
        Value::Nil => Ok(None),
        Value::Table(t) => Ok(Some(t)),
        _ => Err(BridgeError::argument(position, "table", message)),
    }
}

/// Loose string conversion for fields of configuration tables: strings as is,
/// numbers formatted, anything else empty.
pub fn loose_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(_) => value.to_string(),
        _ => String::new(),
    }
}

/// No results.
pub(crate) fn none() -> Vec<Value> {
    Vec::new()
}

/// One result.
pub(crate) fn one(value: impl Into<Value>) -> Vec<Value> {
    vec![value.into()]
}
