use std::fmt;

use crate::tier::Tier;

/// A request-scoped logger.
///
/// `ScriptLog` is borrowed from a [`ScriptContext`](crate::ScriptContext)
/// and cannot outlive it. Every line carries the request id and the tier of
/// the bound script as structured fields.
///
/// Session tokens and outbound passwords are wrapped in
/// [`Secret`](crate::Secret), so formatting them here prints `[REDACTED]`.
#[derive(Debug, Clone, Copy)]
pub struct ScriptLog<'a> {
    request_id: &'a str,
    tier: Tier,
}

impl<'a> ScriptLog<'a> {
    /// Only contexts create loggers.
    pub(crate) fn new(request_id: &'a str, tier: Tier) -> Self {
        Self { request_id, tier }
    }

    /// Returns the request ID associated with this logger.
    pub fn request_id(&self) -> &str {
        self.request_id
    }

    /// Logs an info-level message.
    ///
    /// ```no_run
    /// # use script_bridge::{ScriptLog, Secret};
    /// # fn example(log: &ScriptLog) {
    /// let token = Secret::new("sess-1234");
    /// log.info(format_args!("resuming session {}", token));
    /// # }
    /// ```
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(request_id = %self.request_id, tier = %self.tier, "{}", args);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(request_id = %self.request_id, tier = %self.tier, "{}", args);
    }

    /// Logs an error-level message.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(request_id = %self.request_id, tier = %self.tier, "{}", args);
    }

    /// Logs a debug-level message.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(request_id = %self.request_id, tier = %self.tier, "{}", args);
    }
}
