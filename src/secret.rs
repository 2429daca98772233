use std::fmt;

/// Credential material that must never reach a log line.
///
/// Session tokens handed to scripts and the passwords of outbound
/// `authentication` tables are stored as `Secret`s. Both `{:?}` and `{}`
/// print `[REDACTED]`, so a request, a [`SessionHandle`](crate::SessionHandle)
/// or a [`BasicAuth`](crate::BasicAuth) can be traced as a whole.
///
/// # Examples
///
/// ```
/// use script_bridge::Secret;
///
/// let token = Secret::from("sess-7f3a".to_string());
/// assert_eq!(format!("token={}", token), "token=[REDACTED]");
/// assert_eq!(token.expose_secret(), "sess-7f3a");
/// ```
// No Clone: copies of a credential are made explicitly through expose_secret.
pub struct Secret<T> {
    inner: T,
}

impl<T> Secret<T> {
    /// Wraps a credential.
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Borrows the credential. The caller is responsible for not logging it.
    pub fn expose_secret(&self) -> &T {
        &self.inner
    }
}

impl Secret<String> {
    /// Whether the credential is the empty string, as for anonymous sessions.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_hidden_in_debug_of_enclosing_struct() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Login {
            username: String,
            password: Secret<String>,
        }

        let login = Login {
            username: "admin".into(),
            password: Secret::new("hunter2".into()),
        };
        let shown = format!("{:?}", login);
        assert!(shown.contains("admin"));
        assert!(shown.contains("[REDACTED]"));
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("String"));
    }

    #[test]
    fn token_is_hidden_in_tracing_style_formatting() {
        let token = Secret::from("sess-1234567890".to_string());
        assert_eq!(format!("session={}", token), "session=[REDACTED]");
        assert!(!token.is_empty());
        assert!(Secret::from(String::new()).is_empty());
    }

    #[test]
    fn explicit_access_returns_the_value() {
        let secret = Secret::new(42);
        assert_eq!(*secret.expose_secret(), 42);
    }
}
