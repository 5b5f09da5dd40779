//! Redacted storage for Hub access tokens.

use std::fmt;

/// A string that never prints its content.
///
/// `Debug` and `Display` both render `[REDACTED]`; the value is only
/// reachable through [`expose_secret`][SecretString::expose_secret].
///
/// ```
/// use palign_core::SecretString;
///
/// let token = SecretString::new("hf_abc123");
/// assert_eq!(format!("{:?}", token), "SecretString([REDACTED])");
/// assert_eq!(token.expose_secret(), "hf_abc123");
/// ```
#[derive(Clone, Default)]
pub struct SecretString {
    inner: String,
}

impl SecretString {
    /// Wrap a secret value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            inner: secret.into(),
        }
    }

    /// Read a token from the first set, non-empty environment variable.
    pub fn from_env(vars: &[&str]) -> Option<Self> {
        vars.iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.trim().is_empty())
            .map(Self::new)
    }

    /// Expose the secret value.
    #[inline]
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    /// Check if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_output() {
        let secret = SecretString::new("hf_token");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(secret.expose_secret(), "hf_token");
    }

    #[test]
    fn test_from_env_skips_missing() {
        assert!(SecretString::from_env(&["PALIGN_TEST_TOKEN_THAT_IS_NEVER_SET"]).is_none());
        assert!(SecretString::default().is_empty());
    }
}
