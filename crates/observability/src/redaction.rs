//! Log redaction helpers.
//!
//! Errors coming back from a remote job API may echo request material such as
//! API keys or bearer tokens. Any error text surfaced to callers or written to
//! logs goes through a [`SecretRedactor`] first.

/// Replacement for every occurrence of a registered secret.
pub const REDACTED: &str = "****";

/// Replaces known secret values with [`REDACTED`].
#[derive(Debug, Clone, Default)]
pub struct SecretRedactor {
    secrets: Vec<String>,
}

impl SecretRedactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a redactor from a list of secrets; blank values are ignored.
    pub fn from_secrets<I, T>(secrets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut redactor = Self::new();
        for secret in secrets {
            redactor.add_secret(secret);
        }
        redactor
    }

    pub fn add_secret(&mut self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.trim().is_empty() || self.secrets.contains(&secret) {
            return;
        }
        self.secrets.push(secret);
        // Longest first, so a secret containing another is masked whole.
        self.secrets.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }

    /// Lazily redacted view of `value`, for `%` fields in log macros.
    pub fn display<'a, T: std::fmt::Display>(&'a self, value: &'a T) -> Redacted<'a, T> {
        Redacted {
            redactor: self,
            value,
        }
    }
}

/// Renders its inner value through a redactor in `Display`.
#[derive(Clone, Copy)]
pub struct Redacted<'a, T: std::fmt::Display> {
    redactor: &'a SecretRedactor,
    value: &'a T,
}

impl<T: std::fmt::Display> std::fmt::Display for Redacted<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redactor.redact(&self.value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_every_occurrence() {
        let redactor = SecretRedactor::from_secrets(["s3cr3t"]);
        assert_eq!(
            redactor.redact("token=s3cr3t, again s3cr3t"),
            "token=****, again ****"
        );
    }

    #[test]
    fn ignores_blank_secrets() {
        let redactor = SecretRedactor::from_secrets(["", "  "]);
        assert!(redactor.is_empty());
        assert_eq!(redactor.redact("nothing to hide"), "nothing to hide");
    }

    #[test]
    fn longer_secret_wins_over_its_prefix() {
        let redactor = SecretRedactor::from_secrets(["abc", "abcdef"]);
        assert_eq!(redactor.redact("key=abcdef"), "key=****");
    }

    #[test]
    fn display_masks_the_rendered_value() {
        let redactor = SecretRedactor::from_secrets(["hunter2"]);
        let message = String::from("login failed for hunter2");
        assert_eq!(
            redactor.display(&message).to_string(),
            "login failed for ****"
        );
    }
}
