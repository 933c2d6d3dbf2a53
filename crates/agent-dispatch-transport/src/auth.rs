//! Classification of authentication failures.

use std::sync::OnceLock;

use regex::Regex;

use crate::ApiError;

fn expiry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)expired|invalid|unauthori[sz]ed").expect("auth expiry pattern is valid")
    })
}

/// Whether a response means the stored credential is no longer usable.
///
/// Only 401/403 responses whose body mentions expiry or invalidity qualify;
/// other 403s (e.g. quota or permission problems) stay remote errors.
#[must_use]
pub fn is_auth_expired(status: u16, body: &str) -> bool {
    matches!(status, 401 | 403) && expiry_pattern().is_match(body)
}

/// Map a non-success response to an [`ApiError`].
#[must_use]
pub fn classify(status: u16, body: String) -> ApiError {
    if is_auth_expired(status, &body) {
        ApiError::AuthExpired
    } else {
        ApiError::Remote { status, body }
    }
}
