//! Credential-bearing header names and their log redaction.
//!
//! Values of these headers never reach a log line in full, whether or not
//! the operator lists them in `middleware.access_logs.redacted_headers`.

/// Header names always treated as credentials (case-insensitive).
pub const SENSITIVE_HEADER_NAMES: &[&str] = &[
    "authorization",
    "x-api-key",
    "proxy-authorization",
    "cookie",
    "cookie2",
    "x-auth-token",
    "x-access-token",
    "x-forwarded-authorization",
    "set-cookie",
];

/// Characters of a redacted value kept for correlation.
pub const REDACTION_KEEP: usize = 10;

pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADER_NAMES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(name))
}

/// First ten characters plus `***`, or just `***` for shorter values.
pub fn redact_value(value: &str) -> String {
    if value.chars().count() >= REDACTION_KEEP {
        let kept: String = value.chars().take(REDACTION_KEEP).collect();
        format!("{kept}***")
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_sensitive_case_insensitive() {
        assert!(is_sensitive("Authorization"));
        assert!(is_sensitive("AUTHORIZATION"));
        assert!(is_sensitive("x-Api-Key"));
        assert!(is_sensitive("X-Forwarded-Authorization"));
        assert!(is_sensitive("Cookie"));
        assert!(!is_sensitive("content-type"));
        assert!(!is_sensitive("user-agent"));
    }

    #[test]
    fn redaction_keeps_ten_characters() {
        assert_eq!(redact_value("Bearer eyJhbGciOiJSUzI1NiJ9"), "Bearer eyJ***");
        assert_eq!(redact_value("0123456789"), "0123456789***");
        assert_eq!(redact_value("short"), "***");
        assert_eq!(redact_value(""), "***");
    }

    #[test]
    fn redaction_respects_char_boundaries() {
        assert_eq!(redact_value("ééééééééééé"), "éééééééééé***");
    }
}
