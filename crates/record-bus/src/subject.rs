//! # Subjects
//!
//! Subjects are opaque channel names. The bus only checks that they are
//! routable and that the provisioned stream captures them.

use crate::error::{BusError, BusResult};

/// Classification requests raised by record services.
pub const CLASSIFICATION_MESSAGE: &str = "CLASSIFICATION_MESSAGE";

/// Adverse drug reaction events.
pub const ADR_MESSAGE: &str = "ADR_MESSAGE";

/// Audit-trail events.
pub const AUDIT_MESSAGE: &str = "AUDIT_MESSAGE";

/// Cross-service notifications.
pub const NOTIFICATION_MESSAGE: &str = "NOTIFICATION_MESSAGE";

/// Subjects the platform stream captures unless configured otherwise.
pub const PLATFORM_SUBJECTS: [&str; 4] = [
    CLASSIFICATION_MESSAGE,
    ADR_MESSAGE,
    AUDIT_MESSAGE,
    NOTIFICATION_MESSAGE,
];

/// Check that a concrete subject can be published or subscribed to.
///
/// Wildcard tokens are reserved for stream patterns.
pub fn validate_subject(subject: &str) -> BusResult<()> {
    let routable = !subject.is_empty()
        && !subject.chars().any(char::is_whitespace)
        && subject
            .split('.')
            .all(|token| !token.is_empty() && token != "*" && token != ">");

    if routable {
        Ok(())
    } else {
        Err(BusError::InvalidSubject(subject.to_string()))
    }
}

/// Whether `pattern` captures `subject` using token matching.
///
/// `*` matches exactly one token, `>` matches one or more trailing tokens.
#[must_use]
pub fn pattern_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Derive a durable consumer name for a subject.
///
/// Consumer names cannot contain `.`, `*`, `>` or whitespace. Every byte
/// outside `[A-Za-z0-9]` (and `-` in the subject) is written as `_XX`, so
/// distinct `(prefix, subject)` pairs never share a consumer. The first bare
/// `-` separates the prefix from the subject.
#[must_use]
pub fn durable_name(prefix: &str, subject: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + subject.len() + 1);
    escape_into(&mut name, prefix, false);
    name.push('-');
    escape_into(&mut name, subject, true);
    name
}

fn escape_into(out: &mut String, raw: &str, keep_dash: bool) {
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || (keep_dash && byte == b'-') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("_{byte:02X}"));
        }
    }
}
