//! Scrubbing for strings that may end up in logs.

use std::sync::LazyLock;

use regex::Regex;

const MAX_LOGGED_LEN: usize = 500;

static JWT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]*\.[A-Za-z0-9_-]*\.[A-Za-z0-9_-]*").expect("static regex")
});
static BEARER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("static regex"));
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@([A-Za-z0-9.-]+\.[A-Za-z]{2,})").expect("static regex")
});

/// Masks access tokens and e-mail local parts and caps the length.
pub fn redact(text: &str) -> String {
    let text = JWT.replace_all(text, "[REDACTED_TOKEN]");
    let text = BEARER.replace_all(&text, "Bearer [REDACTED_TOKEN]");
    let text = EMAIL.replace_all(&text, "***@$1");
    truncate(&text)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_LOGGED_LEN {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_LOGGED_LEN).collect();
    out.push_str("...[truncated]");
    out
}
