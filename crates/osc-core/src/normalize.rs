//! Canonical comparison keys for names.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonical comparison key: lower-case, accents stripped, only `[a-z0-9 ]`,
/// whitespace collapsed and trimmed.
///
/// Every equality or similarity decision on names goes through this function.
pub fn normalize_key(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;

    for ch in input.to_lowercase().nfd() {
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
    }

    out
}

/// Tokens of a normalized key that are long enough to carry meaning (> 2 chars).
pub fn significant_tokens(key: &str) -> impl Iterator<Item = &str> {
    key.split(' ').filter(|t| t.chars().count() > 2)
}
