//! UTF-8 safe truncation for log previews.
//!
//! Inbound payloads are logged on decode failure; these helpers keep the
//! preview short without splitting a multi-byte character.

/// Maximum number of bytes of a raw payload included in a log line.
pub const PREVIEW_BYTES: usize = 120;

/// Truncate a string to at most `max_bytes` bytes at a char boundary.
#[inline]
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Preview of a raw payload for logging, with `...` appended when cut.
pub fn preview(raw: &str) -> String {
    if raw.len() <= PREVIEW_BYTES {
        return raw.to_owned();
    }
    format!("{}...", truncate_str(raw, PREVIEW_BYTES))
}
