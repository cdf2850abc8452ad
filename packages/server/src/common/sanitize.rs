//! Sanitizer for user-facing error details.
//!
//! Render failures bubble up raw tool output which can embed absolute paths
//! into per-job scratch directories. Those paths are redacted before the
//! detail is stored or published, and the result is bounded in length.

use lazy_static::lazy_static;
use regex::Regex;

/// Maximum length of a sanitized error detail.
pub const MAX_DETAIL_LEN: usize = 500;

lazy_static! {
    static ref TEMP_PATH: Regex =
        Regex::new(r"(?:/tmp|/private/tmp|/var/folders)/[^\s'\x22]+").unwrap();
}

/// Redact scratch-directory paths and truncate to [`MAX_DETAIL_LEN`].
pub fn sanitize_error_detail(detail: &str) -> String {
    let redacted = TEMP_PATH.replace_all(detail, "<temp_path>");
    truncate_chars(&redacted, MAX_DETAIL_LEN)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_tmp_paths() {
        let raw = "ENOENT: no such file /tmp/renderflow-abc-12345678/index.tsx";
        let clean = sanitize_error_detail(raw);
        assert_eq!(clean, "ENOENT: no such file <temp_path>");
    }

    #[test]
    fn redacts_multiple_paths() {
        let raw = "copy /tmp/a/in.bin to /tmp/b/out.bin failed";
        let clean = sanitize_error_detail(raw);
        assert_eq!(clean, "copy <temp_path> to <temp_path> failed");
    }

    #[test]
    fn truncates_long_details() {
        let raw = "x".repeat(2000);
        let clean = sanitize_error_detail(&raw);
        assert_eq!(clean.len(), MAX_DETAIL_LEN);
    }

    #[test]
    fn leaves_ordinary_messages_alone() {
        let raw = "renderer exited with status 1";
        assert_eq!(sanitize_error_detail(raw), raw);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let raw = "é".repeat(600);
        let clean = sanitize_error_detail(&raw);
        assert_eq!(clean.chars().count(), MAX_DETAIL_LEN);
    }
}
