//! Text normalization and content hashing.

use sha2::{Digest as _, Sha256};

/// Normalize document text.
///
/// CRLF becomes LF, runs of horizontal whitespace collapse to one space,
/// and blank-line runs are capped at two.
#[must_use]
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.split('\n') {
        let collapsed = collapse_horizontal(line);
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&collapsed);
    }
    out.trim_end_matches('\n').trim_start_matches('\n').to_owned()
}

fn collapse_horizontal(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out.trim_end().to_owned()
}

/// Deterministic content hash over normalized text, source, and URL.
///
/// 64-char lowercase hex; changes when any of the three inputs change.
#[must_use]
pub fn doc_hash(norm_text: &str, source: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(norm_text.as_bytes());
    hasher.update([0x1f]);
    hasher.update(source.as_bytes());
    hasher.update([0x1f]);
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_and_horizontal_runs_normalize() {
        let raw = "line one\t\t  with\truns\r\nline two   spaced\r\n";
        assert_eq!(normalize_text(raw), "line one with runs\nline two spaced");
    }

    #[test]
    fn blank_runs_cap_at_two() {
        let raw = "a\n\n\n\n\nb";
        assert_eq!(normalize_text(raw), "a\n\n\nb");
    }

    #[test]
    fn hash_is_deterministic_and_input_sensitive() {
        let base = doc_hash("text", "upload", "https://x");
        assert_eq!(base.len(), 64);
        assert!(base.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(doc_hash("text", "upload", "https://x"), base);
        assert_ne!(doc_hash("text!", "upload", "https://x"), base);
        assert_ne!(doc_hash("text", "crawl", "https://x"), base);
        assert_ne!(doc_hash("text", "upload", "https://y"), base);
    }

    #[test]
    fn separator_prevents_field_bleed() {
        // "ab" + "c" must not collide with "a" + "bc".
        assert_ne!(doc_hash("ab", "c", ""), doc_hash("a", "bc", ""));
    }
}
