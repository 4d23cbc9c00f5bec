//! Chunking strategies.
//!
//! The character budget derives from the token budget with the 4-chars-per
//! -token heuristic. Fixed chunking cuts at whitespace near the target when
//! it can; markdown treats heading lines as hard boundaries; code uses
//! regex heuristics for function, class, and comment starts.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Heuristic characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// How far below the target a whitespace cut may land.
const MIN_CUT_RATIO: f64 = 0.5;

/// Chunking strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Fixed-size windows with whitespace-friendly cuts.
    #[default]
    Fixed,
    /// Heading-aware markdown chunking.
    Markdown,
    /// Heuristic code chunking.
    Code,
}

/// Chunking knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOptions {
    /// Strategy to apply.
    #[serde(default)]
    pub strategy: ChunkStrategy,
    /// Token budget per chunk.
    pub max_tokens: usize,
    /// Overlap between consecutive fixed chunks, in tokens.
    #[serde(default)]
    pub overlap_tokens: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Fixed,
            max_tokens: 256,
            overlap_tokens: 16,
        }
    }
}

impl ChunkOptions {
    fn target_chars(&self) -> usize {
        (self.max_tokens.max(1)) * CHARS_PER_TOKEN
    }

    fn overlap_chars(&self) -> usize {
        let overlap = self.overlap_tokens * CHARS_PER_TOKEN;
        // Overlap beyond the target would stall the window.
        overlap.min(self.target_chars() / 2)
    }
}

/// Split normalized text into chunk strings.
///
/// Tiny budgets still produce non-empty chunks; blank input produces an
/// empty list. Never panics.
#[must_use]
pub fn split_text(text: &str, opts: &ChunkOptions) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    match opts.strategy {
        ChunkStrategy::Fixed => split_fixed(text, opts),
        ChunkStrategy::Markdown => split_on_boundaries(text, opts, is_markdown_boundary),
        ChunkStrategy::Code => split_on_boundaries(text, opts, is_code_boundary),
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn split_fixed(text: &str, opts: &ChunkOptions) -> Vec<String> {
    let target = opts.target_chars();
    let overlap = opts.overlap_chars();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let hard_end = floor_char_boundary(text, start + target);
        let end = if hard_end >= text.len() {
            text.len()
        } else {
            // Prefer a whitespace cut close to the target.
            let window = &text[start..hard_end];
            match window.rfind(char::is_whitespace) {
                Some(ws) if ws >= (target as f64 * MIN_CUT_RATIO) as usize => start + ws,
                _ => hard_end,
            }
        };

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_owned());
        }
        if end >= text.len() {
            break;
        }

        let next = floor_char_boundary(text, end.saturating_sub(overlap));
        // Guarantee forward progress regardless of overlap.
        start = if next > start { next } else { end };
    }
    chunks
}

fn markdown_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#{1,6}\s").expect("static regex"))
}

fn is_markdown_boundary(line: &str) -> bool {
    markdown_heading_re().is_match(line)
}

fn code_boundary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(pub\s+)?(fn|def|class|func|function|impl|struct|trait|interface)\b|^\s*(//|#|/\*|\*)",
        )
        .expect("static regex")
    })
}

fn is_code_boundary(line: &str) -> bool {
    code_boundary_re().is_match(line)
}

/// Accumulate lines, flushing on boundary lines (when the buffer is
/// non-empty) and on budget overflow.
fn split_on_boundaries(
    text: &str,
    opts: &ChunkOptions,
    is_boundary: fn(&str) -> bool,
) -> Vec<String> {
    let target = opts.target_chars();
    let mut chunks = Vec::new();
    let mut buffer = String::new();

    let mut flush = |buffer: &mut String| {
        let piece = buffer.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_owned());
        }
        buffer.clear();
    };

    for line in text.split('\n') {
        if is_boundary(line) && !buffer.trim().is_empty() {
            flush(&mut buffer);
        }
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(line);

        if buffer.len() >= target {
            flush(&mut buffer);
        }
    }
    flush(&mut buffer);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(max_tokens: usize, overlap_tokens: usize) -> ChunkOptions {
        ChunkOptions {
            strategy: ChunkStrategy::Fixed,
            max_tokens,
            overlap_tokens,
        }
    }

    #[test]
    fn empty_input_yields_empty_list() {
        assert!(split_text("", &ChunkOptions::default()).is_empty());
        assert!(split_text("   \n  ", &ChunkOptions::default()).is_empty());
    }

    #[test]
    fn fixed_cuts_near_target_at_whitespace() {
        let words = "word ".repeat(100);
        let chunks = split_text(&words, &fixed(10, 0));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // Cuts land on whitespace, so no word is split.
            assert!(chunk.split_whitespace().all(|w| w == "word"));
            assert!(chunk.len() <= 40);
        }
    }

    #[test]
    fn fixed_overlap_repeats_tail_content(){
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa".repeat(4);
        let chunks = split_text(&text, &fixed(8, 4));
        assert!(chunks.len() > 1);
        // Every chunk starts at or before the previous chunk's end.
        let rejoined = chunks.join(" ");
        assert!(rejoined.len() >= text.trim().len() - chunks.len());
    }

    #[test]
    fn tiny_budgets_never_panic() {
        for max_tokens in [0usize, 1, 2, 8] {
            let chunks = split_text("some text to slice up", &fixed(max_tokens, 2));
            assert!(!chunks.is_empty());
            for strategy in [ChunkStrategy::Markdown, ChunkStrategy::Code] {
                let opts = ChunkOptions {
                    strategy,
                    max_tokens,
                    overlap_tokens: 0,
                };
                assert!(!split_text("line one\nline two", &opts).is_empty());
            }
        }
    }

    #[test]
    fn unicode_input_respects_char_boundaries() {
        let text = "héllø wörld ünïcode ".repeat(30);
        let chunks = split_text(&text, &fixed(6, 2));
        assert!(!chunks.is_empty());
    }

    #[test]
    fn markdown_headings_are_hard_boundaries() {
        let doc = "# Intro\nfirst section body\n## Details\nsecond section body";
        let chunks = split_text(doc, &ChunkOptions {
            strategy: ChunkStrategy::Markdown,
            max_tokens: 256,
            overlap_tokens: 0,
        });
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("# Intro"));
        assert!(chunks[1].starts_with("## Details"));
    }

    #[test]
    fn leading_heading_does_not_emit_empty_chunk() {
        let doc = "# Only heading\nbody";
        let chunks = split_text(doc, &ChunkOptions {
            strategy: ChunkStrategy::Markdown,
            max_tokens: 256,
            overlap_tokens: 0,
        });
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn code_chunking_breaks_at_function_starts() {
        let source = "fn alpha() {\n    body();\n}\n\nfn beta() {\n    body();\n}";
        let chunks = split_text(source, &ChunkOptions {
            strategy: ChunkStrategy::Code,
            max_tokens: 256,
            overlap_tokens: 0,
        });
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("fn alpha"));
        assert!(chunks[1].starts_with("fn beta"));
    }
}
