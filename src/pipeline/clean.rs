//! Deterministic text cleanup for extracted documents and model output.
//!
//! PDF text layers and scraped HTML come with CRLF line endings, words split
//! across line breaks by hyphenation, runs of blank lines and invisible
//! Unicode. Generated summaries sometimes arrive wrapped in Markdown fences.
//! Each rule below is a pure `&str → String` pass and is tested on its own.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so every later rule only has to deal
//! with `\n`; hyphen re-joining runs after trailing whitespace is trimmed so
//! `"exam-   \nple"` is recognised.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean text extracted from a PDF or an HTML page.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Trim trailing whitespace per line
/// 3. Re-join words hyphenated across a line break
/// 4. Collapse 3+ consecutive blank lines down to 2
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 6. Ensure the text ends with exactly one newline
pub fn clean_extracted_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = rejoin_hyphenated_words(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

/// Clean a generated summary or synthesis.
///
/// Same as [`clean_extracted_text`] minus hyphen re-joining, plus removal of
/// an outer Markdown fence; the result is trimmed instead of newline-terminated.
pub fn clean_generated(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

/// First `max_chars` characters of `text`, never splitting a UTF-8 sequence.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Limit `text` to `max_words` whitespace-separated words.
///
/// Text within the bound is returned unchanged; longer text is cut at the
/// last sentence end inside the bound when there is one, else at the word
/// bound.
pub fn clip_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    let clipped = words[..max_words].join(" ");
    match clipped.rfind(['.', '!', '?']) {
        Some(end) if end > clipped.len() / 3 => clipped[..=end].to_string(),
        _ => clipped,
    }
}

static RE_ABSTRACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)\babstract\b[\s.:\-—]*(.+?)(?:\n\s*\n|\n\s*(?:\d+\.?\s*)?(?:introduction|keywords|index terms)\b)",
    )
    .unwrap()
});

/// Recover the abstract paragraph from a paper's full text, if it has one.
pub fn find_abstract(text: &str) -> Option<String> {
    RE_ABSTRACT
        .captures(text)
        .map(|caps| caps[1].split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|a| a.split_whitespace().count() >= 10)
}

// ── Rule: Strip outer markdown fences ────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|text)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 3: Re-join hyphenated words ─────────────────────────────────────────

static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z])-\n([a-z])").unwrap());

fn rejoin_hyphenated_words(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "$1$2").to_string()
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 5: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 6: Ensure text ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
