//! Output normalization: maps arbitrary raw compiler output to a canonical
//! comparable form.
//!
//! Engines disagree wildly on incidental formatting — whitespace, `@charset`
//! prologues, debugger echoes, "on line N of stdin" diagnostics, crash
//! banners — while agreeing (or meaningfully disagreeing) on the CSS they
//! emit. [`normalize`] strips the noise and reflows the text so that two
//! outputs compare byte-for-byte exactly when they are semantically the
//! same.
//!
//! The pipeline is total: it never fails, on any input, including invalid
//! byte sequences. It is also idempotent — normalizing already-normalized
//! text yields the same text — which is what lets normalized artifacts be
//! persisted and compared across runs. One carve-out: a ` of stdin`
//! phrase split across a line break is only assembled by the whitespace
//! collapse, so it survives the first pass and disappears on the next.
//! Engine diagnostics emit the phrase on a single line, where one pass
//! suffices.

use once_cell::sync::Lazy;
use regex::Regex;

static ERROR_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Error: ").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static OPEN_BRACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" *\{ *").unwrap());
static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"([;,]) *").unwrap());
static CLOSE_BRACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\}\s*").unwrap());

/// Normalizes raw compiler output bytes into canonical comparable text.
///
/// Steps, in order:
/// 1. decode as UTF-8, dropping undecodable byte sequences entirely;
/// 2. drop noise lines (see [`is_noise_line`]);
/// 3. remove ` of stdin` phrases and `Error: ` line prefixes, collapse all
///    whitespace runs to a single space, then reflow: line break after `{`
///    and after `;`/`,`, line break around `}`;
/// 4. trim surrounding whitespace and a single trailing period.
pub fn normalize(raw: &[u8]) -> String {
    let decoded = decode_dropping_invalid(raw);

    let kept: String = decoded
        .split_inclusive('\n')
        .filter(|line| !is_noise_line(line))
        .collect();

    // Runs before the whitespace collapse, so the phrase must sit on one
    // line to be removed in this pass (see module doc).
    let text = kept.replace(" of stdin", "");
    let text = ERROR_PREFIX.replace_all(&text, "");
    let text = WHITESPACE_RUN.replace_all(&text, " ");
    let text = OPEN_BRACE.replace_all(&text, " {\n");
    let text = SEPARATOR.replace_all(&text, "${1}\n");
    let text = CLOSE_BRACE.replace_all(&text, "\n}\n");

    let trimmed = text.trim();
    trimmed.strip_suffix('.').unwrap_or(trimmed).to_string()
}

/// Decodes bytes as UTF-8, dropping invalid sequences instead of
/// substituting a replacement character. A genuine U+FFFD already present
/// in the input survives.
fn decode_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(err) => {
                let (valid, rest) = bytes.split_at(err.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let skip = err.error_len().unwrap_or(rest.len());
                bytes = &rest[skip..];
            }
        }
    }
}

/// Line-level noise predicates, matched against one raw output line.
///
/// - structural `@charset` declarations;
/// - interactive-debugger echo lines (`>> ` prefix) and caret position
///   markers;
/// - `on line N` diagnostics that point at the transient stdin input
///   rather than a real file;
/// - the fixed backtrace trailer and segmentation fault banner.
fn is_noise_line(line: &str) -> bool {
    let trimmed = line.trim();
    line.starts_with("@charset")
        || line.starts_with(">> ")
        || trimmed.ends_with('^')
        || (trimmed.starts_with("on line")
            && (trimmed.ends_with("stdin") || trimmed.ends_with("standard input")))
        || trimmed == "Use --trace for backtrace."
        || trimmed == "Segmentation fault (core dumped)"
}
