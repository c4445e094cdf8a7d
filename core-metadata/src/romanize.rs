//! Latin transliteration of non-Latin names, used as one search strategy.

use deunicode::deunicode_with_tofu;

/// Latin-script approximation of `text`.
///
/// Returns `None` when `text` is already ASCII or when transliteration
/// produces nothing usable, so callers can skip the strategy entirely.
pub fn romanize(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.is_ascii() {
        return None;
    }

    let transliterated = deunicode_with_tofu(trimmed, "");
    let collapsed = transliterated.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() || collapsed.eq_ignore_ascii_case(trimmed) {
        None
    } else {
        Some(collapsed)
    }
}
