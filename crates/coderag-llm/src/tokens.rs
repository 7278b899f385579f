//! Fast token approximation shared by the chunker and the embedding gateway.

/// Average characters per token for source code and English prose.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate token count using a chars/4 heuristic.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Keep the head of `text` that fits in `max_tokens`, cut on a char boundary.
///
/// Returns the (possibly shortened) text and whether anything was cut.
#[must_use]
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> (&str, bool) {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}
