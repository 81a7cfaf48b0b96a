//! Text helpers shared by the loader and the verifier.

/// Keep at most `cap` characters (not bytes) of `text`.
pub fn truncate_chars(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// True when `cell` is empty or matches one of `tokens` (case-insensitive).
pub fn is_null_token<S: AsRef<str>>(cell: &str, tokens: &[S]) -> bool {
    let trimmed = cell.trim();
    trimmed.is_empty()
        || tokens
            .iter()
            .any(|token| token.as_ref().eq_ignore_ascii_case(trimmed))
}
