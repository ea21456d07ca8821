//! Sliding-window text chunker.
//!
//! Splits note bodies into fixed-size character windows with a configurable
//! overlap between consecutive windows. Windows are measured in characters,
//! not bytes, so multi-byte text never splits a code point.

/// Split text into overlapping windows of at most `size` characters.
///
/// Consecutive windows overlap by `overlap` characters; the final window may
/// be shorter. The advancing step is clamped to at least 1 so the loop
/// terminates even when `overlap >= size`. Empty input yields no chunks.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || size == 0 {
        return Vec::new();
    }

    // Byte offsets of every char boundary, plus the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1; // length in chars

    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut i = 0;

    while i < len {
        let end = (i + size).min(len);
        chunks.push(text[bounds[i]..bounds[end]].to_string());
        if end == len {
            break;
        }
        i += step;
    }

    chunks
}
