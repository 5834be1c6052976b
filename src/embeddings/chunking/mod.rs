
use tracing::debug;

/// Split `text` into consecutive windows of at most `max_chars` characters.
///
/// Windows never overlap and ignore word or sentence boundaries, so joining
/// the output reproduces the input exactly. Lengths count Unicode scalar
/// values, not bytes.
#[inline]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::with_capacity(text.chars().count().div_ceil(max_chars));
    let mut current = String::new();
    let mut current_len = 0;

    for ch in text.chars() {
        current.push(ch);
        current_len += 1;

        if current_len == max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    debug!(
        "Chunked {} characters into {} chunks of at most {}",
        text.chars().count(),
        chunks.len(),
        max_chars
    );

    chunks
}
