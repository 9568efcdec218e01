//! Word-based chunking with overlap

/// Rough token size used to turn token budgets into character budgets
pub const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into chunks of about `chunk_tokens` tokens, each starting
/// with up to `overlap_tokens` tokens from the end of the previous chunk.
///
/// Words are never split; a single word longer than the budget becomes its
/// own chunk.
pub fn chunk_text(text: &str, chunk_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let max_chars = chunk_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;
    let words: Vec<&str> = text.split_whitespace().collect();

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let mut end = start;
        let mut len = 0;
        while end < words.len() {
            let add = words[end].len() + usize::from(end > start);
            if end > start && len + add > max_chars {
                break;
            }
            len += add;
            end += 1;
        }

        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }

        // Always advance by at least one word
        let mut next = end;
        let mut carried = 0;
        while next > start + 1 {
            let w = words[next - 1].len() + 1;
            if carried + w > overlap_chars {
                break;
            }
            carried += w;
            next -= 1;
        }
        start = next;
    }

    chunks
}
