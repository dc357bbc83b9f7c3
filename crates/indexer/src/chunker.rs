//! Word-budget chunking and sampling for embedding input.
//!
//! The embedding model has a bounded context, so large documents are cut
//! into word chunks and, when even the chunks overflow the budget, sampled
//! head/middle/tail so one vector still covers the document's spread.

/// Rough token estimate: 1 token ≈ 4 characters.
const CHARS_PER_TOKEN: usize = 4;

/// Fraction of the context budget to actually use; tokenizers disagree
/// enough that filling the whole window risks provider-side truncation.
const SAFETY_MARGIN: f64 = 0.75;

/// Split into chunks of at most `chunk_size` whitespace-separated words.
#[must_use]
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks: Vec<String> = words
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.join(" "))
        .collect();

    if chunks.is_empty() {
        chunks.push(text.to_string());
    }
    chunks
}

/// Reduce a chunked document to one embedding input within `max_tokens`.
///
/// Documents that fit are joined whole. Oversized documents keep the first
/// chunk (title, intro), up to three samples spread across the middle, and
/// the last chunk (conclusions), then get truncated to the safety margin.
#[must_use]
pub fn embedding_input(chunks: &[String], max_tokens: usize) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let total_tokens: usize = chunks.iter().map(|c| c.len() / CHARS_PER_TOKEN).sum();
    if total_tokens <= max_tokens {
        return chunks.join("\n\n");
    }

    let mut selected: Vec<&String> = vec![&chunks[0]];

    if chunks.len() > 2 {
        let middle_start = chunks.len() / 4;
        let middle_end = (chunks.len() * 3) / 4;
        let samples = 3.min(middle_end.saturating_sub(middle_start));
        if samples > 0 {
            let step = ((middle_end - middle_start) / samples).max(1);
            for idx in (middle_start..middle_end).step_by(step) {
                if selected.len() >= 4 {
                    break;
                }
                selected.push(&chunks[idx]);
            }
        }
    }

    if chunks.len() > 1 {
        selected.push(&chunks[chunks.len() - 1]);
    }

    let combined = selected
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let safe_limit = (max_tokens as f64 * SAFETY_MARGIN) as usize;
    if combined.len() / CHARS_PER_TOKEN > safe_limit {
        combined.chars().take(safe_limit * CHARS_PER_TOKEN).collect()
    } else {
        combined
    }
}
