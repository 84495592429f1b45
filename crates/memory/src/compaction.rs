//! Lossy compaction of block content for the WARM tier.
//!
//! The live record keeps a short summary; the full text is moved to the
//! content archive and restored when the block is promoted back to HOT.

use recollect_core::Compaction;

/// Build a summary of at most `max_chars` characters.
///
/// Whole leading sentences are kept while they fit. When not even the first
/// sentence fits, the text is cut on a word boundary and marked with `...`.
pub fn summarize(content: &str, max_chars: usize) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= max_chars {
        return normalized;
    }

    let mut summary = String::new();
    for sentence in split_sentences(&normalized) {
        let needed = summary.chars().count() + sentence.chars().count() + usize::from(!summary.is_empty());
        if needed > max_chars {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(sentence);
    }
    if !summary.is_empty() {
        return summary;
    }

    truncate_words(&normalized, max_chars.saturating_sub(3)) + "..."
}

/// Summarize `content` and account for the bytes saved.
pub fn compact(content: &str, max_chars: usize) -> (String, Compaction) {
    let summary = summarize(content, max_chars);
    let compaction = Compaction::new(content.len(), summary.len());
    (summary, compaction)
}

/// Sentences including their terminal punctuation.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

fn truncate_words(text: &str, max_chars: usize) -> String {
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(idx) if idx > 0 => cut[..idx].to_string(),
        _ => cut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_kept_whole() {
        assert_eq!(summarize("Hello   there.\n", 50), "Hello there.");
    }

    #[test]
    fn keeps_leading_sentences_that_fit() {
        let text = "Rust has ownership. Borrowing is checked at compile time. Lifetimes name scopes.";
        assert_eq!(summarize(text, 60), "Rust has ownership. Borrowing is checked at compile time.");
    }

    #[test]
    fn long_sentence_is_truncated_on_word_boundary() {
        let text = "word ".repeat(100);
        let summary = summarize(&text, 20);
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= 20);
        assert!(!summary.contains("wo..."));
    }

    #[test]
    fn multibyte_content_does_not_split_chars() {
        let text = "ünïcödé ".repeat(40);
        let summary = summarize(&text, 15);
        assert!(summary.chars().count() <= 15);
    }

    #[test]
    fn compact_records_ratio() {
        let text = "Sentence one is here. ".repeat(50);
        let (summary, compaction) = compact(&text, 40);
        assert_eq!(compaction.original_bytes, text.len());
        assert_eq!(compaction.compacted_bytes, summary.len());
        assert!(compaction.compression_ratio > 1.0);
    }
}
