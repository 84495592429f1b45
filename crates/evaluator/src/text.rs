//! Text heuristics shared by the dimension scorers.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "this",
    "that", "these", "those", "it", "its", "you", "your", "our", "not",
];

const QUESTION_WORDS: &[&str] = &["what", "where", "when", "why", "how", "who", "which"];
const MODALS: &[&str] = &["can", "could", "would", "should", "may", "might"];
const PRONOUNS: &[&str] = &["you", "i", "we"];

/// Lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Significant words: longer than two characters and not a stopword.
pub fn keywords(text: &str) -> BTreeSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| w.chars().count() > 2 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// How many of `phrases` occur in the lowercased `text`.
pub fn count_phrases(text_lower: &str, phrases: &[&str]) -> usize {
    phrases.iter().filter(|p| text_lower.contains(*p)).count()
}

/// Whether any token of `text` is one of `words`.
pub fn has_any_word(text: &str, words: &[&str]) -> bool {
    tokenize(text).iter().any(|t| words.contains(&t.as_str()))
}

/// A question mark, a leading question word, or a modal addressed to
/// someone ("could you", "should we").
pub fn is_question(text: &str) -> bool {
    if text.contains('?') {
        return true;
    }
    let tokens = tokenize(text);
    if tokens
        .first()
        .is_some_and(|t| QUESTION_WORDS.contains(&t.as_str()))
    {
        return true;
    }
    tokens
        .windows(2)
        .any(|w| MODALS.contains(&w[0].as_str()) && PRONOUNS.contains(&w[1].as_str()))
}

/// Whether an alphabetic token is plausibly a word rather than key mashing.
fn looks_like_word(word: &str) -> bool {
    if !word.chars().all(char::is_alphabetic) {
        return true;
    }
    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let total = word.chars().count();
    let vowels = word.chars().filter(|c| is_vowel(*c)).count();
    if total > 3 && (vowels as f32 / total as f32) < 0.2 {
        return false;
    }

    let mut run = 0;
    for c in word.chars() {
        if is_vowel(c) {
            run = 0;
        } else {
            run += 1;
            if run >= 5 {
                return false;
            }
        }
    }
    true
}

/// Fraction of tokens that look like real words, in `[0, 1]`.
pub fn lexical_signal(text: &str) -> f32 {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return 0.0;
    }
    let plausible = tokens.iter().filter(|t| looks_like_word(t)).count();
    plausible as f32 / tokens.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_drop_stopwords_and_short_words() {
        let kw = keywords("The borrow checker is in the compiler");
        assert!(kw.contains("borrow"));
        assert!(kw.contains("compiler"));
        assert!(!kw.contains("the"));
        assert!(!kw.contains("is"));
    }

    #[test]
    fn whole_word_matching() {
        assert!(has_any_word("Hey, there", &["hey"]));
        assert!(!has_any_word("they said so", &["hey"]));
    }

    #[test]
    fn question_detection() {
        assert!(is_question("Is this right?"));
        assert!(is_question("how do lifetimes work"));
        assert!(is_question("Could you explain traits"));
        assert!(!is_question("Traits describe shared behavior."));
    }

    #[test]
    fn key_mashing_has_low_signal() {
        assert!(lexical_signal("asdfghjkl qwerty") <= 0.5);
        assert_eq!(lexical_signal("Ownership moves values between bindings"), 1.0);
        assert_eq!(lexical_signal(""), 0.0);
    }
}
