//! Text similarity used for semantic alignment.
//!
//! The similarity source is the dependency most likely to be external
//! (an embedding service); it sits behind a trait so it can time out or fail
//! without taking the evaluator down.

use async_trait::async_trait;
use recollect_core::EvaluationError;

use crate::text;

/// Similarity between two texts in `[0, 1]`.
#[async_trait]
pub trait SimilarityBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn similarity(&self, a: &str, b: &str) -> Result<f32, EvaluationError>;
}

/// Keyword overlap coefficient: shared keywords over the smaller keyword set.
///
/// Unlike plain Jaccard this does not punish a long block for answering a
/// short goal.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordSimilarity;

#[async_trait]
impl SimilarityBackend for KeywordSimilarity {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn similarity(&self, a: &str, b: &str) -> Result<f32, EvaluationError> {
        let ka = text::keywords(a);
        let kb = text::keywords(b);
        let smaller = ka.len().min(kb.len());
        if smaller == 0 {
            return Ok(0.0);
        }
        let shared = ka.intersection(&kb).count();
        Ok(shared as f32 / smaller as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overlap_is_symmetric_and_bounded() {
        let sim = KeywordSimilarity;
        let a = "sorting vectors in rust";
        let b = "how to sort vectors quickly in rust code";
        let ab = sim.similarity(a, b).await.unwrap();
        let ba = sim.similarity(b, a).await.unwrap();
        assert_eq!(ab, ba);
        assert!(ab > 0.0 && ab <= 1.0);
    }

    #[tokio::test]
    async fn unrelated_texts_score_zero() {
        let sim = KeywordSimilarity;
        assert_eq!(sim.similarity("asdfghjkl qwerty", "plan a trip to lisbon").await.unwrap(), 0.0);
        assert_eq!(sim.similarity("", "anything").await.unwrap(), 0.0);
    }
}
