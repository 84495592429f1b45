//! Information quality: completeness and coherence of the content itself.

use async_trait::async_trait;
use recollect_core::{ConversationBlock, EvaluationError};

use crate::context::EvaluationContext;
use crate::dimension::{Dimension, DimensionResult, DimensionScorer};
use crate::text;

const FILLER: &[&str] = &[
    "i see", "okay", "alright", "sure", "got it", "understood", "makes sense", "yeah",
];

const SUBSTANCE: &[&str] = &[
    "because", "therefore", "however", "although", "despite", "specifically", "particularly",
    "for example", "such as", "including", "first", "second", "finally", "step",
];

const TECHNICAL: &[&str] = &["```", "fn ", "def ", "class ", "function", "import ", "return "];

pub struct QualityScorer;

fn length_score(words: usize) -> f32 {
    match words {
        0..3 => 0.2,
        3..10 => 0.5,
        10..50 => 0.8,
        50..200 => 1.0,
        200..500 => 0.8,
        _ => 0.6,
    }
}

#[async_trait]
impl DimensionScorer for QualityScorer {
    fn dimension(&self) -> Dimension {
        Dimension::InformationQuality
    }

    async fn score(
        &self,
        block: &ConversationBlock,
        _context: &EvaluationContext,
    ) -> Result<DimensionResult, EvaluationError> {
        let content = &block.content;
        let lower = content.to_lowercase();
        let words = content.split_whitespace().count();

        let length = length_score(words);
        let substance = (text::count_phrases(&lower, SUBSTANCE) as f32 / 3.0).min(1.0);
        let technical = if text::count_phrases(content, TECHNICAL) > 0 { 1.0 } else { 0.0 };
        let filler = match text::count_phrases(&lower, FILLER) {
            0 => 0.0,
            1 | 2 => 0.1,
            _ => 0.3,
        };
        let signal = text::lexical_signal(content);

        let raw = 0.5 * length + 0.3 * substance + 0.2 * technical - filler;
        let score = raw.max(0.0) * signal;
        Ok(DimensionResult::new(
            score,
            1.0,
            format!(
                "{words} words, substance {substance:.2}, filler -{filler:.1}, lexical signal {signal:.2}"
            ),
        ))
    }
}
