//! Temporal relevance: recency decay blended with position in the flow.

use async_trait::async_trait;
use recollect_core::{ConversationBlock, EvaluationError};

use crate::context::EvaluationContext;
use crate::dimension::{Dimension, DimensionResult, DimensionScorer};
use crate::text;

const TEMPORAL_REFERENCES: &[&str] = &[
    "today", "tomorrow", "yesterday", "right now", "currently", "this week", "soon", "recently",
];

pub struct TemporalScorer {
    half_life_secs: f32,
}

impl TemporalScorer {
    pub fn new(half_life_secs: u64) -> Self {
        Self {
            half_life_secs: half_life_secs.max(1) as f32,
        }
    }
}

#[async_trait]
impl DimensionScorer for TemporalScorer {
    fn dimension(&self) -> Dimension {
        Dimension::TemporalRelevance
    }

    async fn score(
        &self,
        block: &ConversationBlock,
        context: &EvaluationContext,
    ) -> Result<DimensionResult, EvaluationError> {
        let age_secs = block.age(context.now).num_seconds().max(0) as f32;
        let decay = 0.5_f32.powf(age_secs / self.half_life_secs);
        let position = context.position(block.sequence_number);

        let mut score = 0.7 * decay + 0.3 * position;
        let lower = block.content.to_lowercase();
        if text::count_phrases(&lower, TEMPORAL_REFERENCES) > 0 {
            score = (score * 1.1).min(1.0);
        }

        Ok(DimensionResult::new(
            score,
            1.0,
            format!("decay {decay:.2} after {age_secs:.0}s, flow position {position:.2}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::test_helpers::block;
    use chrono::Duration;
    use recollect_core::{SessionId, Source};

    #[tokio::test]
    async fn fresh_newest_block_scores_high() {
        let b = block("the answer", Source::Agent);
        let ctx = EvaluationContext::empty(SessionId::from("s1"), b.timestamp);
        let r = TemporalScorer::new(3600).score(&b, &ctx).await.unwrap();
        assert!((r.score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn decays_with_half_life() {
        let b = block("the answer", Source::Agent);
        let mut ctx = EvaluationContext::empty(SessionId::from("s1"), b.timestamp + Duration::hours(1));
        ctx.first_sequence = 1;
        ctx.last_sequence = 11;
        let r = TemporalScorer::new(3600).score(&b, &ctx).await.unwrap();
        assert!((r.score - 0.35).abs() < 1e-4);
    }
}
