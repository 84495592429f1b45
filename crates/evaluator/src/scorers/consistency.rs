//! Factual consistency: agreement with retained blocks on the same topic.

use async_trait::async_trait;
use recollect_core::{ConversationBlock, EvaluationError, Source};

use crate::context::EvaluationContext;
use crate::dimension::{Dimension, DimensionResult, DimensionScorer};
use crate::text;

const CONTRADICTION: &[&str] = &[
    "no, actually", "that's wrong", "that is wrong", "incorrect", "not true", "false", "mistake",
];
const CONFIDENT: &[&str] = &["definitely", "certainly", "absolutely", "clearly", "for sure"];
const UNCERTAIN: &[&str] = &[
    "maybe", "perhaps", "possibly", "might be", "could be", "not sure", "uncertain", "unclear",
];

/// Keyword overlap needed for two blocks to count as the same topic.
const TOPIC_OVERLAP: f32 = 0.2;

pub struct ConsistencyScorer;

fn same_topic(block: &ConversationBlock, others: &[ConversationBlock]) -> usize {
    let kw = text::keywords(&block.content);
    if kw.is_empty() {
        return 0;
    }
    others
        .iter()
        .filter(|other| {
            let okw = text::keywords(&other.content);
            let smaller = kw.len().min(okw.len());
            smaller > 0 && kw.intersection(&okw).count() as f32 / smaller as f32 >= TOPIC_OVERLAP
        })
        .count()
}

#[async_trait]
impl DimensionScorer for ConsistencyScorer {
    fn dimension(&self) -> Dimension {
        Dimension::FactualConsistency
    }

    async fn score(
        &self,
        block: &ConversationBlock,
        context: &EvaluationContext,
    ) -> Result<DimensionResult, EvaluationError> {
        let related = same_topic(block, &context.retained);
        if related == 0 {
            return Ok(DimensionResult::new(0.5, 0.4, "no retained blocks on the same topic"));
        }

        let lower = block.content.to_lowercase();
        if text::count_phrases(&lower, CONTRADICTION) > 0 {
            return Ok(match block.source {
                Source::Agent => DimensionResult::new(0.8, 0.7, "agent corrects an earlier statement"),
                _ => DimensionResult::new(0.4, 0.7, "disputes retained information"),
            });
        }

        let confident = text::count_phrases(&lower, CONFIDENT);
        let uncertain = text::count_phrases(&lower, UNCERTAIN);
        let (score, why) = if uncertain > confident {
            (0.7, "hedged against retained context")
        } else if confident > 0 {
            (0.95, "confidently agrees with retained context")
        } else {
            (0.85, "consistent with retained context")
        };
        Ok(DimensionResult::new(
            score,
            0.7,
            format!("{why} ({related} related blocks)"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::test_helpers::block;
    use chrono::Utc;
    use recollect_core::SessionId;

    #[tokio::test]
    async fn neutral_without_related_blocks() {
        let ctx = EvaluationContext::empty(SessionId::from("s1"), Utc::now());
        let r = ConsistencyScorer
            .score(&block("tokio runtime flavors", Source::Agent), &ctx)
            .await
            .unwrap();
        assert_eq!(r.score, 0.5);
    }

    #[tokio::test]
    async fn user_dispute_lowers_score() {
        let mut ctx = EvaluationContext::empty(SessionId::from("s1"), Utc::now());
        ctx.retained
            .push(block("The tokio runtime has a multi-thread flavor", Source::Agent));
        let dispute = block("That's wrong, the tokio runtime flavor is current-thread", Source::User);
        let r = ConsistencyScorer.score(&dispute, &ctx).await.unwrap();
        assert_eq!(r.score, 0.4);

        let agree = block("The tokio runtime multi-thread flavor is definitely the default", Source::Agent);
        let r = ConsistencyScorer.score(&agree, &ctx).await.unwrap();
        assert_eq!(r.score, 0.95);
    }
}
