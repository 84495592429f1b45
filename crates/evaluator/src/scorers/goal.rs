//! Goal contribution: does the block move the conversation forward?

use async_trait::async_trait;
use recollect_core::{ConversationBlock, EvaluationError, Source};

use crate::context::EvaluationContext;
use crate::dimension::{Dimension, DimensionResult, DimensionScorer};
use crate::text;

const TASK_WORDS: &[&str] = &[
    "need", "want", "help", "please", "should", "must", "have to", "try", "let's", "will", "plan",
    "step",
];

pub struct GoalScorer;

impl GoalScorer {
    fn mentions_goal(content_lower: &str, goal: &str) -> bool {
        let goal_lower = goal.trim().to_lowercase();
        if goal_lower.is_empty() {
            return false;
        }
        if content_lower.contains(&goal_lower) {
            return true;
        }
        let goal_kw = text::keywords(goal);
        if goal_kw.is_empty() {
            return false;
        }
        let content_kw = text::keywords(content_lower);
        let shared = goal_kw.intersection(&content_kw).count();
        shared * 2 >= goal_kw.len()
    }
}

#[async_trait]
impl DimensionScorer for GoalScorer {
    fn dimension(&self) -> Dimension {
        Dimension::GoalContribution
    }

    async fn score(
        &self,
        block: &ConversationBlock,
        context: &EvaluationContext,
    ) -> Result<DimensionResult, EvaluationError> {
        let goal = context.goal.as_deref().filter(|g| !g.trim().is_empty());
        let certainty = if goal.is_some() { 0.8 } else { 0.6 };
        let lower = block.content.to_lowercase();

        if text::is_question(&block.content) {
            return Ok(DimensionResult::new(0.9, certainty, "question drives the conversation"));
        }

        let follows_question = context
            .recent
            .last()
            .is_some_and(|prev| text::is_question(&prev.content));
        if follows_question && matches!(block.source, Source::Agent | Source::Tool) {
            return Ok(DimensionResult::new(0.95, certainty, "answers the preceding question"));
        }

        if let Some(goal) = goal {
            if Self::mentions_goal(&lower, goal) {
                return Ok(DimensionResult::new(0.85, certainty, "addresses the session goal"));
            }
        }

        let task = (text::count_phrases(&lower, TASK_WORDS) as f32 / 3.0).min(1.0);
        Ok(DimensionResult::new(
            0.3 + 0.5 * task,
            certainty,
            format!("task-oriented language {task:.2}"),
        ))
    }
}
