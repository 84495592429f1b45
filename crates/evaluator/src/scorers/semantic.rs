//! Semantic alignment: similarity to the session goal and recent turns.

use async_trait::async_trait;
use recollect_core::{ConversationBlock, EvaluationError};
use std::sync::Arc;

use crate::context::EvaluationContext;
use crate::dimension::{Dimension, DimensionResult, DimensionScorer};
use crate::similarity::SimilarityBackend;
use crate::text;

const PLEASANTRY_WORDS: &[&str] = &[
    "hello", "hi", "hey", "greetings", "welcome", "bye", "goodbye", "farewell", "thanks",
];
const PLEASANTRY_PHRASES: &[&str] = &["good morning", "see you", "take care", "thank you"];
const ERROR_WORDS: &[&str] = &["error", "mistake", "wrong", "incorrect", "sorry", "oops"];

/// How many of the most recent turns are compared against.
const RECENT_TURNS: usize = 3;

pub struct SemanticScorer {
    backend: Arc<dyn SimilarityBackend>,
}

impl SemanticScorer {
    pub fn new(backend: Arc<dyn SimilarityBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl DimensionScorer for SemanticScorer {
    fn dimension(&self) -> Dimension {
        Dimension::SemanticAlignment
    }

    async fn score(
        &self,
        block: &ConversationBlock,
        context: &EvaluationContext,
    ) -> Result<DimensionResult, EvaluationError> {
        let skip = context.recent.len().saturating_sub(RECENT_TURNS);
        let recent_text = context.recent[skip..]
            .iter()
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        if context.goal.is_none() && recent_text.trim().is_empty() {
            return Ok(DimensionResult::new(0.5, 0.3, "no goal or recent context to align with"));
        }

        let goal_sim = match &context.goal {
            Some(goal) => self.backend.similarity(&block.content, goal).await?,
            None => 0.0,
        };
        let recent_sim = if recent_text.trim().is_empty() {
            0.0
        } else {
            self.backend.similarity(&block.content, &recent_text).await?
        };
        let mut similarity = goal_sim.max(0.8 * recent_sim);

        let lower = block.content.to_lowercase();
        let mut notes = Vec::new();
        if text::has_any_word(&block.content, PLEASANTRY_WORDS)
            || text::count_phrases(&lower, PLEASANTRY_PHRASES) > 0
        {
            similarity *= 0.7;
            notes.push("conversational pleasantry");
        }
        if text::count_phrases(&lower, ERROR_WORDS) > 0 && similarity < 0.6 {
            similarity = 0.6;
            notes.push("error discussion");
        }

        let score = 0.2 + 0.8 * similarity;
        let certainty = if context.goal.is_some() { 0.9 } else { 0.6 };
        let mut reasoning = format!(
            "goal similarity {goal_sim:.2}, recent similarity {recent_sim:.2} via {}",
            self.backend.name()
        );
        if !notes.is_empty() {
            reasoning.push_str(&format!(" ({})", notes.join(", ")));
        }
        Ok(DimensionResult::new(score, certainty, reasoning))
    }
}
