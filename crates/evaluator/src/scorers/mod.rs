//! The five built-in dimension scorers.
//!
//! Each scorer is a heuristic that reads only the block and its
//! [`EvaluationContext`](crate::EvaluationContext). Only semantic alignment
//! calls out to a collaborator (the [`SimilarityBackend`](crate::SimilarityBackend)).

pub mod consistency;
pub mod goal;
pub mod quality;
pub mod semantic;
pub mod temporal;

pub use consistency::ConsistencyScorer;
pub use goal::GoalScorer;
pub use quality::QualityScorer;
pub use semantic::SemanticScorer;
pub use temporal::TemporalScorer;

#[cfg(test)]
pub(crate) mod test_helpers {
    use chrono::Utc;
    use recollect_core::{ConversationBlock, NewBlock, SessionId, Source};

    pub fn block(content: &str, source: Source) -> ConversationBlock {
        let new = NewBlock::new(SessionId::from("s1"), content, source);
        ConversationBlock::from_new(new, 1, Utc::now())
    }
}
