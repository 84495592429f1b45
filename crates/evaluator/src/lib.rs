//! Relevance evaluation for Recollect.
//!
//! A block's relevance is the weighted combination of five dimension scores
//! (semantic alignment, temporal relevance, goal contribution, information
//! quality and factual consistency), computed concurrently against an
//! [`EvaluationContext`] assembled from the store.

pub mod composite;
pub mod context;
pub mod dimension;
pub mod scorers;
pub mod similarity;
pub mod text;

pub use composite::{CompositeEvaluator, EvaluationResult, RelevanceEvaluator};
pub use context::{ContextBuilder, EvaluationContext};
pub use dimension::{Dimension, DimensionResult, DimensionScorer};
pub use scorers::{ConsistencyScorer, GoalScorer, QualityScorer, SemanticScorer, TemporalScorer};
pub use similarity::{KeywordSimilarity, SimilarityBackend};
