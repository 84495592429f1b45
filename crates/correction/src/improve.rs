//! Rewriting of blocks under review through a completion provider.

use recollect_core::{
    CompletionMessage, CompletionOptions, CompletionProvider, ConversationBlock, ProviderError,
};
use recollect_evaluator::{Dimension, EvaluationContext, EvaluationResult};
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You revise turns of an ongoing conversation. \
Rewrite the given turn so it fixes the stated weakness and keeps its original intent. \
Reply with the revised turn only.";

const CONTEXT_TURNS: usize = 3;
const CONTEXT_CHARS: usize = 100;

/// Asks a [`CompletionProvider`] for a better version of a weak block.
pub struct Improver {
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
    options: CompletionOptions,
}

impl Improver {
    pub fn new(provider: Arc<dyn CompletionProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            options: CompletionOptions {
                temperature: 0.7,
                max_tokens: Some(500),
            },
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Revised content, or `None` when the provider returned nothing new.
    pub async fn improve(
        &self,
        block: &ConversationBlock,
        context: &EvaluationContext,
        evaluation: &EvaluationResult,
    ) -> Result<Option<String>, ProviderError> {
        let messages = vec![
            CompletionMessage::system(SYSTEM_PROMPT),
            CompletionMessage::user(improvement_prompt(block, context, evaluation)),
        ];

        let revised = tokio::time::timeout(self.timeout, self.provider.complete(messages, self.options.clone()))
            .await
            .map_err(|_| ProviderError::Timeout(format!("no completion within {}ms", self.timeout.as_millis())))??;

        let revised = revised.trim();
        if revised.is_empty() || revised == block.content.trim() {
            return Ok(None);
        }
        Ok(Some(revised.to_string()))
    }
}

fn guidance(dimension: Dimension) -> &'static str {
    match dimension {
        Dimension::SemanticAlignment => "Stay on the topic the conversation is actually about.",
        Dimension::TemporalRelevance => "Drop or refresh time-sensitive statements that are out of date.",
        Dimension::GoalContribution => "Answer the user's actual question or move their goal forward.",
        Dimension::InformationQuality => "Be specific and complete; replace vague filler with concrete detail.",
        Dimension::FactualConsistency => "Resolve contradictions with what was established earlier.",
    }
}

/// The user prompt for one improvement attempt.
pub fn improvement_prompt(
    block: &ConversationBlock,
    context: &EvaluationContext,
    evaluation: &EvaluationResult,
) -> String {
    let skip = context.recent.len().saturating_sub(CONTEXT_TURNS);
    let recent: Vec<String> = context.recent[skip..]
        .iter()
        .map(|b| {
            let excerpt: String = b.content.chars().take(CONTEXT_CHARS).collect();
            format!("- {}: {excerpt}", b.source)
        })
        .collect();
    let recent = if recent.is_empty() {
        "(none)".to_string()
    } else {
        recent.join("\n")
    };

    let weakness = match evaluation.weakest_dimension() {
        Some(d) => format!(
            "Weakest dimension: {}\nWhat to change: {}",
            d.as_str().replace('_', " "),
            guidance(d)
        ),
        None => "What to change: improve overall quality.".to_string(),
    };

    format!(
        "Turn to revise ({source}):\n{content}\n\nPreceding turns:\n{recent}\n\n\
         Score: {score:.2}\n{weakness}\nAssessment: {reasoning}",
        source = block.source,
        content = block.content,
        score = evaluation.score,
        reasoning = evaluation.reasoning,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use recollect_core::{NewBlock, SessionId, Source};
    use recollect_evaluator::DimensionResult;
    use std::collections::BTreeMap;

    struct Echo(&'static str);

    #[async_trait]
    impl CompletionProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            _messages: Vec<CompletionMessage>,
            _options: CompletionOptions,
        ) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    struct Silent;

    #[async_trait]
    impl CompletionProvider for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn complete(
            &self,
            _messages: Vec<CompletionMessage>,
            _options: CompletionOptions,
        ) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(String::new())
        }
    }

    fn fixture() -> (ConversationBlock, EvaluationContext, EvaluationResult) {
        let block = ConversationBlock::from_new(
            NewBlock::new(SessionId::from("s1"), "um, maybe it works", Source::Agent),
            2,
            Utc::now(),
        );
        let context = EvaluationContext::empty(SessionId::from("s1"), Utc::now());
        let mut dimensions = BTreeMap::new();
        dimensions.insert(Dimension::GoalContribution, DimensionResult::new(0.7, 1.0, "ok"));
        dimensions.insert(Dimension::InformationQuality, DimensionResult::new(0.2, 1.0, "vague"));
        let evaluation = EvaluationResult {
            score: 0.5,
            confidence: 0.8,
            dimensions,
            failed: Vec::new(),
            degraded: false,
            reasoning: "vague answer".into(),
        };
        (block, context, evaluation)
    }

    #[test]
    fn prompt_names_weakest_dimension() {
        let (block, context, evaluation) = fixture();
        let prompt = improvement_prompt(&block, &context, &evaluation);
        assert!(prompt.contains("information quality"));
        assert!(prompt.contains("um, maybe it works"));
        assert!(prompt.contains("(none)"));
    }

    #[tokio::test]
    async fn returns_revised_content() {
        let (block, context, evaluation) = fixture();
        let improver = Improver::new(Arc::new(Echo("  It works once the cache is cleared.  ")), Duration::from_secs(1));
        let revised = improver.improve(&block, &context, &evaluation).await.unwrap();
        assert_eq!(revised.as_deref(), Some("It works once the cache is cleared."));
    }

    #[tokio::test]
    async fn unchanged_content_is_not_a_revision() {
        let (block, context, evaluation) = fixture();
        let improver = Improver::new(Arc::new(Echo("um, maybe it works")), Duration::from_secs(1));
        assert!(improver.improve(&block, &context, &evaluation).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let (block, context, evaluation) = fixture();
        let improver = Improver::new(Arc::new(Silent), Duration::from_millis(50));
        let err = improver.improve(&block, &context, &evaluation).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }
}
