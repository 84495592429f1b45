//! Conversational context handed to every dimension scorer.

use chrono::{DateTime, Utc};
use recollect_core::{
    BlockFilter, BlockStore, ConversationBlock, ProcessingStatus, SessionId, SessionRegistry, Source,
    StoreError,
};
use std::sync::Arc;

/// Everything a scorer may look at besides the block itself.
///
/// Scorers must only read the clock through `now` so that identical
/// block, context and weights always give the same score.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub session_id: SessionId,
    /// Stated session goal, or the most recent user turn when none is set.
    pub goal: Option<String>,
    /// Blocks immediately preceding the evaluated one, oldest first.
    pub recent: Vec<ConversationBlock>,
    /// Other RETAINED blocks of the session.
    pub retained: Vec<ConversationBlock>,
    /// Sequence range of the session's live blocks.
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub now: DateTime<Utc>,
}

impl EvaluationContext {
    /// A context with no surrounding conversation.
    pub fn empty(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            goal: None,
            recent: Vec::new(),
            retained: Vec::new(),
            first_sequence: 0,
            last_sequence: 0,
            now,
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    /// Relative position of a block in the session, 0 oldest and 1 newest.
    pub fn position(&self, sequence_number: u64) -> f32 {
        if self.last_sequence <= self.first_sequence {
            return 1.0;
        }
        let span = (self.last_sequence - self.first_sequence) as f32;
        let offset = sequence_number.saturating_sub(self.first_sequence) as f32;
        (offset / span).clamp(0.0, 1.0)
    }
}

/// Assembles [`EvaluationContext`]s from the store and session registry.
pub struct ContextBuilder {
    store: Arc<dyn BlockStore>,
    sessions: Arc<SessionRegistry>,
    window: usize,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn BlockStore>, sessions: Arc<SessionRegistry>, window: usize) -> Self {
        Self {
            store,
            sessions,
            window,
        }
    }

    pub async fn build(
        &self,
        block: &ConversationBlock,
        now: DateTime<Utc>,
    ) -> Result<EvaluationContext, StoreError> {
        let session = self
            .store
            .list(&BlockFilter::session(block.session_id.clone()))
            .await?;

        let preceding: Vec<&ConversationBlock> = session
            .iter()
            .filter(|b| b.sequence_number < block.sequence_number)
            .collect();
        let skip = preceding.len().saturating_sub(self.window);
        let recent: Vec<ConversationBlock> = preceding[skip..].iter().map(|b| (*b).clone()).collect();

        let retained = session
            .iter()
            .filter(|b| {
                b.block_id != block.block_id && b.processing_status == ProcessingStatus::Retained
            })
            .cloned()
            .collect();

        let goal = match self
            .sessions
            .goal(&block.session_id)
            .await
            .filter(|goal| !goal.trim().is_empty())
        {
            Some(goal) => Some(goal),
            None => session
                .iter()
                .rev()
                .find(|b| {
                    b.source == Source::User && b.block_id != block.block_id && !b.content.trim().is_empty()
                })
                .map(|b| b.content.clone()),
        };

        let first_sequence = session
            .first()
            .map_or(block.sequence_number, |b| b.sequence_number.min(block.sequence_number));
        let last_sequence = session
            .last()
            .map_or(block.sequence_number, |b| b.sequence_number.max(block.sequence_number));

        Ok(EvaluationContext {
            session_id: block.session_id.clone(),
            goal,
            recent,
            retained,
            first_sequence,
            last_sequence,
            now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_core::{EventBus, NewBlock};
    use recollect_memory::InMemoryBlockStore;

    #[test]
    fn position_spans_session() {
        let mut ctx = EvaluationContext::empty(SessionId::from("s"), Utc::now());
        assert_eq!(ctx.position(7), 1.0);
        ctx.first_sequence = 10;
        ctx.last_sequence = 20;
        assert_eq!(ctx.position(10), 0.0);
        assert_eq!(ctx.position(15), 0.5);
        assert_eq!(ctx.position(20), 1.0);
    }

    #[tokio::test]
    async fn builder_uses_window_and_goal_fallback() {
        let store: Arc<dyn BlockStore> = Arc::new(InMemoryBlockStore::new(EventBus::default()));
        let sessions = Arc::new(SessionRegistry::new());
        let s = SessionId::from("s1");

        let mut ids = Vec::new();
        for (content, source) in [
            ("hi", Source::User),
            ("hello", Source::Agent),
            ("how do I sort a vec", Source::User),
            ("use sort_unstable", Source::Agent),
        ] {
            ids.push(store.create(NewBlock::new(s.clone(), content, source)).await.unwrap());
        }
        let last = store.get(&ids[3]).await.unwrap();

        let builder = ContextBuilder::new(store.clone(), sessions.clone(), 2);
        let ctx = builder.build(&last, Utc::now()).await.unwrap();
        assert_eq!(ctx.recent.len(), 2);
        assert_eq!(ctx.recent[0].content, "hello");
        assert_eq!(ctx.goal.as_deref(), Some("how do I sort a vec"));
        assert_eq!(ctx.position(last.sequence_number), 1.0);

        sessions.set_goal(&s, "learn rust collections").await;
        let ctx = builder.build(&last, Utc::now()).await.unwrap();
        assert_eq!(ctx.goal.as_deref(), Some("learn rust collections"));
    }

    #[tokio::test]
    async fn blank_session_goal_falls_back_to_latest_user_turn() {
        let store: Arc<dyn BlockStore> = Arc::new(InMemoryBlockStore::new(EventBus::default()));
        let sessions = Arc::new(SessionRegistry::new());
        let s = SessionId::from("s1");
        store
            .create(NewBlock::new(s.clone(), "why is the build slow", Source::User))
            .await
            .unwrap();
        let answer = store
            .create(NewBlock::new(s.clone(), "link time dominates", Source::Agent))
            .await
            .unwrap();
        let answer = store.get(&answer).await.unwrap();

        sessions.set_goal(&s, "  ").await;
        let ctx = ContextBuilder::new(store, sessions, 5)
            .build(&answer, Utc::now())
            .await
            .unwrap();
        assert_eq!(ctx.goal.as_deref(), Some("why is the build slow"));
    }
}
