use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::models::chat::Role;
use crate::services::llm_service::LlmService;
use crate::services::metrics_service::MetricsService;
use crate::services::session_service::SessionService;
use crate::utils::error::ApiError;

/// Returned in place of an error whenever message processing fails after
/// the session was found.
pub const APOLOGY_REPLY: &str = "I apologize, but I'm experiencing some technical \
    difficulties. Please try again in a moment.";

/// Composes the session store, provider selector, and metrics aggregator
/// for one inbound message.
pub struct ChatService {
    sessions: Arc<SessionService>,
    metrics: Arc<MetricsService>,
    llm: Arc<LlmService>,
}

impl ChatService {
    pub fn new(
        sessions: Arc<SessionService>,
        metrics: Arc<MetricsService>,
        llm: Arc<LlmService>,
    ) -> Self {
        Self {
            sessions,
            metrics,
            llm,
        }
    }

    /// Process one user message and return the reply text.
    ///
    /// An unknown session is the only error surfaced to the caller, and it
    /// carries no metrics side effect. Once the user message is in the
    /// context, any later failure degrades to the fixed apology reply with
    /// a `success=false` metrics record; a provider falling back to the
    /// mock still counts as success.
    pub async fn process_message(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<String, ApiError> {
        let started = Instant::now();

        if let Err(e) = self
            .sessions
            .append_message(session_id, Role::User, message)
            .await
        {
            if matches!(e, ApiError::NotFound(_)) {
                return Err(e);
            }
            error!("Failed to append user message: {}", e);
            self.record(started, false).await;
            return Ok(APOLOGY_REPLY.to_string());
        }

        match self.respond(session_id).await {
            Ok(reply) => {
                self.record(started, true).await;
                Ok(reply)
            }
            Err(e) => {
                error!("Message processing failed: {}", e);
                self.record(started, false).await;
                Ok(APOLOGY_REPLY.to_string())
            }
        }
    }

    /// Steps after the user message landed: generate, append, renew TTL.
    async fn respond(&self, session_id: &str) -> Result<String, ApiError> {
        let context = self.sessions.get_context(session_id).await?;
        debug!(
            "Generating reply for session {} ({} context messages)",
            session_id,
            context.len()
        );

        let reply = self.llm.generate_reply(&context).await;

        self.sessions
            .append_message(session_id, Role::Assistant, &reply)
            .await?;
        self.sessions.extend(session_id).await?;

        Ok(reply)
    }

    async fn record(&self, started: Instant, success: bool) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Err(e) = self.metrics.record_message(elapsed_ms, success).await {
            warn!("Failed to record message metrics: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm_service::{MockChatProvider, MockProvider, CANNED_REPLIES};
    use crate::store::{KvStore, MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        sessions: Arc<SessionService>,
        metrics: Arc<MetricsService>,
        chat: ChatService,
    }

    fn fixture_with(store: Arc<dyn KvStore>, llm: LlmService) -> Fixture {
        let sessions = Arc::new(SessionService::new(store.clone(), 3600));
        let metrics = Arc::new(MetricsService::new(store));
        let chat = ChatService::new(sessions.clone(), metrics.clone(), Arc::new(llm));
        Fixture {
            sessions,
            metrics,
            chat,
        }
    }

    fn mock_fixture() -> Fixture {
        fixture_with(
            Arc::new(MemoryStore::new()),
            LlmService::with_provider(Arc::new(MockProvider)),
        )
    }

    /// Delegates to a MemoryStore until armed, then fails every write.
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                failing: AtomicBool::new(false),
            }
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("connection reset".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }
        async fn set_ex(&self, key: &str, value: &str, ttl: u64) -> Result<(), StoreError> {
            self.check()?;
            self.inner.set_ex(key, value, ttl).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }
        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.exists(key).await
        }
        async fn incr(&self, key: &str) -> Result<i64, StoreError> {
            self.inner.incr(key).await
        }
        async fn decr(&self, key: &str) -> Result<i64, StoreError> {
            self.inner.decr(key).await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_round_trip_with_mock_provider() {
        let f = mock_fixture();
        let id = f.sessions.create().await.unwrap();

        let reply = f.chat.process_message(&id, "hello").await.unwrap();

        let greeting_replies = CANNED_REPLIES
            .iter()
            .find(|(keywords, _)| keywords.contains(&"hello"))
            .map(|(_, replies)| *replies)
            .unwrap();
        assert!(greeting_replies.contains(&reply.as_str()));

        // Context now holds the user turn and the assistant turn, in order.
        let session = f.sessions.get(&id).await.unwrap();
        assert_eq!(session.context.len(), 2);
        assert_eq!(session.context[0].role, Role::User);
        assert_eq!(session.context[0].content, "hello");
        assert_eq!(session.context[1].role, Role::Assistant);
        assert_eq!(session.context[1].content, reply);
        assert_eq!(session.message_count, 2);

        let snapshot = f.metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.total_messages, 1);
        assert_eq!(snapshot.error_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session_is_not_found_without_metrics() {
        let f = mock_fixture();

        let err = f
            .chat
            .process_message("no-such-session", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let snapshot = f.metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.total_messages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_degrades_to_mock_reply() {
        let mut timing_out = MockChatProvider::new();
        timing_out
            .expect_generate()
            .returning(|_| Err(ApiError::LlmError("request timed out".to_string())));

        let f = fixture_with(
            Arc::new(MemoryStore::new()),
            LlmService::with_provider(Arc::new(timing_out)),
        );
        let id = f.sessions.create().await.unwrap();

        let reply = f.chat.process_message(&id, "hello").await.unwrap();
        assert_ne!(reply, APOLOGY_REPLY);

        // Fallback to mock counts as a successful attempt.
        let snapshot = f.metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.total_messages, 1);
        assert_eq!(snapshot.error_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_mid_flight_yields_apology() {
        let store = Arc::new(FlakyStore::new());
        let f = fixture_with(
            store.clone(),
            LlmService::with_provider(Arc::new(MockProvider)),
        );
        let id = f.sessions.create().await.unwrap();

        // Session writes worked so far; now every record write fails, so
        // appending the user message blows up after the session was found.
        f.sessions
            .append_message(&id, Role::User, "warm-up")
            .await
            .unwrap();
        store.failing.store(true, Ordering::SeqCst);

        let reply = f.chat.process_message(&id, "hello").await.unwrap();
        assert_eq!(reply, APOLOGY_REPLY);

        let snapshot = f.metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.total_messages, 1);
        assert_eq!(snapshot.error_rate, 100.0);
    }
}
