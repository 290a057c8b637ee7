use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::models::chat::{ChatMessage, Role};
use crate::store::KvStore;
use crate::utils::error::ApiError;

/// Hard cap on retained context entries; oldest are evicted first.
pub const MAX_CONTEXT_MESSAGES: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted session record, serialized as JSON under `session:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Counts every appended message, unaffected by context truncation.
    pub message_count: u64,
    pub context: Vec<ContextMessage>,
}

/// Owns session records and their expiry contract. Callers never touch the
/// underlying store keys directly.
///
/// Every operation is a non-atomic read-modify-write against a single key:
/// two concurrent appends to the same session can lose one update
/// (last-write-wins). Accepted limitation for this service's traffic shape.
pub struct SessionService {
    store: Arc<dyn KvStore>,
    ttl_seconds: u64,
}

impl SessionService {
    pub fn new(store: Arc<dyn KvStore>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    fn key(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    /// Re-persist a record with the full TTL. Every mutation resets, not
    /// extends, the expiry clock.
    async fn persist(&self, session: &Session) -> Result<(), ApiError> {
        let payload = serde_json::to_string(session)
            .map_err(|e| ApiError::InternalError(format!("failed to serialize session: {e}")))?;
        self.store
            .set_ex(&Self::key(&session.id), &payload, self.ttl_seconds)
            .await?;
        Ok(())
    }

    /// Create a new session with an empty context.
    pub async fn create(&self) -> Result<String, ApiError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            last_activity: now,
            message_count: 0,
            context: Vec::new(),
        };

        self.persist(&session).await?;
        debug!("Created session {}", session.id);
        Ok(session.id)
    }

    pub async fn exists(&self, session_id: &str) -> Result<bool, ApiError> {
        Ok(self.store.exists(&Self::key(session_id)).await?)
    }

    pub async fn get(&self, session_id: &str) -> Result<Session, ApiError> {
        let raw = self
            .store
            .get(&Self::key(session_id))
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Session {session_id} not found")))?;

        serde_json::from_str(&raw)
            .map_err(|e| ApiError::InternalError(format!("corrupt session record: {e}")))
    }

    /// Append one message, bump `message_count`, truncate the context to the
    /// most recent [`MAX_CONTEXT_MESSAGES`] entries, and renew the TTL.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), ApiError> {
        let mut session = self.get(session_id).await?;

        session.context.push(ContextMessage {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        session.message_count += 1;

        if session.context.len() > MAX_CONTEXT_MESSAGES {
            let excess = session.context.len() - MAX_CONTEXT_MESSAGES;
            session.context.drain(..excess);
        }

        session.last_activity = Utc::now();
        self.persist(&session).await
    }

    /// Conversation context in insertion order. An absent session yields an
    /// empty context rather than an error.
    pub async fn get_context(&self, session_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        match self.get(session_id).await {
            Ok(session) => Ok(session
                .context
                .into_iter()
                .map(|m| ChatMessage {
                    role: m.role,
                    content: m.content,
                })
                .collect()),
            Err(ApiError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Returns true if a record existed and was removed.
    pub async fn delete(&self, session_id: &str) -> Result<bool, ApiError> {
        let deleted = self.store.delete(&Self::key(session_id)).await?;
        if deleted {
            debug!("Deleted session {}", session_id);
        }
        Ok(deleted)
    }

    /// Renew the TTL without changing the record. False if absent.
    pub async fn extend(&self, session_id: &str) -> Result<bool, ApiError> {
        match self.get(session_id).await {
            Ok(session) => {
                self.persist(&session).await?;
                Ok(true)
            }
            Err(ApiError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
