/// Remote data service contracts consumed by the messaging core.
/// Transport is an implementation detail; the trait preserves the calls the
/// core depends on. See `rest_service` for the HTTP + websocket client and
/// `memory_service` for the in-process variant.
use crate::error::Result;
use crate::messenger_types::{ConversationRecord, InsertEvent, Message, MessageDraft, Profile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Live feed of message-insert events for one conversation. Dropping the
/// receiver releases the underlying channel.
pub struct InsertFeed {
    pub conversation_id: String,
    pub events: mpsc::UnboundedReceiver<InsertEvent>,
}

#[async_trait]
pub trait DataService: Send + Sync {
    /// Idempotent, race-safe create-or-get for the unordered user pair.
    /// The response shape varies (bare id or wrapper object); callers
    /// normalize it through `dedup::normalize_conversation_id`.
    async fn create_or_get_direct_conversation(
        &self,
        self_id: &str,
        other_id: &str,
    ) -> Result<serde_json::Value>;

    /// All conversations where the user is a member, members and messages
    /// joined in.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>>;

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<ConversationRecord>;

    /// Re-fetch one message with its sender profile joined (used when a
    /// realtime payload arrives partial).
    async fn fetch_message(&self, conversation_id: &str, message_id: &str) -> Result<Message>;

    /// Insert a message and return the created record, sender profile
    /// joined. Never retried internally: a duplicate insert is worse than a
    /// surfaced failure.
    async fn insert_message(&self, draft: &MessageDraft) -> Result<Message>;

    /// Last-write-wins watermark update for one member row.
    async fn update_member_read_state(
        &self,
        conversation_id: &str,
        user_id: &str,
        last_read_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Subscribe to message inserts scoped to one conversation.
    async fn subscribe_message_inserts(&self, conversation_id: &str) -> Result<InsertFeed>;

    /// Ids the user follows.
    async fn list_following(&self, user_id: &str) -> Result<Vec<String>>;

    /// Ids following the user.
    async fn list_followers(&self, user_id: &str) -> Result<Vec<String>>;

    /// Profiles for the given ids; unknown ids are skipped.
    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>>;
}
