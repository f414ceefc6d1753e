/// In-memory data service, used by the integration tests and for local
/// development without a backend. The single write lock stands in for the
/// server-side transactional create-or-get primitive.
use crate::data_service::{DataService, InsertFeed};
use crate::error::{ChatError, Result};
use crate::messenger_types::{
    Conversation, ConversationMember, ConversationRecord, InsertEvent, Message, MessageDraft,
    Profile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    profiles: HashMap<String, Profile>,
    /// (follower_id, following_id)
    follows: Vec<(String, String)>,
    conversations: HashMap<String, Conversation>,
    members: Vec<ConversationMember>,
    messages: Vec<Message>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<InsertEvent>>>,
}

/// Fault-injection switches for exercising the failure paths.
#[derive(Debug, Default)]
struct Faults {
    fail_next_insert: bool,
    fail_message_fetch: bool,
    wrap_dedup_response: bool,
    partial_events: bool,
    /// Hold every insert for this long before it lands
    insert_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryDataService {
    state: RwLock<MemoryState>,
    faults: RwLock<Faults>,
}

impl MemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_profile(&self, profile: Profile) {
        self.state
            .write()
            .await
            .profiles
            .insert(profile.id.clone(), profile);
    }

    pub async fn follow(&self, follower_id: &str, following_id: &str) {
        let edge = (follower_id.to_string(), following_id.to_string());
        let mut state = self.state.write().await;
        if !state.follows.contains(&edge) {
            state.follows.push(edge);
        }
    }

    /// Seed a conversation with an arbitrary member set, bypassing the
    /// create-or-get pair constraint. Lets tests stage corrupted rows.
    pub async fn add_conversation(&self, conversation_id: &str, member_ids: &[&str]) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        state.conversations.insert(
            conversation_id.to_string(),
            Conversation {
                id: conversation_id.to_string(),
                last_activity_at: now,
            },
        );
        for user_id in member_ids {
            state.members.push(ConversationMember {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
                last_read_at: None,
                joined_at: now,
                profile: None,
            });
        }
    }

    /// Insert a message with an explicit timestamp (history seeding).
    pub async fn insert_message_at(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Message {
        let mut state = self.state.write().await;
        let partial = self.faults.read().await.partial_events;
        insert_row(&mut state, conversation_id, sender_id, text, created_at, partial)
    }

    /// Re-deliver the insert event for an existing message, as a reconnect
    /// replay would.
    pub async fn replay_insert_event(&self, message: &Message) {
        let mut state = self.state.write().await;
        let partial = self.faults.read().await.partial_events;
        notify(&mut state, message, partial);
    }

    pub async fn conversation_count(&self) -> usize {
        self.state.read().await.conversations.len()
    }

    pub async fn subscriber_count(&self, conversation_id: &str) -> usize {
        let mut state = self.state.write().await;
        match state.subscribers.get_mut(conversation_id) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    pub async fn last_read_at(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .await
            .members
            .iter()
            .find(|m| m.conversation_id == conversation_id && m.user_id == user_id)
            .and_then(|m| m.last_read_at)
    }

    pub async fn set_fail_next_insert(&self, on: bool) {
        self.faults.write().await.fail_next_insert = on;
    }

    pub async fn set_fail_message_fetch(&self, on: bool) {
        self.faults.write().await.fail_message_fetch = on;
    }

    pub async fn set_wrap_dedup_response(&self, on: bool) {
        self.faults.write().await.wrap_dedup_response = on;
    }

    pub async fn set_partial_events(&self, on: bool) {
        self.faults.write().await.partial_events = on;
    }

    pub async fn set_insert_delay(&self, delay: Option<Duration>) {
        self.faults.write().await.insert_delay = delay;
    }
}

fn find_direct(state: &MemoryState, a: &str, b: &str) -> Option<String> {
    for conversation_id in state.conversations.keys() {
        let member_ids: Vec<&str> = state
            .members
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .map(|m| m.user_id.as_str())
            .collect();
        if member_ids.len() == 2 && member_ids.contains(&a) && member_ids.contains(&b) {
            return Some(conversation_id.clone());
        }
    }
    None
}

fn joined(state: &MemoryState, mut message: Message) -> Message {
    message.sender_profile = state.profiles.get(&message.sender_id).cloned();
    message
}

fn insert_row(
    state: &mut MemoryState,
    conversation_id: &str,
    sender_id: &str,
    text: &str,
    created_at: DateTime<Utc>,
    partial_event: bool,
) -> Message {
    let message = Message {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        text: text.to_string(),
        created_at,
        sender_profile: state.profiles.get(sender_id).cloned(),
    };
    state.messages.push(message.clone());
    if let Some(conversation) = state.conversations.get_mut(conversation_id) {
        if created_at > conversation.last_activity_at {
            conversation.last_activity_at = created_at;
        }
    }
    notify(state, &message, partial_event);
    message
}

fn notify(state: &mut MemoryState, message: &Message, partial: bool) {
    let event = InsertEvent {
        message_id: message.id.clone(),
        conversation_id: message.conversation_id.clone(),
        sender_id: message.sender_id.clone(),
        text: if partial {
            None
        } else {
            Some(message.text.clone())
        },
        created_at: if partial {
            None
        } else {
            Some(message.created_at)
        },
    };
    if let Some(senders) = state.subscribers.get_mut(&message.conversation_id) {
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn record(state: &MemoryState, conversation: &Conversation) -> ConversationRecord {
    let members = state
        .members
        .iter()
        .filter(|m| m.conversation_id == conversation.id)
        .map(|m| {
            let mut member = m.clone();
            member.profile = state.profiles.get(&m.user_id).cloned();
            member
        })
        .collect();
    let mut messages: Vec<Message> = state
        .messages
        .iter()
        .filter(|m| m.conversation_id == conversation.id)
        .map(|m| joined(state, m.clone()))
        .collect();
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    ConversationRecord {
        conversation: conversation.clone(),
        members,
        messages,
    }
}

#[async_trait]
impl DataService for MemoryDataService {
    async fn create_or_get_direct_conversation(
        &self,
        self_id: &str,
        other_id: &str,
    ) -> Result<serde_json::Value> {
        if self_id == other_id {
            return Err(ChatError::Dedup(
                "refusing a self-conversation".to_string(),
            ));
        }
        // One guard across lookup and creation: concurrent callers for the
        // same pair serialize here and both observe the first row.
        let mut state = self.state.write().await;
        let conversation_id = match find_direct(&state, self_id, other_id) {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                let now = Utc::now();
                state.conversations.insert(
                    id.clone(),
                    Conversation {
                        id: id.clone(),
                        last_activity_at: now,
                    },
                );
                for user_id in [self_id, other_id] {
                    state.members.push(ConversationMember {
                        conversation_id: id.clone(),
                        user_id: user_id.to_string(),
                        last_read_at: None,
                        joined_at: now,
                        profile: None,
                    });
                }
                id
            }
        };

        if self.faults.read().await.wrap_dedup_response {
            Ok(serde_json::json!({ "conversation_id": conversation_id }))
        } else {
            Ok(serde_json::json!(conversation_id))
        }
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>> {
        let state = self.state.read().await;
        let mut records = Vec::new();
        for conversation in state.conversations.values() {
            let is_member = state
                .members
                .iter()
                .any(|m| m.conversation_id == conversation.id && m.user_id == user_id);
            if is_member {
                records.push(record(&state, conversation));
            }
        }
        Ok(records)
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<ConversationRecord> {
        let state = self.state.read().await;
        let conversation = state
            .conversations
            .get(conversation_id)
            .ok_or_else(|| ChatError::Load(format!("conversation {} not found", conversation_id)))?;
        Ok(record(&state, conversation))
    }

    async fn fetch_message(&self, conversation_id: &str, message_id: &str) -> Result<Message> {
        if self.faults.read().await.fail_message_fetch {
            return Err(ChatError::Transport(
                "injected message fetch failure".to_string(),
            ));
        }
        let state = self.state.read().await;
        state
            .messages
            .iter()
            .find(|m| m.conversation_id == conversation_id && m.id == message_id)
            .map(|m| joined(&state, m.clone()))
            .ok_or_else(|| ChatError::Load(format!("message {} not found", message_id)))
    }

    async fn insert_message(&self, draft: &MessageDraft) -> Result<Message> {
        {
            let mut faults = self.faults.write().await;
            if faults.fail_next_insert {
                faults.fail_next_insert = false;
                return Err(ChatError::Transport("injected insert failure".to_string()));
            }
        }
        let delay = self.faults.read().await.insert_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let partial = self.faults.read().await.partial_events;
        let mut state = self.state.write().await;
        if !state.conversations.contains_key(&draft.conversation_id) {
            return Err(ChatError::Load(format!(
                "conversation {} not found",
                draft.conversation_id
            )));
        }
        Ok(insert_row(
            &mut state,
            &draft.conversation_id,
            &draft.sender_id,
            &draft.text,
            Utc::now(),
            partial,
        ))
    }

    async fn update_member_read_state(
        &self,
        conversation_id: &str,
        user_id: &str,
        last_read_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let member = state
            .members
            .iter_mut()
            .find(|m| m.conversation_id == conversation_id && m.user_id == user_id)
            .ok_or_else(|| {
                ChatError::Load(format!(
                    "no member row for {} in {}",
                    user_id, conversation_id
                ))
            })?;
        member.last_read_at = Some(last_read_at);
        Ok(())
    }

    async fn subscribe_message_inserts(&self, conversation_id: &str) -> Result<InsertFeed> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .write()
            .await
            .subscribers
            .entry(conversation_id.to_string())
            .or_default()
            .push(tx);
        Ok(InsertFeed {
            conversation_id: conversation_id.to_string(),
            events: rx,
        })
    }

    async fn list_following(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .await
            .follows
            .iter()
            .filter(|(follower, _)| follower == user_id)
            .map(|(_, following)| following.clone())
            .collect())
    }

    async fn list_followers(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .await
            .follows
            .iter()
            .filter(|(_, following)| following == user_id)
            .map(|(follower, _)| follower.clone())
            .collect())
    }

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>> {
        let state = self.state.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| state.profiles.get(id).cloned())
            .collect())
    }
}
