/// Shared types for the messaging core
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public profile of a user (read-only to this core)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A direct conversation between exactly two members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Bumped on every insert; sort fallback when the thread has no messages
    pub last_activity_at: DateTime<Utc>,
}

/// One row per (conversation, user)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMember {
    pub conversation_id: String,
    pub user_id: String,
    /// Read-state watermark: messages at or before this instant are seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

/// A message, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_profile: Option<Profile>,
}

/// Outgoing message before the remote insert confirms it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
}

/// Full conversation fetch response: the conversation row with its
/// members and message history joined in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation: Conversation,
    pub members: Vec<ConversationMember>,
    pub messages: Vec<Message>,
}

impl ConversationRecord {
    pub fn member(&self, user_id: &str) -> Option<&ConversationMember> {
        self.members.iter().find(|m| m.user_id == user_id)
    }
}

/// Summary of one conversation thread (for the inbox list view)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    /// The other participant; `None` when the row is degraded
    pub peer: Option<Profile>,
    /// Preview text of the last message (empty for a fresh thread)
    pub last_preview: String,
    /// Timestamp of the last message, if any
    pub last_timestamp: Option<DateTime<Utc>>,
    pub unread: bool,
    /// Member count was not exactly two; render a placeholder, not a thread
    pub invalid: bool,
}

/// Realtime insert notification. Payloads pushed by the change-feed may be
/// partial; `message_id` is always enough to re-fetch the full record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertEvent {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl InsertEvent {
    /// Fallback conversion when the full record cannot be re-fetched.
    /// A missing timestamp takes arrival time.
    pub fn into_message(self) -> Message {
        Message {
            id: self.message_id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            text: self.text.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            sender_profile: None,
        }
    }
}

/// Events broadcast to hosting UI clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessengerEvent {
    /// A message entered the open conversation's log (confirmed send or
    /// reconciled peer message)
    MessageAppended { message: Message },
    /// The inbox slot was reloaded
    DirectoryRefreshed,
    /// A conversation session reached the open state
    ConversationOpened { conversation_id: String },
    /// The open session was closed
    ConversationClosed { conversation_id: String },
    /// A dismissible failure notification
    Notice { text: String, retryable: bool },
}

/// Defensive accessor for joined profile relations. The backend has shipped
/// the relation as an object, a one-element array, and under both `profile`
/// and `profiles` keys; precedence is fixed here and nowhere else:
/// `profile`, then `profiles`, unwrapping a leading array, then the value
/// itself when it already looks like a profile row.
pub fn profile_from_relation(value: &serde_json::Value) -> Option<Profile> {
    if let Some(nested) = value.get("profile").or_else(|| value.get("profiles")) {
        return profile_from_relation(nested);
    }
    let candidate = match value.as_array() {
        Some(items) => items.first()?,
        None => value,
    };
    if candidate.get("id").is_some() && candidate.get("username").is_some() {
        serde_json::from_value(candidate.clone()).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_relation_object() {
        let row = json!({"user_id": "u1", "profile": {"id": "u1", "username": "kaz"}});
        let p = profile_from_relation(&row).unwrap();
        assert_eq!(p.username, "kaz");
    }

    #[test]
    fn test_profile_relation_array_under_plural_key() {
        let row = json!({"profiles": [{"id": "u2", "username": "mo", "avatar_url": "a.png"}]});
        let p = profile_from_relation(&row).unwrap();
        assert_eq!(p.id, "u2");
        assert_eq!(p.avatar_url.as_deref(), Some("a.png"));
    }

    #[test]
    fn test_profile_relation_bare_row() {
        let row = json!({"id": "u3", "username": "lena"});
        assert!(profile_from_relation(&row).is_some());
    }

    #[test]
    fn test_profile_relation_precedence_prefers_singular_key() {
        let row = json!({
            "profile": {"id": "a", "username": "first"},
            "profiles": {"id": "b", "username": "second"}
        });
        assert_eq!(profile_from_relation(&row).unwrap().id, "a");
    }

    #[test]
    fn test_profile_relation_rejects_garbage() {
        assert!(profile_from_relation(&json!({"user_id": "u1"})).is_none());
        assert!(profile_from_relation(&json!([])).is_none());
        assert!(profile_from_relation(&json!(null)).is_none());
    }
}
