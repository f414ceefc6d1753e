/// Conversation directory: the inbox list with previews and unread flags
use crate::data_service::DataService;
use crate::error::{ChatError, Result};
use crate::messenger_types::{ConversationRecord, ConversationSummary, MessengerEvent};
use crate::read_state;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

/// Load every conversation the user is a member of, most recent first.
/// Sort key is the latest message time, falling back to the conversation's
/// own activity timestamp for threads with no messages yet.
pub async fn load_inbox(
    svc: &dyn DataService,
    self_id: &str,
) -> Result<Vec<ConversationSummary>> {
    let records = svc
        .list_conversations(self_id)
        .await
        .map_err(|e| ChatError::Load(format!("inbox: {}", e)))?;

    let mut entries: Vec<(DateTime<Utc>, ConversationSummary)> = records
        .iter()
        .map(|record| summarize(record, self_id))
        .collect();
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(entries.into_iter().map(|(_, summary)| summary).collect())
}

/// Build one inbox entry. A member count other than two (a partially-failed
/// creation) yields a degraded placeholder row instead of dropping or
/// failing the whole inbox.
pub(crate) fn summarize(
    record: &ConversationRecord,
    self_id: &str,
) -> (DateTime<Utc>, ConversationSummary) {
    let last = record.messages.iter().max_by_key(|m| m.created_at);
    let sort_key = last
        .map(|m| m.created_at)
        .unwrap_or(record.conversation.last_activity_at);

    let peer = if record.members.len() == 2 {
        record
            .members
            .iter()
            .find(|m| m.user_id != self_id)
            .map(|m| m.profile.clone())
    } else {
        None
    };

    let Some(peer) = peer else {
        warn!(
            "conversation {} has {} members, rendering degraded entry",
            record.conversation.id,
            record.members.len()
        );
        let summary = ConversationSummary {
            conversation_id: record.conversation.id.clone(),
            peer: None,
            last_preview: String::new(),
            last_timestamp: last.map(|m| m.created_at),
            unread: false,
            invalid: true,
        };
        return (sort_key, summary);
    };

    let watermark = record.member(self_id).and_then(|m| m.last_read_at);
    let summary = ConversationSummary {
        conversation_id: record.conversation.id.clone(),
        peer,
        last_preview: last.map(|m| m.text.clone()).unwrap_or_default(),
        last_timestamp: last.map(|m| m.created_at),
        unread: read_state::is_unread(&record.messages, self_id, watermark),
        invalid: false,
    };
    (sort_key, summary)
}

/// Reload the shared inbox slot and announce the refresh. A failed reload
/// logs and keeps the previous state (empty on first load); the inbox never
/// raises to its caller.
pub(crate) async fn refresh(
    svc: &dyn DataService,
    self_id: &str,
    slot: &RwLock<Vec<ConversationSummary>>,
    events: &broadcast::Sender<MessengerEvent>,
) {
    match load_inbox(svc, self_id).await {
        Ok(list) => {
            *slot.write().await = list;
            let _ = events.send(MessengerEvent::DirectoryRefreshed);
        }
        Err(e) => {
            warn!("inbox refresh failed, keeping previous state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger_types::{Conversation, ConversationMember, Message, Profile};
    use chrono::Duration;

    fn record(self_id: &str, peer_id: &str) -> ConversationRecord {
        let now = Utc::now();
        ConversationRecord {
            conversation: Conversation {
                id: "c1".to_string(),
                last_activity_at: now,
            },
            members: vec![
                ConversationMember {
                    conversation_id: "c1".to_string(),
                    user_id: self_id.to_string(),
                    last_read_at: Some(now - Duration::hours(1)),
                    joined_at: now - Duration::days(1),
                    profile: None,
                },
                ConversationMember {
                    conversation_id: "c1".to_string(),
                    user_id: peer_id.to_string(),
                    last_read_at: None,
                    joined_at: now - Duration::days(1),
                    profile: Some(Profile {
                        id: peer_id.to_string(),
                        username: "peer".to_string(),
                        avatar_url: None,
                    }),
                },
            ],
            messages: Vec::new(),
        }
    }

    #[test]
    fn test_summarize_fresh_thread() {
        let rec = record("a", "b");
        let (sort_key, summary) = summarize(&rec, "a");
        assert_eq!(sort_key, rec.conversation.last_activity_at);
        assert_eq!(summary.peer.as_ref().unwrap().id, "b");
        assert_eq!(summary.last_preview, "");
        assert!(!summary.unread);
        assert!(!summary.invalid);
    }

    #[test]
    fn test_summarize_uses_latest_message() {
        let mut rec = record("a", "b");
        let now = Utc::now();
        rec.messages = vec![
            Message {
                id: "m1".to_string(),
                conversation_id: "c1".to_string(),
                sender_id: "b".to_string(),
                text: "first".to_string(),
                created_at: now - Duration::minutes(10),
                sender_profile: None,
            },
            Message {
                id: "m2".to_string(),
                conversation_id: "c1".to_string(),
                sender_id: "b".to_string(),
                text: "second".to_string(),
                created_at: now,
                sender_profile: None,
            },
        ];
        let (sort_key, summary) = summarize(&rec, "a");
        assert_eq!(sort_key, now);
        assert_eq!(summary.last_preview, "second");
        assert!(summary.unread);
    }

    #[test]
    fn test_summarize_degraded_on_single_member() {
        let mut rec = record("a", "b");
        rec.members.truncate(1);
        let (_, summary) = summarize(&rec, "a");
        assert!(summary.invalid);
        assert!(summary.peer.is_none());
        assert!(!summary.unread);
    }

    #[test]
    fn test_summarize_degraded_when_peer_profile_missing() {
        let mut rec = record("a", "b");
        rec.members[1].profile = None;
        let (_, summary) = summarize(&rec, "a");
        assert!(!summary.invalid);
        assert!(summary.peer.is_none());
    }
}
