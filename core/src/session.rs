/// Conversation session: the open conversation's ordered message log
use crate::messenger_types::{Message, Profile};
use crate::reconciler::Reconciler;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Session lifecycle. `Loading` covers the window between selecting a
/// conversation and its history landing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Closed,
    Loading,
    Open,
}

/// Mutable state shared between the messenger and the reconciler task.
#[derive(Debug)]
pub struct SessionState {
    pub conversation_id: String,
    pub phase: SessionPhase,
    pub peer: Option<Profile>,
    pub log: Vec<Message>,
    /// True while a send awaits remote confirmation; further sends are
    /// rejected until it clears.
    pub sending: bool,
}

impl SessionState {
    pub fn new(conversation_id: String) -> Self {
        Self {
            conversation_id,
            phase: SessionPhase::Loading,
            peer: None,
            log: Vec::new(),
            sending: false,
        }
    }
}

/// The open conversation: shared state plus the realtime feed bound to it.
/// The reconciler is `None` when the subscription could not attach; the
/// session then runs degraded on history alone.
pub struct ConversationSession {
    pub(crate) state: Arc<RwLock<SessionState>>,
    pub(crate) reconciler: Option<Reconciler>,
}

impl ConversationSession {
    /// Release the realtime feed and discard the buffer.
    pub(crate) async fn detach(mut self) {
        if let Some(reconciler) = self.reconciler.take() {
            reconciler.detach();
        }
        let mut state = self.state.write().await;
        state.phase = SessionPhase::Closed;
        state.log.clear();
    }
}

/// Append keeping the log free of duplicate ids and sorted ascending by
/// `created_at` (multi-device sends can arrive out of order). Returns false
/// when the id is already present.
pub(crate) fn append_unique(log: &mut Vec<Message>, message: Message) -> bool {
    if log.iter().any(|m| m.id == message.id) {
        return false;
    }
    log.push(message);
    log.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    true
}

/// Normalize a freshly fetched history: ascending by `created_at`, first
/// occurrence wins on duplicate ids.
pub(crate) fn normalize_history(messages: Vec<Message>) -> Vec<Message> {
    let mut log = messages;
    log.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let mut seen = HashSet::new();
    log.retain(|m| seen.insert(m.id.clone()));
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn message(id: &str, offset_secs: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "peer".to_string(),
            text: format!("msg {}", id),
            created_at: Utc::now() + Duration::seconds(offset_secs),
            sender_profile: None,
        }
    }

    #[test]
    fn test_append_unique_rejects_duplicate_id() {
        let mut log = Vec::new();
        assert!(append_unique(&mut log, message("m1", 0)));
        assert!(!append_unique(&mut log, message("m1", 10)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_append_unique_resorts_out_of_order_arrivals() {
        let mut log = Vec::new();
        append_unique(&mut log, message("m2", 10));
        append_unique(&mut log, message("m1", 0));
        assert_eq!(log[0].id, "m1");
        assert_eq!(log[1].id, "m2");
    }

    #[test]
    fn test_normalize_history_sorts_and_dedups() {
        let history = vec![message("m2", 10), message("m1", 0), message("m2", 20)];
        let log = normalize_history(history);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, "m1");
        assert_eq!(log[1].id, "m2");
    }
}
