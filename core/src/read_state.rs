/// Read-state tracker: per-member last-read watermark
use crate::data_service::DataService;
use crate::error::Result;
use crate::messenger_types::Message;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Advance the member's watermark to now. Last-write-wins; each call is
/// independent, so callers invoke it on open and on every reconciled peer
/// message without debouncing.
pub async fn mark_read(svc: &dyn DataService, conversation_id: &str, user_id: &str) -> Result<()> {
    let now = Utc::now();
    svc.update_member_read_state(conversation_id, user_id, now)
        .await?;
    debug!("marked {} read for {} at {}", conversation_id, user_id, now);
    Ok(())
}

/// A conversation is unread when some message postdates the watermark and
/// was not sent by self. No watermark means never read.
pub fn is_unread(messages: &[Message], self_id: &str, last_read_at: Option<DateTime<Utc>>) -> bool {
    messages.iter().any(|m| {
        m.sender_id != self_id && last_read_at.map_or(true, |seen| m.created_at > seen)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(id: &str, sender: &str, created_at: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            sender_id: sender.to_string(),
            text: "hi".to_string(),
            created_at,
            sender_profile: None,
        }
    }

    #[test]
    fn test_empty_thread_is_read() {
        assert!(!is_unread(&[], "me", None));
    }

    #[test]
    fn test_peer_message_after_watermark_is_unread() {
        let seen = Utc::now();
        let log = vec![message("m1", "peer", seen + Duration::seconds(5))];
        assert!(is_unread(&log, "me", Some(seen)));
    }

    #[test]
    fn test_peer_message_before_watermark_is_read() {
        let seen = Utc::now();
        let log = vec![message("m1", "peer", seen - Duration::seconds(5))];
        assert!(!is_unread(&log, "me", Some(seen)));
    }

    #[test]
    fn test_own_message_never_counts() {
        let seen = Utc::now();
        let log = vec![message("m1", "me", seen + Duration::seconds(5))];
        assert!(!is_unread(&log, "me", Some(seen)));
    }

    #[test]
    fn test_missing_watermark_means_never_read() {
        let log = vec![message("m1", "peer", Utc::now())];
        assert!(is_unread(&log, "me", None));
    }
}
