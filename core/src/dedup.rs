/// Dedup/create protocol: one canonical conversation per unordered user pair.
/// The atomic create-or-get lives server-side; this module consumes it as an
/// opaque idempotent call and normalizes the response.
use crate::data_service::DataService;
use crate::error::{ChatError, Result};
use tracing::{debug, error};

/// Resolve the canonical conversation id for `(self_id, other_id)`.
/// Safe to call concurrently from independent sessions for the same pair;
/// both calls converge on the same id.
pub async fn resolve_direct_conversation(
    svc: &dyn DataService,
    self_id: &str,
    other_id: &str,
) -> Result<String> {
    if self_id == other_id {
        return Err(ChatError::Dedup(
            "cannot open a conversation with yourself".to_string(),
        ));
    }

    let response = svc
        .create_or_get_direct_conversation(self_id, other_id)
        .await?;

    match normalize_conversation_id(&response) {
        Some(conversation_id) => {
            debug!("resolved direct conversation {}", conversation_id);
            Ok(conversation_id)
        }
        None => {
            error!(
                "create-or-get returned no usable conversation id: {}",
                response
            );
            Err(ChatError::Dedup(
                "create-or-get response carried no conversation id".to_string(),
            ))
        }
    }
}

/// The create-or-get endpoint has answered with two shapes over time: a bare
/// id string, and a wrapper object carrying it. Both normalize here, keys in
/// fixed precedence: `conversation_id`, then `id`.
pub fn normalize_conversation_id(value: &serde_json::Value) -> Option<String> {
    if let Some(id) = value.as_str() {
        return if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        };
    }
    for key in ["conversation_id", "id"] {
        if let Some(id) = value.get(key).and_then(|v| v.as_str()) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_bare_id() {
        assert_eq!(
            normalize_conversation_id(&json!("conv-1")),
            Some("conv-1".to_string())
        );
    }

    #[test]
    fn test_normalize_wrapper_object() {
        assert_eq!(
            normalize_conversation_id(&json!({"conversation_id": "conv-2"})),
            Some("conv-2".to_string())
        );
        assert_eq!(
            normalize_conversation_id(&json!({"id": "conv-3"})),
            Some("conv-3".to_string())
        );
    }

    #[test]
    fn test_normalize_precedence() {
        let both = json!({"conversation_id": "wins", "id": "loses"});
        assert_eq!(normalize_conversation_id(&both), Some("wins".to_string()));
    }

    #[test]
    fn test_normalize_rejects_unusable_responses() {
        assert_eq!(normalize_conversation_id(&json!("")), None);
        assert_eq!(normalize_conversation_id(&json!(null)), None);
        assert_eq!(normalize_conversation_id(&json!(42)), None);
        assert_eq!(normalize_conversation_id(&json!({"status": "ok"})), None);
    }
}
