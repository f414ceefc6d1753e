/// REST data service: HTTP + websocket change-feed client for the managed
/// backend.
///
/// Endpoints (PostgREST-style, matching the hosted schema):
///   POST  /rest/v1/rpc/create_or_get_dm        body: {"self_user_id","other_user_id"}
///   GET   /rest/v1/conversations?member=eq.<uid>
///   GET   /rest/v1/conversations/<id>
///   GET   /rest/v1/conversations/<id>/messages/<mid>
///   POST  /rest/v1/messages                    returns the created row, sender joined
///   PATCH /rest/v1/conversation_members?conversation_id=eq.<id>&user_id=eq.<uid>
///   GET   /rest/v1/follows?follower_id=eq.<uid> (and ?following_id=eq.<uid>)
///   GET   /rest/v1/profiles?id=in.(<ids>)
///   WS    /realtime/v1?table=messages&filter=conversation_id=eq.<id>
///
/// Idempotent calls (reads, the create-or-get RPC, the read-state upsert)
/// retry with jittered exponential backoff. Message inserts never retry: a
/// duplicate send is worse than a surfaced failure.
use crate::config::Config;
use crate::data_service::{DataService, InsertFeed};
use crate::error::{ChatError, Result};
use crate::messenger_types::{
    profile_from_relation, Conversation, ConversationMember, ConversationRecord, InsertEvent,
    Message, MessageDraft, Profile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use rand::Rng;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

pub struct RestDataService {
    http: reqwest::Client,
    rest_url: String,
    realtime_url: String,
    api_key: Option<String>,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

impl RestDataService {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("http client: {}", e)))?;

        let base = config.service_url.trim_end_matches('/');
        let realtime_url = if let Some(host) = base.strip_prefix("https://") {
            format!("wss://{}/realtime/v1", host)
        } else if let Some(host) = base.strip_prefix("http://") {
            format!("ws://{}/realtime/v1", host)
        } else {
            return Err(ChatError::Config(format!(
                "unsupported service url: {}",
                base
            )));
        };

        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", base),
            realtime_url,
            api_key: config.api_key.clone(),
            retry_attempts: config.retry_attempts,
            retry_base_delay: config.retry_base_delay,
        })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("apikey", key).bearer_auth(key),
            None => builder,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(6);
        let base = self.retry_base_delay * 2u32.pow(exp);
        let jitter_cap = (self.retry_base_delay.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_cap);
        base + Duration::from_millis(jitter)
    }

    async fn request_json(
        &self,
        method: Method,
        path_and_query: String,
        body: Option<&Value>,
        retry: bool,
    ) -> Result<Value> {
        let url = format!("{}{}", self.rest_url, path_and_query);
        let max_attempts = if retry { self.retry_attempts + 1 } else { 1 };
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let mut builder = self.authed(self.http.request(method.clone(), &url));
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let text = resp
                        .text()
                        .await
                        .map_err(|e| ChatError::Transport(format!("read {}: {}", url, e)))?;
                    if text.is_empty() {
                        return Ok(Value::Null);
                    }
                    return serde_json::from_str(&text).map_err(ChatError::Serialization);
                }
                Ok(resp) => {
                    let status = resp.status();
                    if attempt < max_attempts && retryable_status(status) {
                        warn!("{} {} returned {}, retrying", method, url, status);
                    } else {
                        return Err(ChatError::Transport(format!(
                            "{} {} returned {}",
                            method, url, status
                        )));
                    }
                }
                Err(e) => {
                    if attempt < max_attempts {
                        warn!("{} {} failed ({}), retrying", method, url, e);
                    } else {
                        return Err(ChatError::Transport(format!("{} {}: {}", method, url, e)));
                    }
                }
            }

            tokio::time::sleep(self.backoff_delay(attempt)).await;
        }
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn parse_ts(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn parse_message(value: &Value) -> Option<Message> {
    Some(Message {
        id: value.get("id")?.as_str()?.to_string(),
        conversation_id: value.get("conversation_id")?.as_str()?.to_string(),
        sender_id: value.get("sender_id")?.as_str()?.to_string(),
        text: value
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        created_at: value.get("created_at").and_then(parse_ts)?,
        sender_profile: profile_from_relation(value),
    })
}

fn parse_member(value: &Value) -> Option<ConversationMember> {
    Some(ConversationMember {
        conversation_id: value.get("conversation_id")?.as_str()?.to_string(),
        user_id: value.get("user_id")?.as_str()?.to_string(),
        last_read_at: value.get("last_read_at").and_then(parse_ts),
        joined_at: value
            .get("joined_at")
            .and_then(parse_ts)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        profile: profile_from_relation(value),
    })
}

fn parse_record(value: &Value) -> Option<ConversationRecord> {
    let conversation = Conversation {
        id: value.get("id")?.as_str()?.to_string(),
        last_activity_at: value
            .get("last_activity_at")
            .and_then(parse_ts)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    };
    let members = value
        .get("members")
        .and_then(|v| v.as_array())
        .map(|rows| rows.iter().filter_map(parse_member).collect())
        .unwrap_or_default();
    let mut messages: Vec<Message> = value
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|rows| rows.iter().filter_map(parse_message).collect())
        .unwrap_or_default();
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Some(ConversationRecord {
        conversation,
        members,
        messages,
    })
}

#[async_trait]
impl DataService for RestDataService {
    async fn create_or_get_direct_conversation(
        &self,
        self_id: &str,
        other_id: &str,
    ) -> Result<Value> {
        let body = json!({ "self_user_id": self_id, "other_user_id": other_id });
        // Idempotent by contract, so a retry cannot duplicate the row.
        self.request_json(
            Method::POST,
            "/rpc/create_or_get_dm".to_string(),
            Some(&body),
            true,
        )
        .await
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>> {
        let value = self
            .request_json(
                Method::GET,
                format!("/conversations?member=eq.{}", user_id),
                None,
                true,
            )
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        let mut records = Vec::new();
        for row in &rows {
            match parse_record(row) {
                Some(record) => records.push(record),
                None => warn!("skipping undecodable conversation row"),
            }
        }
        Ok(records)
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<ConversationRecord> {
        let value = self
            .request_json(
                Method::GET,
                format!("/conversations/{}", conversation_id),
                None,
                true,
            )
            .await?;
        parse_record(&value).ok_or_else(|| {
            ChatError::Load(format!(
                "conversation {} response was not decodable",
                conversation_id
            ))
        })
    }

    async fn fetch_message(&self, conversation_id: &str, message_id: &str) -> Result<Message> {
        let value = self
            .request_json(
                Method::GET,
                format!("/conversations/{}/messages/{}", conversation_id, message_id),
                None,
                true,
            )
            .await?;
        parse_message(&value)
            .ok_or_else(|| ChatError::Load(format!("message {} was not decodable", message_id)))
    }

    async fn insert_message(&self, draft: &MessageDraft) -> Result<Message> {
        let body = serde_json::to_value(draft)?;
        let value = self
            .request_json(Method::POST, "/messages".to_string(), Some(&body), false)
            .await?;
        parse_message(&value)
            .ok_or_else(|| ChatError::Send("insert response was not a message row".to_string()))
    }

    async fn update_member_read_state(
        &self,
        conversation_id: &str,
        user_id: &str,
        last_read_at: DateTime<Utc>,
    ) -> Result<()> {
        let body = json!({ "last_read_at": last_read_at.to_rfc3339() });
        self.request_json(
            Method::PATCH,
            format!(
                "/conversation_members?conversation_id=eq.{}&user_id=eq.{}",
                conversation_id, user_id
            ),
            Some(&body),
            true,
        )
        .await?;
        Ok(())
    }

    async fn subscribe_message_inserts(&self, conversation_id: &str) -> Result<InsertFeed> {
        let mut url = format!(
            "{}?table=messages&filter=conversation_id=eq.{}",
            self.realtime_url, conversation_id
        );
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&apikey={}", key));
        }

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ChatError::Subscription(format!("realtime connect: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let conversation = conversation_id.to_string();
        tokio::spawn(async move {
            let mut ws = ws;
            while let Some(frame) = ws.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<InsertEvent>(&text) {
                            Ok(event) => {
                                // Receiver gone means the session detached.
                                if tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("undecodable realtime frame: {}", e),
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("realtime stream for {} errored: {}", conversation, e);
                        break;
                    }
                }
            }
            debug!("realtime stream for {} ended", conversation);
        });

        Ok(InsertFeed {
            conversation_id: conversation_id.to_string(),
            events: rx,
        })
    }

    async fn list_following(&self, user_id: &str) -> Result<Vec<String>> {
        let value = self
            .request_json(
                Method::GET,
                format!("/follows?follower_id=eq.{}&select=following_id", user_id),
                None,
                true,
            )
            .await?;
        Ok(id_column(&value, "following_id"))
    }

    async fn list_followers(&self, user_id: &str) -> Result<Vec<String>> {
        let value = self
            .request_json(
                Method::GET,
                format!("/follows?following_id=eq.{}&select=follower_id", user_id),
                None,
                true,
            )
            .await?;
        Ok(id_column(&value, "follower_id"))
    }

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let value = self
            .request_json(
                Method::GET,
                format!("/profiles?id=in.({})", user_ids.join(",")),
                None,
                true,
            )
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect())
    }
}

fn id_column(value: &Value, column: &str) -> Vec<String> {
    value
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get(column).and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
