/// Messenger facade: owns the inbox and the currently open conversation.
/// All remote failures are logged and surfaced as dismissible notices; none
/// of them can take the hosting app down.
use crate::data_service::DataService;
use crate::dedup;
use crate::directory;
use crate::eligibility::{self, FollowCounts};
use crate::error::{ChatError, Result};
use crate::messenger_types::{
    ConversationSummary, Message, MessageDraft, MessengerEvent, Profile,
};
use crate::read_state;
use crate::reconciler::Reconciler;
use crate::session::{ConversationSession, SessionPhase, SessionState};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct Messenger {
    /// Current user id
    pub self_id: String,

    svc: Arc<dyn DataService>,

    /// Fan-out to UI clients
    events: broadcast::Sender<MessengerEvent>,

    /// Inbox slot, refreshed on mount, send, reconciled peer message, close
    inbox: Arc<RwLock<Vec<ConversationSummary>>>,

    /// The open conversation, if any
    session: Arc<RwLock<Option<ConversationSession>>>,
}

impl Messenger {
    pub fn new(svc: Arc<dyn DataService>, self_id: impl Into<String>) -> Self {
        let self_id = self_id.into();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!("messenger created for user {}", self_id);
        Self {
            self_id,
            svc,
            events,
            inbox: Arc::new(RwLock::new(Vec::new())),
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MessengerEvent> {
        self.events.subscribe()
    }

    /// Reload the inbox. Call once on entry; every other trigger (send,
    /// reconciled peer message, close) refreshes internally.
    pub async fn refresh_inbox(&self) {
        directory::refresh(self.svc.as_ref(), &self.self_id, &self.inbox, &self.events).await;
    }

    /// Snapshot of the inbox, most recent conversation first.
    pub async fn inbox(&self) -> Vec<ConversationSummary> {
        self.inbox.read().await.clone()
    }

    /// Resolve the canonical conversation for `other_id` and open it.
    pub async fn open_conversation_with_user(&self, other_id: &str) -> Result<String> {
        let conversation_id =
            match dedup::resolve_direct_conversation(self.svc.as_ref(), &self.self_id, other_id)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    self.notify_failure(&e);
                    return Err(e);
                }
            };
        self.open_conversation(&conversation_id).await?;
        Ok(conversation_id)
    }

    /// Open a conversation: load history, mark read, attach the realtime
    /// feed. Any previously open conversation is closed first, so its feed
    /// is released before the new one attaches.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<()> {
        self.close_conversation().await;

        let state = Arc::new(RwLock::new(SessionState::new(conversation_id.to_string())));
        *self.session.write().await = Some(ConversationSession {
            state: state.clone(),
            reconciler: None,
        });

        match self.load_session(conversation_id, &state).await {
            Ok(reconciler) => {
                if let Some(session) = self.session.write().await.as_mut() {
                    session.reconciler = reconciler;
                }
                let _ = self.events.send(MessengerEvent::ConversationOpened {
                    conversation_id: conversation_id.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                *self.session.write().await = None;
                error!("failed to open conversation {}: {}", conversation_id, e);
                self.notify_failure(&e);
                Err(e)
            }
        }
    }

    async fn load_session(
        &self,
        conversation_id: &str,
        state: &Arc<RwLock<SessionState>>,
    ) -> Result<Option<Reconciler>> {
        let record = self
            .svc
            .fetch_conversation(conversation_id)
            .await
            .map_err(|e| ChatError::Load(format!("conversation {}: {}", conversation_id, e)))?;

        let peer = if record.members.len() == 2 {
            record
                .members
                .iter()
                .find(|m| m.user_id != self.self_id)
                .and_then(|m| m.profile.clone())
        } else {
            warn!(
                "conversation {} has {} members",
                conversation_id,
                record.members.len()
            );
            None
        };

        {
            let mut st = state.write().await;
            st.log = crate::session::normalize_history(record.messages);
            st.peer = peer;
            st.phase = SessionPhase::Open;
        }

        // Everything on screen counts as seen from this instant.
        if let Err(e) = read_state::mark_read(self.svc.as_ref(), conversation_id, &self.self_id).await
        {
            warn!("mark-read on open failed: {}", e);
        }

        match self.svc.subscribe_message_inserts(conversation_id).await {
            Ok(feed) => Ok(Some(Reconciler::attach(
                self.svc.clone(),
                self.self_id.clone(),
                feed,
                state.clone(),
                self.inbox.clone(),
                self.events.clone(),
            ))),
            Err(e) => {
                // History is still usable; run degraded without realtime.
                warn!(
                    "realtime subscription for {} failed: {}",
                    conversation_id, e
                );
                self.notify_failure(&e);
                Ok(None)
            }
        }
    }

    /// Send into the open conversation. The log grows only once the remote
    /// insert confirms; a failed send leaves it untouched. One send at a
    /// time: callers disable input while a send is in flight.
    pub async fn send_message(&self, text: &str) -> Result<Message> {
        let (state, conversation_id) = {
            let guard = self.session.read().await;
            let session = guard
                .as_ref()
                .ok_or_else(|| ChatError::Send("no open conversation".to_string()))?;
            let st = session.state.read().await;
            if st.phase != SessionPhase::Open {
                return Err(ChatError::Send("conversation is not open".to_string()));
            }
            (session.state.clone(), st.conversation_id.clone())
        };

        {
            let mut st = state.write().await;
            if st.sending {
                return Err(ChatError::Send("another send is in flight".to_string()));
            }
            st.sending = true;
        }

        let draft = MessageDraft {
            conversation_id: conversation_id.clone(),
            sender_id: self.self_id.clone(),
            text: text.to_string(),
        };
        let result = self.svc.insert_message(&draft).await;
        state.write().await.sending = false;

        let message = match result {
            Ok(message) => message,
            Err(e) => {
                error!("send into {} failed: {}", conversation_id, e);
                let err = ChatError::Send(e.to_string());
                self.notify_failure(&err);
                return Err(err);
            }
        };

        {
            let mut st = state.write().await;
            crate::session::append_unique(&mut st.log, message.clone());
        }
        let _ = self.events.send(MessengerEvent::MessageAppended {
            message: message.clone(),
        });
        self.refresh_inbox().await;
        Ok(message)
    }

    /// Close the open conversation: release the realtime feed, discard the
    /// buffer, refresh the inbox so activity from while it was open shows up.
    pub async fn close_conversation(&self) {
        let previous = self.session.write().await.take();
        if let Some(session) = previous {
            let conversation_id = session.state.read().await.conversation_id.clone();
            session.detach().await;
            debug!("closed conversation {}", conversation_id);
            self.refresh_inbox().await;
            let _ = self
                .events
                .send(MessengerEvent::ConversationClosed { conversation_id });
        }
    }

    /// Snapshot of the open conversation's log, ascending by `created_at`.
    pub async fn messages(&self) -> Vec<Message> {
        match self.session.read().await.as_ref() {
            Some(session) => session.state.read().await.log.clone(),
            None => Vec::new(),
        }
    }

    pub async fn peer_profile(&self) -> Option<Profile> {
        match self.session.read().await.as_ref() {
            Some(session) => session.state.read().await.peer.clone(),
            None => None,
        }
    }

    pub async fn session_phase(&self) -> SessionPhase {
        match self.session.read().await.as_ref() {
            Some(session) => session.state.read().await.phase,
            None => SessionPhase::Closed,
        }
    }

    pub async fn open_conversation_id(&self) -> Option<String> {
        match self.session.read().await.as_ref() {
            Some(session) => Some(session.state.read().await.conversation_id.clone()),
            None => None,
        }
    }

    /// Users the current user may message: mutual follows, optionally
    /// filtered by username substring.
    pub async fn eligible_recipients(&self, filter: Option<&str>) -> Result<Vec<Profile>> {
        eligibility::eligible_recipients(self.svc.as_ref(), &self.self_id, filter).await
    }

    /// Whether the message affordance should show on `other_id`'s profile.
    pub async fn can_message(&self, other_id: &str) -> Result<bool> {
        eligibility::is_mutual(self.svc.as_ref(), &self.self_id, other_id).await
    }

    pub async fn follow_counts(&self, user_id: &str) -> Result<FollowCounts> {
        eligibility::follow_counts(self.svc.as_ref(), user_id).await
    }

    fn notify_failure(&self, err: &ChatError) {
        let _ = self.events.send(MessengerEvent::Notice {
            text: err.to_string(),
            retryable: err.is_retryable(),
        });
    }
}

impl Clone for Messenger {
    fn clone(&self) -> Self {
        Self {
            self_id: self.self_id.clone(),
            svc: self.svc.clone(),
            events: self.events.clone(),
            inbox: self.inbox.clone(),
            session: self.session.clone(),
        }
    }
}
