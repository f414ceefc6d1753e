/// Realtime reconciler: routes message-insert events into the open session.
/// At most one instance exists at a time, owned by the session it serves;
/// switching conversations aborts the old task before the new one attaches.
use crate::data_service::{DataService, InsertFeed};
use crate::directory;
use crate::messenger_types::{ConversationSummary, InsertEvent, MessengerEvent};
use crate::read_state;
use crate::session::{self, SessionState};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Event classification, resolved once at this boundary. A send by self
/// comes back over the change-feed as an echo of a message the session
/// already appended on confirmation.
pub(crate) enum Reconciled {
    OwnEcho { message_id: String },
    RemoteInsert(InsertEvent),
}

pub(crate) fn classify(event: InsertEvent, self_id: &str) -> Reconciled {
    if event.sender_id == self_id {
        Reconciled::OwnEcho {
            message_id: event.message_id,
        }
    } else {
        Reconciled::RemoteInsert(event)
    }
}

/// Owns the subscription task for one conversation.
pub struct Reconciler {
    conversation_id: String,
    task: JoinHandle<()>,
}

impl Reconciler {
    pub(crate) fn attach(
        svc: Arc<dyn DataService>,
        self_id: String,
        feed: InsertFeed,
        state: Arc<RwLock<SessionState>>,
        inbox: Arc<RwLock<Vec<ConversationSummary>>>,
        events: broadcast::Sender<MessengerEvent>,
    ) -> Self {
        let conversation_id = feed.conversation_id.clone();
        debug!("reconciler attached to {}", conversation_id);
        let task = tokio::spawn(run(svc, self_id, feed, state, inbox, events));
        Self {
            conversation_id,
            task,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub(crate) fn detach(self) {
        self.task.abort();
        debug!("reconciler detached from {}", self.conversation_id);
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    svc: Arc<dyn DataService>,
    self_id: String,
    mut feed: InsertFeed,
    state: Arc<RwLock<SessionState>>,
    inbox: Arc<RwLock<Vec<ConversationSummary>>>,
    events: broadcast::Sender<MessengerEvent>,
) {
    let conversation_id = feed.conversation_id.clone();

    while let Some(event) = feed.events.recv().await {
        if event.conversation_id != conversation_id {
            debug!(
                "dropping insert event for foreign conversation {}",
                event.conversation_id
            );
            continue;
        }

        match classify(event, &self_id) {
            Reconciled::OwnEcho { message_id } => {
                // Already appended on send confirmation; only the inbox
                // preview/ordering needs to catch up.
                debug!("own echo {} suppressed", message_id);
                directory::refresh(svc.as_ref(), &self_id, &inbox, &events).await;
            }
            Reconciled::RemoteInsert(event) => {
                let message = match svc.fetch_message(&conversation_id, &event.message_id).await {
                    Ok(full) => full,
                    Err(e) => {
                        warn!(
                            "full record fetch for {} failed ({}), appending event payload",
                            event.message_id, e
                        );
                        event.into_message()
                    }
                };

                let appended = {
                    let mut st = state.write().await;
                    session::append_unique(&mut st.log, message.clone())
                };
                if !appended {
                    // Duplicate delivery, e.g. after a reconnect replay
                    debug!("duplicate delivery of {} skipped", message.id);
                    continue;
                }

                let _ = events.send(MessengerEvent::MessageAppended { message });

                // The conversation is on screen, so the peer message is
                // implicitly seen.
                if let Err(e) = read_state::mark_read(svc.as_ref(), &conversation_id, &self_id).await
                {
                    warn!("mark-read after peer message failed: {}", e);
                }
                directory::refresh(svc.as_ref(), &self_id, &inbox, &events).await;
            }
        }
    }

    debug!("insert feed for {} closed", conversation_id);
}
