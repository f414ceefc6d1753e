/// StreetLink messaging core
///
/// Client-side direct-messaging engine for the StreetLink social app:
/// canonical conversation resolution, inbox directory, conversation sessions
/// with realtime reconciliation, read-state tracking, and the mutual-follow
/// recipient gate.

pub mod config;
pub mod data_service;
pub mod dedup;
pub mod directory;
pub mod eligibility;
pub mod error;
pub mod logging;
pub mod memory_service;
pub mod messenger;
pub mod messenger_types;
pub mod read_state;
pub mod reconciler;
pub mod rest_service;
pub mod session;

pub use config::Config;
pub use data_service::{DataService, InsertFeed};
pub use error::{ChatError, Result};
pub use memory_service::MemoryDataService;
pub use messenger::Messenger;
pub use messenger_types::{
    Conversation, ConversationMember, ConversationRecord, ConversationSummary, InsertEvent,
    Message, MessageDraft, MessengerEvent, Profile,
};
pub use rest_service::RestDataService;
pub use session::SessionPhase;
