use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CollectionKind, Contact, Message};

/// Notifications emitted by the store toward UI and other collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreEvent {
    /// The active identity changed (`None` after a disconnect)
    IdentityChanged { identity: Option<String> },

    /// A message composed by the local identity was stored
    MessageSent { message: Message },

    /// A send was refused before any message was created
    MessageSendRejected { reason: String },

    /// A message from another party was stored
    MessageReceived { message: Message },

    /// Messages flipped from unread to read
    MessagesRead { ids: Vec<Uuid> },

    /// A message was deleted on request
    MessageDeleted { id: Uuid },

    /// The sweep purged expired messages
    MessagesExpired { ids: Vec<Uuid> },

    ContactAdded { contact: Contact },

    ContactAddRejected { address: String, reason: String },

    /// A durable write failed; in-memory state is still authoritative
    PersistenceFailed {
        identity: String,
        kind: CollectionKind,
        error: String,
    },
}

impl StoreEvent {
    /// Events that describe a refused or failed operation.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::MessageSendRejected { .. }
                | Self::ContactAddRejected { .. }
                | Self::PersistenceFailed { .. }
        )
    }
}
