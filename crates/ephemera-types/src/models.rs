use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point-to-point text message between the local identity and a contact.
///
/// `content` is whatever the content codec produced at send time; the store
/// never inspects it beyond storage and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    #[serde(default)]
    pub is_encrypted: bool,
}

impl Message {
    /// True once `expires_at` is at or before `now`. Messages without a TTL never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    /// True when the message was exchanged between `a` and `b`, in either direction.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender == a && self.recipient == b) || (self.sender == b && self.recipient == a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
            last_active: None,
        }
    }

    pub fn with_last_active(mut self, last_active: DateTime<Utc>) -> Self {
        self.last_active = Some(last_active);
        self
    }

    /// The display label, falling back to the raw address for legacy rows without a name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// The two durable collections kept per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Messages,
    Contacts,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 2] = [CollectionKind::Messages, CollectionKind::Contacts];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Contacts => "contacts",
        }
    }

    /// Storage key for this collection under `identity`, e.g. `messages:0xabc`.
    ///
    /// The kind prefix never contains `:`, so keys for different identities cannot collide.
    pub fn storage_key(self, identity: &str) -> String {
        format!("{}:{}", self.as_str(), identity)
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
