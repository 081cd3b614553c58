use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};
use uuid::Uuid;

use ephemera_crypto::{ContentCodec, PlainCodec};
use ephemera_types::events::StoreEvent;
use ephemera_types::models::{Contact, Message};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};
use crate::messages::Conversation;
use crate::persistence::PersistenceAdapter;
use crate::session::{Services, Session, StoreConfig};

const EVENT_CAPACITY: usize = 1024;

/// A message handed over by whatever delivers traffic from other parties.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub ttl_minutes: Option<u32>,
}

/// Follows the active identity and routes every operation to its session.
///
/// Identity changes are serialized with operations: the outgoing session is
/// closed and flushed before the incoming one is loaded, so no write for one
/// identity can land after another identity's collections were read.
pub struct Messenger {
    services: Services,
    config: StoreConfig,
    active: RwLock<Option<Session>>,
}

impl Messenger {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>, config: StoreConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            services: Services {
                adapter,
                clock: Arc::new(SystemClock),
                codec: Arc::new(PlainCodec),
                events,
            },
            config,
            active: RwLock::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.services.clock = clock;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ContentCodec>) -> Self {
        self.services.codec = codec;
        self
    }

    /// Subscribe to store events. Subscriptions survive identity changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.services.events.subscribe()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.services.clock.now()
    }

    /// React to the identity boundary: `Some` connects (switching if another
    /// identity is active), `None` disconnects. Blank identities count as `None`.
    pub async fn identity_changed(&self, identity: Option<String>) -> Result<()> {
        let identity = identity
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let mut active = self.active.write().await;
        if active.as_ref().map(Session::identity) == identity.as_deref() {
            return Ok(());
        }

        if let Some(outgoing) = active.take() {
            outgoing.close().await;
        }

        let result = match identity {
            Some(identity) => {
                match Session::open(identity.clone(), self.services.clone(), &self.config).await {
                    Ok(session) => {
                        info!("Identity {} connected", identity);
                        *active = Some(session);
                        Ok(())
                    }
                    Err(e) => {
                        warn!("Could not open session for {}: {}", identity, e);
                        Err(e)
                    }
                }
            }
            None => {
                info!("Identity disconnected");
                Ok(())
            }
        };

        let _ = self.services.events.send(StoreEvent::IdentityChanged {
            identity: active.as_ref().map(|s| s.identity().to_string()),
        });
        result
    }

    pub async fn current_identity(&self) -> Option<String> {
        self.active.read().await.as_ref().map(|s| s.identity().to_string())
    }

    /// The active session, or `NotAuthenticated`.
    pub async fn session(&self) -> Result<Session> {
        self.active
            .read()
            .await
            .clone()
            .ok_or(StoreError::NotAuthenticated)
    }

    pub async fn send(&self, recipient: &str, content: &str, ttl_minutes: Option<u32>) -> Result<Message> {
        let session = self.session().await.inspect_err(|e| {
            let _ = self.services.events.send(StoreEvent::MessageSendRejected {
                reason: e.to_string(),
            });
        })?;
        session.send(recipient, content, ttl_minutes).await
    }

    /// Store a message from another party if it is addressed to the active
    /// identity. Returns `Ok(None)` when it is not.
    pub async fn deliver(&self, incoming: IncomingMessage) -> Result<Option<Message>> {
        let Ok(session) = self.session().await else {
            return Ok(None);
        };
        if session.identity() != incoming.recipient {
            return Ok(None);
        }
        session
            .receive(&incoming.sender, &incoming.content, incoming.ttl_minutes)
            .await
            .map(Some)
    }

    pub async fn conversation_with(&self, address: &str) -> Conversation {
        match self.session().await {
            Ok(session) => session.conversation_with(address),
            Err(_) => Conversation::default(),
        }
    }

    pub async fn unread_count_from(&self, address: &str) -> usize {
        match self.session().await {
            Ok(session) => session.unread_count_from(address),
            Err(_) => 0,
        }
    }

    pub async fn mark_read(&self, id: Uuid) -> Result<bool> {
        self.session().await?.mark_read(id).await
    }

    pub async fn delete_message(&self, id: Uuid) -> Result<bool> {
        self.session().await?.delete_message(id).await
    }

    pub async fn select_conversation(&self, contact: &Contact) -> Result<usize> {
        self.session().await?.select_conversation(contact).await
    }

    pub async fn selected_contact(&self) -> Option<Contact> {
        self.session().await.ok()?.selected_contact()
    }

    pub async fn add_contact(&self, address: &str, name: Option<&str>) -> Result<Contact> {
        let session = self.session().await.inspect_err(|e| {
            let _ = self.services.events.send(StoreEvent::ContactAddRejected {
                address: address.trim().to_string(),
                reason: e.to_string(),
            });
        })?;
        session.add_contact(address, name).await
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        match self.session().await {
            Ok(session) => session.contacts(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn find_contact(&self, address: &str) -> Option<Contact> {
        self.session().await.ok()?.find_contact(address)
    }

    pub async fn sweep(&self) -> Result<usize> {
        Ok(self.session().await?.sweep().await)
    }

    /// Disconnect, flushing the active session.
    pub async fn shutdown(&self) {
        let _ = self.identity_changed(None).await;
    }
}
