use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ephemera_crypto::ContentCodec;
use ephemera_types::events::StoreEvent;
use ephemera_types::models::{CollectionKind, Contact, Message};

use crate::clock::Clock;
use crate::contacts::ContactDirectory;
use crate::error::{Result, StoreError};
use crate::messages::{Conversation, MessageStore};
use crate::persistence::{PersistenceAdapter, decode_collection, encode_collection};
use crate::sweep;
use crate::writer::WriteQueue;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Period of the background expiry sweep
    pub sweep_interval: Duration,
    /// Contacts installed the first time an identity connects
    pub default_contacts: Vec<Contact>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            default_contacts: Vec::new(),
        }
    }
}

/// Collaborators shared by every session of a messenger.
#[derive(Clone)]
pub struct Services {
    pub adapter: Arc<dyn PersistenceAdapter>,
    pub clock: Arc<dyn Clock>,
    pub codec: Arc<dyn ContentCodec>,
    pub events: broadcast::Sender<StoreEvent>,
}

struct SessionState {
    messages: MessageStore,
    contacts: ContactDirectory,
    selected: Option<Contact>,
}

pub(crate) struct SessionInner {
    identity: String,
    state: Mutex<SessionState>,
    writes: WriteQueue,
    services: Services,
    closed: AtomicBool,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Everything that belongs to one connected identity.
///
/// All mutations go through one state lock and are applied to memory before
/// their snapshot is handed to the write queue, so the sweep and user actions
/// never interleave and never overwrite each other's effects. Mutating
/// methods return once their snapshot has been attempted; a failed write is
/// reported as [`StoreEvent::PersistenceFailed`] and never undoes the change.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Load `identity`'s collections, run one sweep and start the sweep timer.
    ///
    /// Fails with [`StoreError::Persistence`] when stored data cannot be read
    /// or decoded, so a damaged snapshot is never replaced by an empty one.
    pub async fn open(identity: impl Into<String>, services: Services, config: &StoreConfig) -> Result<Self> {
        let identity = identity.into();
        let (messages, contacts) = load_collections(&services.adapter, &identity).await?;
        let first_run = contacts.is_none();
        let contacts = contacts.unwrap_or_else(|| config.default_contacts.clone());

        let (writes, _writer) =
            WriteQueue::spawn(identity.clone(), services.adapter.clone(), services.events.clone());

        let session = Self {
            inner: Arc::new(SessionInner {
                identity: identity.clone(),
                state: Mutex::new(SessionState {
                    messages: MessageStore::new(identity.clone(), messages),
                    contacts: ContactDirectory::new(contacts),
                    selected: None,
                }),
                writes,
                services,
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                sweeper: Mutex::new(None),
            }),
        };

        if first_run && !config.default_contacts.is_empty() {
            let done = {
                let state = session.lock();
                session.persist(&state, CollectionKind::Contacts)
            };
            let _ = done.await;
            debug!("Seeded {} default contacts for {}", config.default_contacts.len(), identity);
        }

        {
            let state = session.lock();
            info!(
                "Session opened for {} ({} messages, {} contacts)",
                identity,
                state.messages.len(),
                state.contacts.len()
            );
        }

        session.sweep().await;

        let handle = tokio::spawn(sweep::run_sweep_loop(
            Arc::downgrade(&session.inner),
            config.sweep_interval,
            session.inner.cancel.clone(),
        ));
        *session.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(session)
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.services.events.subscribe()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.services.clock.now()
    }

    /// Compose and store a message to `recipient`.
    ///
    /// `content` is trimmed and must not be empty. `ttl_minutes` of zero or
    /// `None` means the message never expires.
    pub async fn send(&self, recipient: &str, content: &str, ttl_minutes: Option<u32>) -> Result<Message> {
        let (message, done) = self.try_send(recipient, content, ttl_minutes).inspect_err(|e| {
            debug!("Send from {} rejected: {}", self.identity(), e);
            self.emit(StoreEvent::MessageSendRejected {
                reason: e.to_string(),
            });
        })?;

        self.emit(StoreEvent::MessageSent {
            message: message.clone(),
        });
        let _ = done.await;
        Ok(message)
    }

    fn try_send(
        &self,
        recipient: &str,
        content: &str,
        ttl_minutes: Option<u32>,
    ) -> Result<(Message, oneshot::Receiver<()>)> {
        self.ensure_open()?;
        let encoded = self.encode(content)?;
        let encrypted = self.inner.services.codec.is_encrypted();
        let now = self.now();

        let mut state = self.lock_open()?;
        let message = state.messages.compose(recipient, encoded, encrypted, ttl_minutes, now)?;
        let done = self.persist(&state, CollectionKind::Messages);
        Ok((message, done))
    }

    /// Store a message another party sent to this identity.
    pub async fn receive(&self, sender: &str, content: &str, ttl_minutes: Option<u32>) -> Result<Message> {
        let (message, done) = {
            self.ensure_open()?;
            let encoded = self.encode(content)?;
            let encrypted = self.inner.services.codec.is_encrypted();
            let now = self.now();

            let mut state = self.lock_open()?;
            let message = state.messages.accept_incoming(sender, encoded, encrypted, ttl_minutes, now)?;
            (message, self.persist(&state, CollectionKind::Messages))
        };

        self.emit(StoreEvent::MessageReceived {
            message: message.clone(),
        });
        let _ = done.await;
        Ok(message)
    }

    pub fn conversation_with(&self, address: &str) -> Conversation {
        let now = self.now();
        self.lock().messages.conversation_with(address, now)
    }

    pub fn unread_count_from(&self, address: &str) -> usize {
        let now = self.now();
        self.lock().messages.unread_count_from(address, now)
    }

    /// Mark one received message as read. Unknown ids, messages already read
    /// and messages this identity sent are left alone and return `false`.
    pub async fn mark_read(&self, id: Uuid) -> Result<bool> {
        self.ensure_open()?;
        let done = {
            let mut state = self.lock_open()?;
            if !state.messages.mark_read(id) {
                return Ok(false);
            }
            self.persist(&state, CollectionKind::Messages)
        };

        self.emit(StoreEvent::MessagesRead { ids: vec![id] });
        let _ = done.await;
        Ok(true)
    }

    /// Remove a message. Deleting an unknown id is a no-op returning `false`.
    pub async fn delete_message(&self, id: Uuid) -> Result<bool> {
        self.ensure_open()?;
        let done = {
            let mut state = self.lock_open()?;
            if !state.messages.delete(id) {
                return Ok(false);
            }
            self.persist(&state, CollectionKind::Messages)
        };

        debug!("Deleted message {} for {}", id, self.identity());
        self.emit(StoreEvent::MessageDeleted { id });
        let _ = done.await;
        Ok(true)
    }

    /// Open the conversation with `contact`: remember the selection and mark
    /// everything it sent us as read in a single write. Returns how many
    /// messages flipped.
    pub async fn select_conversation(&self, contact: &Contact) -> Result<usize> {
        self.ensure_open()?;
        let now = self.now();
        let (ids, done) = {
            let mut state = self.lock_open()?;
            state.selected = Some(contact.clone());
            let ids = state.messages.mark_conversation_read(&contact.address, now);
            if ids.is_empty() {
                return Ok(0);
            }
            let done = self.persist(&state, CollectionKind::Messages);
            (ids, done)
        };

        let count = ids.len();
        self.emit(StoreEvent::MessagesRead { ids });
        let _ = done.await;
        Ok(count)
    }

    pub fn selected_contact(&self) -> Option<Contact> {
        self.lock().selected.clone()
    }

    pub fn clear_selection(&self) {
        self.lock().selected = None;
    }

    pub async fn add_contact(&self, address: &str, name: Option<&str>) -> Result<Contact> {
        let added = self.ensure_open().and_then(|()| {
            let now = self.now();
            let mut state = self.lock_open()?;
            let contact = state.contacts.add(address, name, now)?;
            Ok((contact, self.persist(&state, CollectionKind::Contacts)))
        });

        let (contact, done) = added.inspect_err(|e| {
            self.emit(StoreEvent::ContactAddRejected {
                address: address.trim().to_string(),
                reason: e.to_string(),
            });
        })?;

        info!("Contact {} added for {}", contact.address, self.identity());
        self.emit(StoreEvent::ContactAdded {
            contact: contact.clone(),
        });
        let _ = done.await;
        Ok(contact)
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.lock().contacts.all()
    }

    pub fn find_contact(&self, address: &str) -> Option<Contact> {
        self.lock().contacts.find(address).cloned()
    }

    /// Purge expired messages now. Persists at most once, and only when
    /// something was removed. Returns the number purged.
    pub async fn sweep(&self) -> usize {
        let now = self.now();
        let (ids, done) = {
            let Ok(mut state) = self.lock_open() else {
                return 0;
            };
            let ids = state.messages.purge_expired(now);
            if ids.is_empty() {
                return 0;
            }
            let done = self.persist(&state, CollectionKind::Messages);
            (ids, done)
        };

        let count = ids.len();
        info!("Sweep purged {} expired message(s) for {}", count, self.identity());
        self.emit(StoreEvent::MessagesExpired { ids });
        let _ = done.await;
        count
    }

    /// Decode a message's stored content back to text.
    pub fn reveal(&self, message: &Message) -> Result<String> {
        self.inner
            .services
            .codec
            .decode(&message.content)
            .map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Wait until every write issued so far has been attempted.
    pub async fn flush(&self) {
        self.inner.writes.flush().await;
    }

    /// Stop the sweep timer and flush pending writes. Further mutations fail
    /// with [`StoreError::NotAuthenticated`].
    pub async fn close(&self) {
        {
            // Flipped under the state lock: a mutation either enqueued its
            // snapshot before this point or sees the session closed.
            let _state = self.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        self.inner.cancel.cancel();

        let sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!("Sweep task for {} ended abnormally: {}", self.identity(), e);
            }
        }

        self.flush().await;
        info!("Session closed for {}", self.identity());
    }

    pub(crate) fn retry_failed_writes(&self) {
        self.inner.writes.retry_failed();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::NotAuthenticated);
        }
        Ok(())
    }

    fn encode(&self, content: &str) -> Result<String> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::EmptyContent);
        }
        self.inner
            .services
            .codec
            .encode(content)
            .map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Lock the state for a mutation, failing once the session is closed.
    fn lock_open(&self) -> Result<MutexGuard<'_, SessionState>> {
        let state = self.lock();
        self.ensure_open()?;
        Ok(state)
    }

    // State is plain data, so a panic elsewhere cannot leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize `kind` from the locked state and enqueue it.
    fn persist(&self, state: &SessionState, kind: CollectionKind) -> oneshot::Receiver<()> {
        let body = match kind {
            CollectionKind::Messages => encode_collection(state.messages.messages()),
            CollectionKind::Contacts => encode_collection(state.contacts.contacts()),
        };
        match body {
            Ok(body) => self.inner.writes.save(kind, body),
            Err(e) => {
                warn!("Encoding {} failed: {}", kind.storage_key(self.identity()), e);
                self.emit(StoreEvent::PersistenceFailed {
                    identity: self.identity().to_string(),
                    kind,
                    error: e.to_string(),
                });
                let (_, done) = oneshot::channel();
                done
            }
        }
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.inner.services.events.send(event);
    }
}

async fn load_collections(
    adapter: &Arc<dyn PersistenceAdapter>,
    identity: &str,
) -> Result<(Vec<Message>, Option<Vec<Contact>>)> {
    let adapter = adapter.clone();
    let owner = identity.to_string();
    let (messages, contacts) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        Ok((
            adapter.load(&owner, CollectionKind::Messages)?,
            adapter.load(&owner, CollectionKind::Contacts)?,
        ))
    })
    .await
    .map_err(StoreError::persistence)?
    .map_err(StoreError::persistence)?;

    let messages = match messages {
        Some(body) => decode_collection(CollectionKind::Messages, &body)?,
        None => Vec::new(),
    };
    let contacts = contacts
        .map(|body| decode_collection(CollectionKind::Contacts, &body))
        .transpose()?;
    Ok((messages, contacts))
}
