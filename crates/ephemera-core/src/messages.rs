use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use ephemera_types::models::Message;

use crate::error::{Result, StoreError};

/// In-memory message collection for one local identity.
///
/// Insertion order is preserved; it breaks timestamp ties in conversations.
/// Every query takes `now` and hides expired messages whether or not the sweep
/// has purged them yet.
#[derive(Debug, Clone)]
pub struct MessageStore {
    owner: String,
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new(owner: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            owner: owner.into(),
            messages,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Full collection in insertion order, expired entries included.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Store a message from the owner to `recipient`.
    ///
    /// `content` is the already-encoded payload; emptiness is checked by the
    /// caller on the plaintext.
    pub fn compose(
        &mut self,
        recipient: &str,
        content: String,
        is_encrypted: bool,
        ttl_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Message> {
        let recipient = normalize_address(recipient)?;
        let message = new_message(self.owner.clone(), recipient, content, is_encrypted, ttl_minutes, now);
        self.messages.push(message.clone());
        Ok(message)
    }

    /// Store a message from `sender` addressed to the owner.
    pub fn accept_incoming(
        &mut self,
        sender: &str,
        content: String,
        is_encrypted: bool,
        ttl_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Message> {
        let sender = normalize_address(sender)?;
        let message = new_message(sender, self.owner.clone(), content, is_encrypted, ttl_minutes, now);
        self.messages.push(message.clone());
        Ok(message)
    }

    /// Messages exchanged with `address`, oldest first, expired ones excluded.
    pub fn conversation_with(&self, address: &str, now: DateTime<Utc>) -> Conversation {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.is_between(&self.owner, address) && !m.is_expired_at(now))
            .cloned()
            .collect();
        // stable: equal timestamps keep insertion order
        messages.sort_by_key(|m| m.timestamp);
        Conversation { messages }
    }

    pub fn unread_count_from(&self, address: &str, now: DateTime<Utc>) -> usize {
        self.messages
            .iter()
            .filter(|m| self.is_unread_from(m, address) && !m.is_expired_at(now))
            .count()
    }

    /// Flip one message to read. Returns false for unknown ids, messages
    /// already read, and messages the owner sent.
    pub fn mark_read(&mut self, id: Uuid) -> bool {
        let owner = &self.owner;
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(m) if m.recipient == *owner && m.sender != *owner && !m.is_read => {
                m.is_read = true;
                true
            }
            _ => false,
        }
    }

    /// Mark every unread, unexpired message from `address` to the owner as read.
    pub fn mark_conversation_read(&mut self, address: &str, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut flipped = Vec::new();
        for i in 0..self.messages.len() {
            let m = &self.messages[i];
            if self.is_unread_from(m, address) && !m.is_expired_at(now) {
                self.messages[i].is_read = true;
                flipped.push(self.messages[i].id);
            }
        }
        flipped
    }

    pub fn delete(&mut self, id: Uuid) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    /// Drop every message whose expiry is at or before `now`, returning their ids.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut purged = Vec::new();
        self.messages.retain(|m| {
            if m.is_expired_at(now) {
                purged.push(m.id);
                false
            } else {
                true
            }
        });
        purged
    }

    fn is_unread_from(&self, m: &Message, address: &str) -> bool {
        m.sender == address && m.recipient == self.owner && !m.is_read
    }
}

fn normalize_address(address: &str) -> Result<String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(StoreError::InvalidAddress);
    }
    Ok(address.to_string())
}

fn new_message(
    sender: String,
    recipient: String,
    content: String,
    is_encrypted: bool,
    ttl_minutes: Option<u32>,
    now: DateTime<Utc>,
) -> Message {
    // A zero TTL means "no expiry", same as omitting it.
    let expires_at = ttl_minutes
        .filter(|minutes| *minutes > 0)
        .map(|minutes| now + Duration::minutes(i64::from(minutes)));

    Message {
        id: Uuid::new_v4(),
        sender,
        recipient,
        content,
        timestamp: now,
        expires_at,
        is_read: false,
        is_encrypted,
    }
}

/// Snapshot of one conversation. Owns copies, so it can be iterated any
/// number of times without touching the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn into_vec(self) -> Vec<Message> {
        self.messages
    }
}

impl IntoIterator for Conversation {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ME: &str = "0xme";
    const BOB: &str = "0xbob";
    const CAROL: &str = "0xcarol";

    fn t(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn store() -> MessageStore {
        MessageStore::new(ME, Vec::new())
    }

    #[test]
    fn compose_fills_in_message() {
        let mut store = store();
        let msg = store.compose(BOB, "hi".into(), false, None, t(1_000)).unwrap();
        assert_eq!(msg.sender, ME);
        assert_eq!(msg.recipient, BOB);
        assert_eq!(msg.timestamp, t(1_000));
        assert_eq!(msg.expires_at, None);
        assert!(!msg.is_read);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ttl_sets_expiry_and_zero_means_none() {
        let mut store = store();
        let five = store.compose(BOB, "a".into(), false, Some(5), t(0)).unwrap();
        assert_eq!(five.expires_at, Some(t(300_000)));
        let zero = store.compose(BOB, "b".into(), false, Some(0), t(0)).unwrap();
        assert_eq!(zero.expires_at, None);
    }

    #[test]
    fn blank_recipient_is_rejected() {
        let mut store = store();
        assert_eq!(
            store.compose("   ", "hi".into(), false, None, t(0)),
            Err(StoreError::InvalidAddress)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn ids_are_unique_at_identical_timestamps() {
        let mut store = store();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..500 {
            let msg = store.compose(BOB, "x".into(), false, None, t(42)).unwrap();
            assert!(ids.insert(msg.id));
        }
    }

    #[test]
    fn conversation_filters_by_pair_and_sorts() {
        let mut store = store();
        store.accept_incoming(BOB, "second".into(), false, None, t(2_000)).unwrap();
        store.compose(CAROL, "other".into(), false, None, t(1_500)).unwrap();
        store.compose(BOB, "first".into(), false, None, t(1_000)).unwrap();
        store.compose(BOB, "tie-a".into(), false, None, t(3_000)).unwrap();
        store.accept_incoming(BOB, "tie-b".into(), false, None, t(3_000)).unwrap();

        let contents: Vec<_> = store
            .conversation_with(BOB, t(10_000))
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["first", "second", "tie-a", "tie-b"]);
    }

    #[test]
    fn conversation_can_be_iterated_twice() {
        let mut store = store();
        store.compose(BOB, "hi".into(), false, None, t(0)).unwrap();
        let convo = store.conversation_with(BOB, t(0));
        assert_eq!(convo.iter().count(), 1);
        assert_eq!((&convo).into_iter().count(), 1);
    }

    #[test]
    fn expired_messages_are_hidden_before_purge() {
        let mut store = store();
        store.accept_incoming(BOB, "gone soon".into(), false, Some(5), t(0)).unwrap();

        assert_eq!(store.conversation_with(BOB, t(299_999)).len(), 1);
        assert_eq!(store.unread_count_from(BOB, t(299_999)), 1);

        assert!(store.conversation_with(BOB, t(300_001)).is_empty());
        assert_eq!(store.unread_count_from(BOB, t(300_001)), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn mark_read_only_applies_to_received_unread() {
        let mut store = store();
        let sent = store.compose(BOB, "mine".into(), false, None, t(0)).unwrap();
        let got = store.accept_incoming(BOB, "theirs".into(), false, None, t(1)).unwrap();

        assert!(!store.mark_read(sent.id));
        assert!(store.mark_read(got.id));
        assert!(!store.mark_read(got.id));
        assert!(!store.mark_read(Uuid::new_v4()));

        let convo = store.conversation_with(BOB, t(2)).into_vec();
        assert!(!convo[0].is_read);
        assert!(convo[1].is_read);
    }

    #[test]
    fn mark_conversation_read_touches_only_that_sender() {
        let mut store = store();
        let a = store.accept_incoming(BOB, "1".into(), false, None, t(0)).unwrap();
        let b = store.accept_incoming(BOB, "2".into(), false, None, t(1)).unwrap();
        store.accept_incoming(CAROL, "3".into(), false, None, t(2)).unwrap();
        store.compose(BOB, "4".into(), false, None, t(3)).unwrap();

        assert_eq!(store.mark_conversation_read(BOB, t(4)), vec![a.id, b.id]);
        assert!(store.mark_conversation_read(BOB, t(4)).is_empty());
        assert_eq!(store.unread_count_from(BOB, t(4)), 0);
        assert_eq!(store.unread_count_from(CAROL, t(4)), 1);
    }

    #[test]
    fn mark_conversation_read_skips_expired_messages() {
        let mut store = store();
        let stale = store.accept_incoming(BOB, "gone".into(), false, Some(1), t(0)).unwrap();
        let live = store.accept_incoming(BOB, "here".into(), false, None, t(1)).unwrap();

        assert_eq!(store.mark_conversation_read(BOB, t(61_000)), vec![live.id]);
        let stale = store.messages().iter().find(|m| m.id == stale.id).unwrap();
        assert!(!stale.is_read);
    }

    #[test]
    fn delete_is_idempotent() {
        let mut store = store();
        let msg = store.compose(BOB, "x".into(), false, None, t(0)).unwrap();
        assert!(store.delete(msg.id));
        assert!(!store.delete(msg.id));
        assert!(store.is_empty());
    }

    #[test]
    fn purge_removes_only_expired() {
        let mut store = store();
        let old = store.compose(BOB, "old".into(), false, Some(1), t(0)).unwrap();
        let keep = store.compose(BOB, "keep".into(), false, Some(10), t(0)).unwrap();
        store.compose(BOB, "forever".into(), false, None, t(0)).unwrap();

        assert_eq!(store.purge_expired(t(60_000)), vec![old.id]);
        assert!(store.purge_expired(t(60_000)).is_empty());
        assert_eq!(store.len(), 2);
        assert!(store.messages().iter().any(|m| m.id == keep.id));
    }
}
