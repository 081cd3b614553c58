//! Per-identity ephemeral message store.
//!
//! A [`Messenger`] follows the active identity. Each connected identity gets a
//! [`Session`] that owns the message and contact collections, serializes every
//! mutation, writes snapshots behind through a single writer task and purges
//! expired messages on a timer.

pub mod clock;
pub mod contacts;
pub mod error;
pub mod messages;
pub mod messenger;
pub mod persistence;
pub mod session;

mod sweep;
mod writer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use contacts::ContactDirectory;
pub use error::{Result, StoreError};
pub use messages::{Conversation, MessageStore};
pub use messenger::{IncomingMessage, Messenger};
pub use persistence::{MemoryPersistence, PersistenceAdapter};
pub use session::{Services, Session, StoreConfig};
