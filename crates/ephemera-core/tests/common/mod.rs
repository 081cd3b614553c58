#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::broadcast;

use ephemera_core::{ManualClock, MemoryPersistence, Messenger, StoreConfig};
use ephemera_crypto::ContentCodec;
use ephemera_types::events::StoreEvent;
use ephemera_types::models::{CollectionKind, Message};

pub const ALICE: &str = "0xA11CE000000000000000000000000000000000AA";
pub const BOB: &str = "0xB0B00000000000000000000000000000000000BB";
pub const CAROL: &str = "0xCA2010000000000000000000000000000000000CC";

pub struct Harness {
    pub store: Arc<MemoryPersistence>,
    pub clock: Arc<ManualClock>,
    pub messenger: Messenger,
}

impl Harness {
    /// Sweep timer effectively off; tests drive sweeps by hand.
    pub fn new() -> Self {
        Self::with_config(StoreConfig {
            sweep_interval: Duration::from_secs(3600),
            default_contacts: Vec::new(),
        })
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let store = Arc::new(MemoryPersistence::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        Self::on(store, clock, config)
    }

    /// A fresh messenger over existing storage and time, as after a restart.
    pub fn on(store: Arc<MemoryPersistence>, clock: Arc<ManualClock>, config: StoreConfig) -> Self {
        let messenger = Messenger::new(store.clone(), config).with_clock(clock.clone());
        Self {
            store,
            clock,
            messenger,
        }
    }

    pub fn with_codec(self, codec: Arc<dyn ContentCodec>) -> Self {
        Self {
            messenger: self.messenger.with_codec(codec),
            ..self
        }
    }

    pub async fn connect(&self, identity: &str) {
        self.messenger
            .identity_changed(Some(identity.to_string()))
            .await
            .unwrap();
    }

    /// Messages as currently persisted for `identity`.
    pub fn persisted_messages(&self, identity: &str) -> Vec<Message> {
        self.store
            .stored(identity, CollectionKind::Messages)
            .map(|body| serde_json::from_str(&body).unwrap())
            .unwrap_or_default()
    }
}

pub fn drain(rx: &mut broadcast::Receiver<StoreEvent>) -> Vec<StoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
