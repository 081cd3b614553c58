use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ephemera_types::events::StoreEvent;
use ephemera_types::models::CollectionKind;

use crate::persistence::PersistenceAdapter;

enum WriteOp {
    Save {
        kind: CollectionKind,
        body: String,
        ack: oneshot::Sender<()>,
    },
    /// Wake the writer so it retries snapshots that failed earlier
    RetryFailed,
    Flush(oneshot::Sender<()>),
}

/// Ordered queue of full-collection snapshots for one identity.
///
/// Snapshots are enqueued while the session state lock is held, so the queue
/// order is the mutation order. The writer keeps only the newest queued
/// snapshot per collection and acknowledges every enqueued write once the
/// newest one has been attempted.
#[derive(Clone)]
pub(crate) struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl WriteQueue {
    pub(crate) fn spawn(
        identity: String,
        adapter: Arc<dyn PersistenceAdapter>,
        events: broadcast::Sender<StoreEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(identity, adapter, events, rx));
        (Self { tx }, handle)
    }

    /// Enqueue a snapshot. The receiver resolves after the write was attempted,
    /// or immediately with an error if the writer is gone.
    pub(crate) fn save(&self, kind: CollectionKind, body: String) -> oneshot::Receiver<()> {
        let (ack, done) = oneshot::channel();
        let _ = self.tx.send(WriteOp::Save { kind, body, ack });
        done
    }

    pub(crate) fn retry_failed(&self) {
        let _ = self.tx.send(WriteOp::RetryFailed);
    }

    /// Wait until everything enqueued before this call has been attempted.
    pub(crate) async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

async fn run_writer(
    identity: String,
    adapter: Arc<dyn PersistenceAdapter>,
    events: broadcast::Sender<StoreEvent>,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
) {
    // Newest snapshot per collection whose last write failed
    let mut failed: HashMap<CollectionKind, String> = HashMap::new();

    while let Some(op) = rx.recv().await {
        let mut batch = vec![op];
        while let Ok(op) = rx.try_recv() {
            batch.push(op);
        }

        let mut latest: HashMap<CollectionKind, String> = HashMap::new();
        let mut acks = Vec::new();
        for op in batch {
            match op {
                WriteOp::Save { kind, body, ack } => {
                    latest.insert(kind, body);
                    acks.push(ack);
                }
                WriteOp::RetryFailed => {}
                WriteOp::Flush(ack) => acks.push(ack),
            }
        }
        for (kind, body) in failed.drain() {
            latest.entry(kind).or_insert(body);
        }

        for kind in CollectionKind::ALL {
            let Some(body) = latest.remove(&kind) else {
                continue;
            };
            match write(&adapter, &identity, kind, body.clone()).await {
                Ok(()) => debug!("Saved {}", kind.storage_key(&identity)),
                Err(error) => {
                    warn!("Saving {} failed: {}", kind.storage_key(&identity), error);
                    let _ = events.send(StoreEvent::PersistenceFailed {
                        identity: identity.clone(),
                        kind,
                        error,
                    });
                    failed.insert(kind, body);
                }
            }
        }

        for ack in acks {
            let _ = ack.send(());
        }
    }

    if !failed.is_empty() {
        warn!(
            "Writer for {} stopped with {} unsaved collection(s)",
            identity,
            failed.len()
        );
    }
    debug!("Writer for {} stopped", identity);
}

/// Run one save off the async runtime.
async fn write(
    adapter: &Arc<dyn PersistenceAdapter>,
    identity: &str,
    kind: CollectionKind,
    body: String,
) -> Result<(), String> {
    let adapter = adapter.clone();
    let identity = identity.to_string();
    tokio::task::spawn_blocking(move || adapter.save(&identity, kind, &body))
        .await
        .map_err(|e| format!("write task failed: {}", e))?
        .map_err(|e| e.to_string())
}
