use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ephemera_core::{IncomingMessage, Messenger};
use ephemera_types::events::StoreEvent;
use ephemera_types::models::Message;

const REPLIES: &[&str] = &[
    "Got it, thanks!",
    "Message received loud and clear.",
    "Thanks for reaching out, talk soon.",
    "Nice, that came through instantly.",
    "Read you. Will get back to you later.",
];

/// Demo stand-in for the other side of a conversation.
///
/// Watches for sent messages and, half of the time, delivers a canned reply
/// from the recipient a few seconds later. Replies go through
/// [`Messenger::deliver`] like any other incoming traffic, so they are dropped
/// if the sender has disconnected in the meantime.
pub fn spawn(messenger: Arc<Messenger>) -> JoinHandle<()> {
    let mut events = messenger.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StoreEvent::MessageSent { message }) => schedule_reply(&messenger, message),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Responder skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn schedule_reply(messenger: &Arc<Messenger>, message: Message) {
    let (delay, reply) = {
        let mut rng = rand::rng();
        if !rng.random_bool(0.5) {
            return;
        }
        let delay = Duration::from_millis(rng.random_range(3_000..13_000));
        (delay, REPLIES[rng.random_range(0..REPLIES.len())])
    };

    let messenger = messenger.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let incoming = IncomingMessage {
            sender: message.recipient,
            recipient: message.sender,
            content: reply.to_string(),
            ttl_minutes: None,
        };
        match messenger.deliver(incoming).await {
            Ok(Some(reply)) => debug!("Auto-reply {} delivered", reply.id),
            Ok(None) => debug!("Auto-reply dropped, recipient no longer connected"),
            Err(e) => warn!("Auto-reply failed: {}", e),
        }
    });
}
