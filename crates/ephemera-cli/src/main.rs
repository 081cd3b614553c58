mod commands;
mod config;
mod responder;

use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use ephemera_core::{Messenger, StoreConfig};
use ephemera_crypto::SealedCodec;
use ephemera_db::Database;
use ephemera_types::display::short_address;
use ephemera_types::events::StoreEvent;

use crate::commands::Command;
use crate::config::{Config, DEFAULT_LOG_FILTER, demo_contacts};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with command output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    let db = Arc::new(Database::open(&config.db_path)?);

    let store_config = StoreConfig {
        sweep_interval: config.sweep_interval,
        default_contacts: if config.demo_contacts {
            demo_contacts(Utc::now())
        } else {
            Vec::new()
        },
    };

    let mut messenger = Messenger::new(db.clone(), store_config);
    if let Some(key) = &config.content_key {
        info!("Message content is sealed with AES-256-GCM");
        messenger = messenger.with_codec(Arc::new(SealedCodec::new(key)));
    }
    let messenger = Arc::new(messenger);

    tokio::spawn(print_notifications(messenger.clone()));
    if config.auto_reply {
        info!("Demo auto-responder enabled");
        responder::spawn(messenger.clone());
    }

    if let Some(identity) = config.identity.clone() {
        if let Err(e) = messenger.identity_changed(Some(identity)).await {
            warn!("Startup identity not connected: {}", e);
        }
    }

    println!("ephemera ready, type `help` for commands");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else {
            break;
        };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match commands::execute(&messenger, &db, command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {e}"),
        }
    }

    messenger.shutdown().await;
    info!("Goodbye");
    Ok(())
}

/// Toast-style feedback for store events.
async fn print_notifications(messenger: Arc<Messenger>) {
    let mut events = messenger.subscribe();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Dropped {} notifications", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            StoreEvent::MessageSent { .. } => println!("* message sent"),
            StoreEvent::MessageSendRejected { reason } => println!("* message not sent: {reason}"),
            StoreEvent::MessageReceived { message } => {
                let from = messenger
                    .find_contact(&message.sender)
                    .await
                    .map(|c| c.display_name().to_string())
                    .unwrap_or_else(|| short_address(&message.sender));
                println!("* new message from {from}");
            }
            StoreEvent::MessageDeleted { .. } => println!("* message deleted"),
            StoreEvent::MessagesExpired { ids } => println!("* {} message(s) expired", ids.len()),
            StoreEvent::ContactAdded { contact } => {
                println!("* contact {} added", contact.display_name())
            }
            StoreEvent::ContactAddRejected { reason, .. } => println!("* contact not added: {reason}"),
            StoreEvent::PersistenceFailed { error, .. } => {
                println!("* not saved yet, will retry: {error}")
            }
            StoreEvent::IdentityChanged { .. } | StoreEvent::MessagesRead { .. } => {}
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
