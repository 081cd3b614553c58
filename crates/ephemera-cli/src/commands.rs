use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use uuid::Uuid;

use ephemera_core::{Messenger, StoreError};
use ephemera_db::Database;
use ephemera_types::display::{expiry_label, last_active_label, short_address};
use ephemera_types::models::Contact;

pub const HELP: &str = "\
commands:
  connect <identity>            become <identity> (switches if already connected)
  disconnect                    forget the active identity
  whoami                        show the active identity
  identities                    identities with stored data
  contacts                      list contacts with unread counts
  add <address> [name...]       add a contact
  open <address>                open a conversation and mark it read
  close                         leave the open conversation
  send [@address] [+min] text   send to <address> or the open conversation,
                                optionally expiring after <min> minutes
  read <id>                     mark a message read
  delete <id>                   delete a message
  unread <address>              unread count from <address>
  sweep                         purge expired messages now
  help                          this text
  quit                          exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(String),
    Disconnect,
    WhoAmI,
    Identities,
    Contacts,
    Add { address: String, name: Option<String> },
    Open(String),
    Close,
    Send {
        recipient: Option<String>,
        ttl_minutes: Option<u32>,
        text: String,
    },
    Read(Uuid),
    Delete(Uuid),
    Unread(String),
    Sweep,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match verb.to_ascii_lowercase().as_str() {
            "connect" => Command::Connect(required(rest, "connect <identity>")?),
            "disconnect" => Command::Disconnect,
            "whoami" => Command::WhoAmI,
            "identities" => Command::Identities,
            "contacts" => Command::Contacts,
            "add" => {
                let (address, name) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let name = name.trim();
                Command::Add {
                    address: required(address, "add <address> [name]")?,
                    name: (!name.is_empty()).then(|| name.to_string()),
                }
            }
            "open" => Command::Open(required(rest, "open <address>")?),
            "close" => Command::Close,
            "send" => parse_send(rest)?,
            "read" => Command::Read(parse_id(rest)?),
            "delete" | "rm" => Command::Delete(parse_id(rest)?),
            "unread" => Command::Unread(required(rest, "unread <address>")?),
            "sweep" => Command::Sweep,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command {other:?}, try `help`"),
        };
        Ok(Some(command))
    }
}

fn required(arg: &str, usage: &str) -> Result<String> {
    let arg = arg.trim();
    if arg.is_empty() {
        bail!("usage: {usage}");
    }
    Ok(arg.to_string())
}

fn parse_id(arg: &str) -> Result<Uuid> {
    Uuid::parse_str(arg.trim()).map_err(|e| anyhow!("not a message id: {e}"))
}

fn parse_send(mut rest: &str) -> Result<Command> {
    let mut recipient = None;
    let mut ttl_minutes = None;

    loop {
        let (word, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if let Some(address) = word.strip_prefix('@').filter(|a| !a.is_empty()) {
            recipient = Some(address.to_string());
        } else if let Some(minutes) = word.strip_prefix('+').filter(|m| !m.is_empty()) {
            ttl_minutes = Some(
                minutes
                    .parse()
                    .map_err(|_| anyhow!("expiry must be whole minutes, got {minutes:?}"))?,
            );
        } else {
            break;
        }
        rest = tail.trim_start();
    }

    Ok(Command::Send {
        recipient,
        ttl_minutes,
        text: required(rest, "send [@address] [+minutes] <text>")?,
    })
}

/// Run one command against the messenger. Returns `false` when the user asked to quit.
pub async fn execute(messenger: &Messenger, db: &Arc<Database>, command: Command) -> Result<bool> {
    match command {
        Command::Connect(identity) => {
            messenger.identity_changed(Some(identity)).await?;
            if let Some(identity) = messenger.current_identity().await {
                println!("connected as {}", short_address(&identity));
            }
        }
        Command::Disconnect => {
            messenger.identity_changed(None).await?;
            println!("disconnected");
        }
        Command::WhoAmI => match messenger.current_identity().await {
            Some(identity) => println!("{identity}"),
            None => println!("not connected"),
        },
        Command::Identities => {
            let db = db.clone();
            let identities = tokio::task::spawn_blocking(move || db.identities()).await??;
            if identities.is_empty() {
                println!("no stored identities");
            }
            for identity in identities {
                println!("{identity}");
            }
        }
        Command::Contacts => {
            let now = messenger.now();
            let contacts = messenger.contacts().await;
            if contacts.is_empty() {
                println!("no contacts");
            }
            for contact in contacts {
                let unread = messenger.unread_count_from(&contact.address).await;
                let badge = if unread > 0 { format!("  [{unread} unread]") } else { String::new() };
                println!(
                    "{:<12} {}  {}{}",
                    contact.display_name(),
                    short_address(&contact.address),
                    last_active_label(contact.last_active, now),
                    badge
                );
            }
        }
        Command::Add { address, name } => {
            let contact = messenger.add_contact(&address, name.as_deref()).await?;
            println!("added {} ({})", contact.display_name(), short_address(&contact.address));
        }
        Command::Open(address) => {
            let contact = messenger
                .find_contact(&address)
                .await
                .unwrap_or_else(|| Contact {
                    address: address.clone(),
                    name: None,
                    last_active: None,
                });
            messenger.select_conversation(&contact).await?;
            print_conversation(messenger, &contact).await?;
        }
        Command::Close => {
            messenger.session().await?.clear_selection();
        }
        Command::Send {
            recipient,
            ttl_minutes,
            text,
        } => {
            let recipient = match recipient {
                Some(recipient) => recipient,
                None => messenger
                    .selected_contact()
                    .await
                    .map(|c| c.address)
                    .ok_or_else(|| anyhow!("no open conversation, use `send @address ...`"))?,
            };
            let message = messenger.send(&recipient, &text, ttl_minutes).await?;
            println!("sent {}", message.id);
        }
        Command::Read(id) => {
            if !messenger.mark_read(id).await? {
                println!("nothing to mark");
            }
        }
        Command::Delete(id) => {
            if !messenger.delete_message(id).await? {
                println!("no such message");
            }
        }
        Command::Unread(address) => {
            println!("{}", messenger.unread_count_from(&address).await);
        }
        Command::Sweep => {
            let purged = messenger.sweep().await?;
            println!("purged {purged} expired message(s)");
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

async fn print_conversation(messenger: &Messenger, contact: &Contact) -> Result<()> {
    let session = messenger.session().await?;
    let now = session.now();
    let conversation = session.conversation_with(&contact.address);

    println!("-- {} ({}) --", contact.display_name(), short_address(&contact.address));
    if conversation.is_empty() {
        println!("no messages yet");
    }
    for message in &conversation {
        let who = if message.sender == session.identity() {
            "you"
        } else {
            contact.display_name()
        };
        let text = match session.reveal(message) {
            Ok(text) => text,
            Err(StoreError::Codec(_)) => "<unreadable>".to_string(),
            Err(e) => return Err(e.into()),
        };
        let expiry = expiry_label(message.expires_at, now)
            .map(|label| format!(" ({label})"))
            .unwrap_or_default();
        println!(
            "[{}] {}: {}{}  {}",
            message.timestamp.format("%H:%M"),
            who,
            text,
            expiry,
            message.id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(
            Command::parse("connect 0xabc").unwrap(),
            Some(Command::Connect("0xabc".into()))
        );
        assert_eq!(Command::parse("QUIT").unwrap(), Some(Command::Quit));
        assert!(Command::parse("connect").is_err());
        assert!(Command::parse("dance").is_err());
    }

    #[test]
    fn add_takes_multi_word_name() {
        assert_eq!(
            Command::parse("add 0xabc Mary Ann").unwrap(),
            Some(Command::Add {
                address: "0xabc".into(),
                name: Some("Mary Ann".into())
            })
        );
        assert_eq!(
            Command::parse("add 0xabc").unwrap(),
            Some(Command::Add {
                address: "0xabc".into(),
                name: None
            })
        );
    }

    #[test]
    fn send_options() {
        assert_eq!(
            Command::parse("send @0xbob +5 see you soon").unwrap(),
            Some(Command::Send {
                recipient: Some("0xbob".into()),
                ttl_minutes: Some(5),
                text: "see you soon".into()
            })
        );
        assert_eq!(
            Command::parse("send hello").unwrap(),
            Some(Command::Send {
                recipient: None,
                ttl_minutes: None,
                text: "hello".into()
            })
        );
        assert!(Command::parse("send +soon hi").is_err());
        assert!(Command::parse("send @0xbob").is_err());
    }

    #[test]
    fn ids_must_be_uuids() {
        let id = Uuid::new_v4();
        assert_eq!(
            Command::parse(&format!("delete {id}")).unwrap(),
            Some(Command::Delete(id))
        );
        assert!(Command::parse("read 42").is_err());
    }
}
