use chrono::{DateTime, Utc};

use ephemera_types::models::Contact;

use crate::error::{Result, StoreError};

const DEFAULT_NAME_PREFIX_LEN: usize = 6;

/// Address book for one local identity. Addresses are unique.
#[derive(Debug, Clone, Default)]
pub struct ContactDirectory {
    contacts: Vec<Contact>,
}

impl ContactDirectory {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self { contacts }
    }

    /// Add a contact, deriving a name from the address when none is given.
    pub fn add(&mut self, address: &str, name: Option<&str>, now: DateTime<Utc>) -> Result<Contact> {
        let address = address.trim();
        if address.is_empty() {
            return Err(StoreError::InvalidAddress);
        }
        if self.find(address).is_some() {
            return Err(StoreError::DuplicateContact(address.to_string()));
        }

        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_contact_name(address));

        let contact = Contact::new(address, name).with_last_active(now);
        self.contacts.push(contact.clone());
        Ok(contact)
    }

    /// All contacts in insertion order.
    pub fn all(&self) -> Vec<Contact> {
        self.contacts.clone()
    }

    pub fn find(&self, address: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.address == address)
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

/// `User-` plus the first six characters of the address.
pub fn default_contact_name(address: &str) -> String {
    let prefix: String = address.chars().take(DEFAULT_NAME_PREFIX_LEN).collect();
    format!("User-{prefix}")
}
