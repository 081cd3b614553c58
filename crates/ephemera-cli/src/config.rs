use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration as TimeDelta, Utc};

use ephemera_crypto::ContentKey;
use ephemera_types::models::Contact;

/// Used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "ephemera=info,ephemera_core=debug";

#[derive(Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub sweep_interval: Duration,
    /// Identity to connect at startup
    pub identity: Option<String>,
    pub demo_contacts: bool,
    pub auto_reply: bool,
    /// `None` stores content in plaintext
    pub content_key: Option<ContentKey>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let sweep_secs: u64 = match get("EPHEMERA_SWEEP_SECS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("EPHEMERA_SWEEP_SECS must be a number, got {v:?}"))?,
            None => 60,
        };
        if sweep_secs == 0 {
            bail!("EPHEMERA_SWEEP_SECS must be at least 1");
        }

        let content_key = get("EPHEMERA_CONTENT_KEY")
            .filter(|v| !v.trim().is_empty())
            .map(|v| ContentKey::from_base64(&v).context("EPHEMERA_CONTENT_KEY is not a valid key"))
            .transpose()?;

        Ok(Self {
            db_path: get("EPHEMERA_DB_PATH")
                .unwrap_or_else(|| "ephemera.db".into())
                .into(),
            sweep_interval: Duration::from_secs(sweep_secs),
            identity: get("EPHEMERA_IDENTITY").filter(|v| !v.trim().is_empty()),
            demo_contacts: flag(&get, "EPHEMERA_DEMO_CONTACTS", true)?,
            auto_reply: flag(&get, "EPHEMERA_AUTO_REPLY", false)?,
            content_key,
        })
    }
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    let Some(value) = get(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key} must be a boolean, got {other:?}"),
    }
}

/// Address book installed the first time an identity connects.
pub fn demo_contacts(now: DateTime<Utc>) -> Vec<Contact> {
    vec![
        Contact::new("0x1CF52AB003BDC14CA1EF074487449DA99941E17D", "Priya")
            .with_last_active(now - TimeDelta::minutes(5)),
        Contact::new("0x2BC23AB53F713859CA5B5FB745334875A3E9CDE2", "Raj")
            .with_last_active(now - TimeDelta::days(1)),
        Contact::new("0x3AD43AB9AF724129CB525FB734240875A4E92D41", "Ananya")
            .with_last_active(now),
        Contact::new("0x4BD43FF9EE724129CB525FB734240875A4E92ABC", "Vikram")
            .with_last_active(now - TimeDelta::hours(2)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("ephemera.db"));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(config.identity.is_none());
        assert!(config.demo_contacts);
        assert!(!config.auto_reply);
        assert!(config.content_key.is_none());
    }

    #[test]
    fn overrides() {
        let key = ContentKey::generate();
        let config = config(&[
            ("EPHEMERA_DB_PATH", "/tmp/x.db"),
            ("EPHEMERA_SWEEP_SECS", "5"),
            ("EPHEMERA_IDENTITY", "0xme"),
            ("EPHEMERA_DEMO_CONTACTS", "off"),
            ("EPHEMERA_AUTO_REPLY", "YES"),
            ("EPHEMERA_CONTENT_KEY", &key.to_base64()),
        ])
        .unwrap();
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.identity.as_deref(), Some("0xme"));
        assert!(!config.demo_contacts);
        assert!(config.auto_reply);
        assert_eq!(config.content_key, Some(key));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("EPHEMERA_SWEEP_SECS", "soon")]).is_err());
        assert!(config(&[("EPHEMERA_SWEEP_SECS", "0")]).is_err());
        assert!(config(&[("EPHEMERA_AUTO_REPLY", "maybe")]).is_err());
        assert!(config(&[("EPHEMERA_CONTENT_KEY", "c2hvcnQ=")]).is_err());
    }

    #[test]
    fn default_log_filter_parses() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        assert!(DEFAULT_LOG_FILTER.contains("ephemera_core=debug"));
    }

    #[test]
    fn demo_contacts_have_unique_addresses() {
        let contacts = demo_contacts(Utc::now());
        let mut addresses: Vec<_> = contacts.iter().map(|c| c.address.clone()).collect();
        addresses.dedup();
        assert_eq!(addresses.len(), 4);
    }
}
