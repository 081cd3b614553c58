//! Human-readable labels for addresses, expiry countdowns and contact activity.

use chrono::{DateTime, Utc};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// `0x1CF5...E17D` style abbreviation. Short addresses are returned unchanged.
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Countdown until a message expires, or `None` for messages without a TTL.
pub fn expiry_label(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<String> {
    let left = (expires_at? - now).num_milliseconds();
    let label = if left <= 0 {
        "Expired".to_string()
    } else if left < MINUTE_MS {
        "< 1m left".to_string()
    } else if left < HOUR_MS {
        format!("{}m left", left / MINUTE_MS)
    } else {
        format!("{}h {}m left", left / HOUR_MS, (left % HOUR_MS) / MINUTE_MS)
    };
    Some(label)
}

pub fn last_active_label(last_active: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last_active) = last_active else {
        return "Never".to_string();
    };
    let ago = (now - last_active).num_milliseconds();
    if ago < MINUTE_MS {
        "Just now".to_string()
    } else if ago < HOUR_MS {
        format!("{}m ago", ago / MINUTE_MS)
    } else if ago < DAY_MS {
        format!("{}h ago", ago / HOUR_MS)
    } else {
        format!("{}d ago", ago / DAY_MS)
    }
}
