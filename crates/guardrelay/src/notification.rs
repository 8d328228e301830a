//! Notification content for alert records.
//!
//! Template selection is a pure function of the alert status. Coordinates are
//! rendered two different ways on purpose:
//!
//! - the human-readable body rounds to four decimals and drops a missing
//!   coordinate from the sentence (`Location: , 56.7890`);
//! - the data block carries the full value as a string and falls back to
//!   `"0"` when the coordinate is missing.

use serde::{Deserialize, Serialize};

use crate::alert::{AlertEvent, AlertRecord, AlertStatus};

/// Title used for sos and panic alerts.
pub const PANIC_TITLE: &str = "🚨 PANIC ALERT!";
/// Title used for geofence entries.
pub const ENTRY_TITLE: &str = "📍 Geofence Entry";
/// Title used for geofence exits.
pub const EXIT_TITLE: &str = "⚠️ Geofence Exit";
/// Title used for every other status.
pub const GENERIC_TITLE: &str = "🔔 Alert";
/// Body used for every other status.
pub const GENERIC_BODY: &str = "New alert from your device";

/// Decimal places of coordinates in the notification body.
const BODY_COORDINATE_DIGITS: usize = 4;

/// Fractional digits needed to print any finite `f64` exactly.
const EXACT_FRACTION_DIGITS: usize = 1074;

/// How the body of a template is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyTemplate {
    /// A headline followed by a `Location: lat, lng` line.
    Located(&'static str),
    /// A fixed sentence.
    Fixed(&'static str),
}

/// Title and body template for one alert status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    /// Notification title.
    pub title: &'static str,
    /// Notification body template.
    pub body: BodyTemplate,
}

impl Template {
    /// Select the template for `status`.
    #[must_use]
    pub fn for_status(status: AlertStatus) -> Self {
        match status {
            AlertStatus::Sos | AlertStatus::Panic => Self {
                title: PANIC_TITLE,
                body: BodyTemplate::Located("Your device triggered a panic button!"),
            },
            AlertStatus::Entry => Self {
                title: ENTRY_TITLE,
                body: BodyTemplate::Located("Your device entered a geofence."),
            },
            AlertStatus::Exit => Self {
                title: EXIT_TITLE,
                body: BodyTemplate::Located("Your device exited a geofence."),
            },
            AlertStatus::Other => Self {
                title: GENERIC_TITLE,
                body: BodyTemplate::Fixed(GENERIC_BODY),
            },
        }
    }

    /// Render the notification block for `record`.
    #[must_use]
    pub fn render(&self, record: &AlertRecord) -> Notification {
        let body = match self.body {
            BodyTemplate::Located(headline) => format!(
                "{headline}\nLocation: {}, {}",
                body_coordinate(record.lat),
                body_coordinate(record.lng)
            ),
            BodyTemplate::Fixed(text) => text.to_string(),
        };
        Notification {
            title: self.title.to_string(),
            body,
        }
    }
}

/// The user-visible part of a push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
}

/// Key/value payload delivered to the guardian app alongside the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertData {
    /// Device that raised the alert.
    pub device_id: String,
    /// Raw alert status (empty when the record had none).
    pub status: String,
    /// Latitude as a string, `"0"` when absent.
    pub latitude: String,
    /// Longitude as a string, `"0"` when absent.
    pub longitude: String,
    /// Record key of the alert.
    pub timestamp: String,
}

/// A push message addressed to one installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Notification block.
    pub notification: Notification,
    /// Data block.
    pub data: AlertData,
    /// Destination token.
    pub token: String,
}

impl Message {
    /// Build the message announcing `event` to the holder of `token`.
    #[must_use]
    pub fn for_alert(event: &AlertEvent, token: &str) -> Self {
        let record = &event.record;
        Self {
            notification: Template::for_status(record.kind()).render(record),
            data: AlertData {
                device_id: event.device_id.clone(),
                status: record.status.clone().unwrap_or_default(),
                latitude: data_coordinate(record.lat),
                longitude: data_coordinate(record.lng),
                timestamp: event.timestamp.clone(),
            },
            token: token.to_string(),
        }
    }
}

fn body_coordinate(value: Option<f64>) -> String {
    value
        .map(|v| to_fixed(v, BODY_COORDINATE_DIGITS))
        .unwrap_or_default()
}

/// Shortest round-trip decimal. Never uses exponent notation, unlike JS
/// outside `1e-6..1e21`.
fn data_coordinate(value: Option<f64>) -> String {
    match value {
        Some(v) if v != 0.0 => v.to_string(),
        _ => "0".to_string(),
    }
}

/// Format `value` with exactly `digits` fractional digits.
///
/// Rounds the exact binary value half away from zero, so `0.03125` becomes
/// `0.0313` where `format!("{:.4}")` would give `0.0312`.
#[must_use]
pub fn to_fixed(value: f64, digits: usize) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let exact = format!("{:.*}", EXACT_FRACTION_DIGITS, value.abs());
    let (int_part, frac_part) = exact.split_once('.').unwrap_or((exact.as_str(), ""));

    let mut kept: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes().chain(std::iter::repeat(b'0')).take(digits))
        .collect();

    if frac_part.as_bytes().get(digits).is_some_and(|d| *d >= b'5') {
        let mut carry = true;
        for d in kept.iter_mut().rev() {
            if *d == b'9' {
                *d = b'0';
            } else {
                *d += 1;
                carry = false;
                break;
            }
        }
        if carry {
            kept.insert(0, b'1');
        }
    }

    let int_len = kept.len() - digits;
    let mut out = String::with_capacity(kept.len() + 2);
    if value < 0.0 {
        out.push('-');
    }
    out.extend(kept[..int_len].iter().map(|&b| char::from(b)));
    if digits > 0 {
        out.push('.');
        out.extend(kept[int_len..].iter().map(|&b| char::from(b)));
    }
    out
}
