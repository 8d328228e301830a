//! Alert records written by monitored devices.
//!
//! An alert record lives at `alerts/{deviceId}/{timestamp}` in the store. It
//! is created once by the device and never modified afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level store key under which alert records live.
pub const ALERTS_ROOT: &str = "alerts";

/// Classification of an alert's `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// SOS button pressed.
    Sos,
    /// Panic button pressed.
    Panic,
    /// Device entered a geofence.
    Entry,
    /// Device left a geofence.
    Exit,
    /// Any other or missing status.
    Other,
}

impl AlertStatus {
    /// Classify a raw status value. Matching is exact and case-sensitive.
    #[must_use]
    pub fn classify(raw: Option<&str>) -> Self {
        match raw {
            Some("sos") => Self::Sos,
            Some("panic") => Self::Panic,
            Some("entry") => Self::Entry,
            Some("exit") => Self::Exit,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sos => write!(f, "sos"),
            Self::Panic => write!(f, "panic"),
            Self::Entry => write!(f, "entry"),
            Self::Exit => write!(f, "exit"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// The field values of an alert record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Raw status as written by the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Latitude, if the device reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    /// Longitude, if the device reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

impl AlertRecord {
    /// Read the fields out of a stored record value.
    ///
    /// Lenient by construction: a value that is not an object has no fields,
    /// coordinates that are not numbers are absent, and a non-string status
    /// keeps its JSON text.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Some(fields) = value.as_object() else {
            return Self::default();
        };

        let status = match fields.get("status") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        Self {
            status,
            lat: fields.get("lat").and_then(Value::as_f64),
            lng: fields.get("lng").and_then(Value::as_f64),
        }
    }

    /// The classified status.
    #[must_use]
    pub fn kind(&self) -> AlertStatus {
        AlertStatus::classify(self.status.as_deref())
    }
}

/// A creation event for one alert record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Device that raised the alert (second path segment).
    pub device_id: String,
    /// Record key (third path segment), passed through verbatim.
    pub timestamp: String,
    /// The record's field values.
    pub record: AlertRecord,
}

impl AlertEvent {
    /// Create an event from a record path and its stored value.
    ///
    /// Returns `None` when `path` does not address an alert record.
    #[must_use]
    pub fn from_record(path: &str, value: &Value) -> Option<Self> {
        let (device_id, timestamp) = parse_record_path(path)?;
        Some(Self {
            device_id: device_id.to_string(),
            timestamp: timestamp.to_string(),
            record: AlertRecord::from_value(value),
        })
    }

    /// The store path of the record.
    #[must_use]
    pub fn path(&self) -> String {
        record_path(&self.device_id, &self.timestamp)
    }
}

/// Build the store path of an alert record.
#[must_use]
pub fn record_path(device_id: &str, timestamp: &str) -> String {
    format!("{ALERTS_ROOT}/{device_id}/{timestamp}")
}

/// Split `alerts/{deviceId}/{timestamp}` into its two parameters.
#[must_use]
pub fn parse_record_path(path: &str) -> Option<(&str, &str)> {
    let mut segments = path.trim_matches('/').split('/');
    let root = segments.next()?;
    let device_id = segments.next()?;
    let timestamp = segments.next()?;

    if root != ALERTS_ROOT
        || device_id.is_empty()
        || timestamp.is_empty()
        || segments.next().is_some()
    {
        return None;
    }
    Some((device_id, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_known_statuses() {
        assert_eq!(AlertStatus::classify(Some("sos")), AlertStatus::Sos);
        assert_eq!(AlertStatus::classify(Some("panic")), AlertStatus::Panic);
        assert_eq!(AlertStatus::classify(Some("entry")), AlertStatus::Entry);
        assert_eq!(AlertStatus::classify(Some("exit")), AlertStatus::Exit);
    }

    #[test]
    fn test_classify_is_case_sensitive() {
        assert_eq!(AlertStatus::classify(Some("SOS")), AlertStatus::Other);
        assert_eq!(AlertStatus::classify(Some("unknown")), AlertStatus::Other);
        assert_eq!(AlertStatus::classify(None), AlertStatus::Other);
    }

    #[test]
    fn test_record_from_object() {
        let record = AlertRecord::from_value(&json!({
            "status": "panic",
            "lat": 12.345_67,
            "lng": 56.789_01
        }));

        assert_eq!(record.status.as_deref(), Some("panic"));
        assert_eq!(record.lat, Some(12.345_67));
        assert_eq!(record.lng, Some(56.789_01));
        assert_eq!(record.kind(), AlertStatus::Panic);
    }

    #[test]
    fn test_record_integer_coordinates() {
        let record = AlertRecord::from_value(&json!({"status": "exit", "lat": 12, "lng": -3}));
        assert_eq!(record.lat, Some(12.0));
        assert_eq!(record.lng, Some(-3.0));
    }

    #[test]
    fn test_record_non_numeric_coordinates_are_absent() {
        let record = AlertRecord::from_value(&json!({"status": "entry", "lat": "12.3"}));
        assert!(record.lat.is_none());
        assert!(record.lng.is_none());
    }

    #[test]
    fn test_record_from_scalar_has_no_fields() {
        let record = AlertRecord::from_value(&json!("sos"));
        assert_eq!(record, AlertRecord::default());
        assert_eq!(record.kind(), AlertStatus::Other);
    }

    #[test]
    fn test_record_non_string_status() {
        let record = AlertRecord::from_value(&json!({"status": 3}));
        assert_eq!(record.status.as_deref(), Some("3"));
        assert_eq!(record.kind(), AlertStatus::Other);
    }

    #[test]
    fn test_parse_record_path() {
        assert_eq!(
            parse_record_path("alerts/child_01/1700000000"),
            Some(("child_01", "1700000000"))
        );
        assert_eq!(
            parse_record_path("/alerts/child_01/1700000000/"),
            Some(("child_01", "1700000000"))
        );
        assert_eq!(parse_record_path("alerts/child_01"), None);
        assert_eq!(parse_record_path("alerts/child_01/1/status"), None);
        assert_eq!(parse_record_path("devices/child_01/1"), None);
    }

    #[test]
    fn test_event_from_record() {
        let event =
            AlertEvent::from_record("alerts/child_01/42", &json!({"status": "sos"})).unwrap();
        assert_eq!(event.device_id, "child_01");
        assert_eq!(event.timestamp, "42");
        assert_eq!(event.record.kind(), AlertStatus::Sos);
        assert_eq!(event.path(), "alerts/child_01/42");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(AlertStatus::Sos.to_string(), "sos");
        assert_eq!(AlertStatus::Other.to_string(), "other");
    }
}
