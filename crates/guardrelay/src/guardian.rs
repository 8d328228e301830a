//! Guardian records and the directory that holds them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A guardian subscribed to one monitored device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianRecord {
    /// Guardian document id.
    pub id: String,
    /// The device this guardian follows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_device_id: Option<String>,
    /// Push delivery handle for the guardian's app installation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcm_token: Option<String>,
    /// When the record was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl GuardianRecord {
    /// Create a record without a timestamp.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        paired_device_id: Option<String>,
        fcm_token: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            paired_device_id,
            fcm_token,
            updated_at: None,
        }
    }

    /// Whether this guardian follows `device_id`.
    #[must_use]
    pub fn is_paired_with(&self, device_id: &str) -> bool {
        self.paired_device_id.as_deref() == Some(device_id)
    }

    /// The push token, treating an empty string as absent.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.fcm_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Read/write access to the guardian collection.
///
/// The dispatcher only reads the collection and clears tokens; the remaining
/// writes exist for administration.
#[async_trait]
pub trait GuardianDirectory: Send + Sync {
    /// Return every guardian record.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    async fn list_guardians(&self) -> Result<Vec<GuardianRecord>>;

    /// Return the guardians paired with `device_id`.
    ///
    /// The default implementation filters a full scan. Directories with an
    /// index on the paired device should override it.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    async fn guardians_paired_with(&self, device_id: &str) -> Result<Vec<GuardianRecord>> {
        let guardians = self.list_guardians().await?;
        Ok(guardians
            .into_iter()
            .filter(|g| g.is_paired_with(device_id))
            .collect())
    }

    /// Delete the `fcmToken` field of one guardian record, leaving the rest.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist or the write fails.
    async fn remove_token(&self, guardian_id: &str) -> Result<()>;
}
