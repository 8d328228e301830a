//! Notification fan-out for newly created alert records.
//!
//! One call to [`Dispatcher::on_alert_created`] handles one creation event:
//! look up the guardians paired with the device, send each of them one
//! message, and clear tokens the push service reports as dead. Every guardian
//! is handled on its own; nothing is retried and no failure stops the rest of
//! the batch.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::alert::AlertEvent;
use crate::guardian::{GuardianDirectory, GuardianRecord};
use crate::messaging::{Messenger, SendError};
use crate::notification::Message;

/// What happened for one guardian during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GuardianOutcome {
    /// The push service accepted the message.
    Delivered {
        /// Guardian document id.
        guardian_id: String,
        /// Message id returned by the push service.
        message_id: String,
    },
    /// The guardian has no push token; nothing was sent.
    SkippedNoToken {
        /// Guardian document id.
        guardian_id: String,
    },
    /// The token was dead and has been removed from the guardian record.
    TokenRemoved {
        /// Guardian document id.
        guardian_id: String,
        /// The send failure that triggered the cleanup.
        #[serde(serialize_with = "serialize_send_error")]
        error: SendError,
    },
    /// The token was dead but removing it failed.
    CleanupFailed {
        /// Guardian document id.
        guardian_id: String,
        /// The send failure that triggered the cleanup.
        #[serde(serialize_with = "serialize_send_error")]
        error: SendError,
        /// Why the cleanup failed.
        reason: String,
    },
    /// The send failed for a reason unrelated to the token.
    SendFailed {
        /// Guardian document id.
        guardian_id: String,
        /// The send failure.
        #[serde(serialize_with = "serialize_send_error")]
        error: SendError,
    },
}

fn serialize_send_error<S: serde::Serializer>(
    error: &SendError,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&error.to_string())
}

impl GuardianOutcome {
    /// The guardian this outcome belongs to.
    #[must_use]
    pub fn guardian_id(&self) -> &str {
        match self {
            Self::Delivered { guardian_id, .. }
            | Self::SkippedNoToken { guardian_id }
            | Self::TokenRemoved { guardian_id, .. }
            | Self::CleanupFailed { guardian_id, .. }
            | Self::SendFailed { guardian_id, .. } => guardian_id,
        }
    }

    /// Whether a send was attempted for this guardian.
    #[must_use]
    pub fn attempted(&self) -> bool {
        !matches!(self, Self::SkippedNoToken { .. })
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Device that raised the alert.
    pub device_id: String,
    /// Record key of the alert.
    pub timestamp: String,
    /// One entry per paired guardian, in directory order.
    pub outcomes: Vec<GuardianOutcome>,
    /// Set when the dispatch stopped before fan-out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl DispatchReport {
    fn new(event: &AlertEvent) -> Self {
        Self {
            device_id: event.device_id.clone(),
            timestamp: event.timestamp.clone(),
            outcomes: Vec::new(),
            aborted: None,
        }
    }

    /// Number of send attempts.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.outcomes.iter().filter(|o| o.attempted()).count()
    }

    /// Number of messages the push service accepted.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, GuardianOutcome::Delivered { .. }))
            .count()
    }
}

/// Fans alert notifications out to paired guardians.
#[derive(Clone)]
pub struct Dispatcher {
    directory: Arc<dyn GuardianDirectory>,
    messenger: Arc<dyn Messenger>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("messenger", &self.messenger)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher over a guardian directory and a push transport.
    #[must_use]
    pub fn new(directory: Arc<dyn GuardianDirectory>, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            directory,
            messenger,
        }
    }

    /// Handle the creation of one alert record.
    ///
    /// Never fails: a directory error is logged and recorded in
    /// [`DispatchReport::aborted`].
    pub async fn on_alert_created(&self, event: &AlertEvent) -> DispatchReport {
        let mut report = DispatchReport::new(event);
        info!(
            device_id = %event.device_id,
            timestamp = %event.timestamp,
            status = event.record.status.as_deref().unwrap_or(""),
            "New alert detected"
        );

        let guardians = match self.directory.guardians_paired_with(&event.device_id).await {
            Ok(guardians) => guardians,
            Err(e) => {
                error!(device_id = %event.device_id, error = %e, "Failed to load guardians");
                report.aborted = Some(e.to_string());
                return report;
            }
        };

        if guardians.is_empty() {
            debug!(device_id = %event.device_id, "No guardians paired with device");
        }

        for guardian in &guardians {
            let outcome = self.notify(event, guardian).await;
            report.outcomes.push(outcome);
        }

        info!(
            device_id = %event.device_id,
            guardians = report.outcomes.len(),
            attempts = report.attempts(),
            delivered = report.delivered(),
            "Alert dispatch finished"
        );
        report
    }

    async fn notify(&self, event: &AlertEvent, guardian: &GuardianRecord) -> GuardianOutcome {
        let guardian_id = guardian.id.clone();

        let Some(token) = guardian.token() else {
            info!(guardian_id = %guardian_id, "Guardian has no FCM token");
            return GuardianOutcome::SkippedNoToken { guardian_id };
        };

        let message = Message::for_alert(event, token);
        match self.messenger.send(&message).await {
            Ok(message_id) => {
                info!(guardian_id = %guardian_id, message_id = %message_id, "Notification sent");
                GuardianOutcome::Delivered {
                    guardian_id,
                    message_id,
                }
            }
            Err(error) if error.is_stale_token() => {
                warn!(guardian_id = %guardian_id, error = %error, "Push token rejected");
                match self.directory.remove_token(&guardian_id).await {
                    Ok(()) => {
                        info!(guardian_id = %guardian_id, "Removed invalid FCM token");
                        GuardianOutcome::TokenRemoved { guardian_id, error }
                    }
                    Err(e) => {
                        error!(guardian_id = %guardian_id, error = %e, "Failed to remove FCM token");
                        GuardianOutcome::CleanupFailed {
                            guardian_id,
                            error,
                            reason: e.to_string(),
                        }
                    }
                }
            }
            Err(error) => {
                error!(guardian_id = %guardian_id, error = %error, "Error sending notification");
                GuardianOutcome::SendFailed { guardian_id, error }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::alert::AlertRecord;
    use crate::error::{Error, Result};
    use crate::messaging::{INVALID_REGISTRATION_TOKEN, REGISTRATION_TOKEN_NOT_REGISTERED};
    use crate::notification::PANIC_TITLE;
    use crate::storage::Storage;

    /// Messenger double: records every message and fails for scripted tokens.
    #[derive(Debug, Default)]
    struct ScriptedMessenger {
        sent: Mutex<Vec<Message>>,
        failures: HashMap<String, SendError>,
    }

    impl ScriptedMessenger {
        fn failing(token: &str, code: &str) -> Self {
            let mut failures = HashMap::new();
            failures.insert(token.to_string(), SendError::new(code, "scripted failure"));
            Self {
                failures,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<Message> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Messenger for ScriptedMessenger {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn send(&self, message: &Message) -> std::result::Result<String, SendError> {
            self.sent.lock().unwrap().push(message.clone());
            match self.failures.get(&message.token) {
                Some(error) => Err(error.clone()),
                None => Ok(format!("projects/test/messages/{}", message.token)),
            }
        }
    }

    /// Directory whose reads or token removals fail.
    #[derive(Debug)]
    struct BrokenDirectory {
        guardians: Vec<GuardianRecord>,
        fail_scan: bool,
    }

    #[async_trait]
    impl GuardianDirectory for BrokenDirectory {
        async fn list_guardians(&self) -> Result<Vec<GuardianRecord>> {
            if self.fail_scan {
                return Err(Error::internal("directory unavailable"));
            }
            Ok(self.guardians.clone())
        }

        async fn remove_token(&self, _guardian_id: &str) -> Result<()> {
            Err(Error::internal("write rejected"))
        }
    }

    fn panic_event() -> AlertEvent {
        AlertEvent {
            device_id: "child_01".to_string(),
            timestamp: "1700000000000".to_string(),
            record: AlertRecord {
                status: Some("panic".to_string()),
                lat: Some(12.345_67),
                lng: Some(56.789_01),
            },
        }
    }

    fn storage_with(guardians: &[(&str, &str, Option<&str>)]) -> Arc<Storage> {
        let storage = Storage::open_in_memory().unwrap();
        for (id, device, token) in guardians {
            storage
                .upsert_guardian(&GuardianRecord::new(
                    *id,
                    Some((*device).to_string()),
                    token.map(str::to_string),
                ))
                .unwrap();
        }
        Arc::new(storage)
    }

    fn snapshot(storage: &Storage) -> Vec<(String, Option<String>, Option<String>)> {
        storage
            .guardians()
            .unwrap()
            .into_iter()
            .map(|g| (g.id, g.paired_device_id, g.fcm_token))
            .collect()
    }

    #[tokio::test]
    async fn test_panic_scenario_single_guardian() {
        let storage = storage_with(&[("g1", "child_01", Some("T1"))]);
        let messenger = Arc::new(ScriptedMessenger::default());
        let dispatcher = Dispatcher::new(storage, messenger.clone());

        let report = dispatcher.on_alert_created(&panic_event()).await;

        assert_eq!(report.attempts(), 1);
        assert_eq!(report.delivered(), 1);
        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].notification.title, PANIC_TITLE);
        assert!(sent[0].notification.body.contains("12.3457"));
        assert_eq!(sent[0].data.latitude, "12.34567");
        assert_eq!(sent[0].token, "T1");
    }

    #[tokio::test]
    async fn test_attempts_equal_matching_guardians_with_tokens() {
        let storage = storage_with(&[
            ("g1", "child_01", Some("T1")),
            ("g2", "child_01", Some("T2")),
            ("g3", "child_01", None),
            ("g4", "child_01", Some("")),
            ("g5", "child_02", Some("T5")),
        ]);
        let messenger = Arc::new(ScriptedMessenger::default());
        let dispatcher = Dispatcher::new(storage, messenger.clone());

        let report = dispatcher.on_alert_created(&panic_event()).await;

        assert_eq!(report.attempts(), 2);
        assert_eq!(report.outcomes.len(), 4);
        let tokens: Vec<_> = messenger.sent().into_iter().map(|m| m.token).collect();
        assert_eq!(tokens, vec!["T1", "T2"]);
    }

    #[tokio::test]
    async fn test_no_token_means_no_send_and_no_cleanup() {
        let storage = storage_with(&[("g1", "child_01", None)]);
        let before = snapshot(&storage);
        let messenger = Arc::new(ScriptedMessenger::default());
        let dispatcher = Dispatcher::new(storage.clone(), messenger.clone());

        let report = dispatcher.on_alert_created(&panic_event()).await;

        assert_eq!(
            report.outcomes,
            vec![GuardianOutcome::SkippedNoToken {
                guardian_id: "g1".to_string()
            }]
        );
        assert!(messenger.sent().is_empty());
        assert_eq!(snapshot(&storage), before);
    }

    #[tokio::test]
    async fn test_no_paired_guardians() {
        let storage = storage_with(&[("g1", "child_02", Some("T1"))]);
        let messenger = Arc::new(ScriptedMessenger::default());
        let dispatcher = Dispatcher::new(storage, messenger.clone());

        let report = dispatcher.on_alert_created(&panic_event()).await;

        assert!(report.outcomes.is_empty());
        assert!(report.aborted.is_none());
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_token_removed_from_owner_only() {
        let storage = storage_with(&[
            ("g1", "child_01", Some("T1")),
            ("g2", "child_01", Some("T2")),
            ("g3", "child_02", Some("T3")),
        ]);
        let messenger = Arc::new(ScriptedMessenger::failing(
            "T1",
            REGISTRATION_TOKEN_NOT_REGISTERED,
        ));
        let dispatcher = Dispatcher::new(storage.clone(), messenger);

        let report = dispatcher.on_alert_created(&panic_event()).await;

        assert!(matches!(
            &report.outcomes[0],
            GuardianOutcome::TokenRemoved { guardian_id, .. } if guardian_id == "g1"
        ));
        assert!(matches!(
            &report.outcomes[1],
            GuardianOutcome::Delivered { guardian_id, .. } if guardian_id == "g2"
        ));
        assert_eq!(
            snapshot(&storage),
            vec![
                ("g1".to_string(), Some("child_01".to_string()), None),
                (
                    "g2".to_string(),
                    Some("child_01".to_string()),
                    Some("T2".to_string())
                ),
                (
                    "g3".to_string(),
                    Some("child_02".to_string()),
                    Some("T3".to_string())
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_token_removed() {
        let storage = storage_with(&[("g1", "child_01", Some("T1"))]);
        let messenger = Arc::new(ScriptedMessenger::failing("T1", INVALID_REGISTRATION_TOKEN));
        let dispatcher = Dispatcher::new(storage.clone(), messenger);

        let report = dispatcher.on_alert_created(&panic_event()).await;

        assert!(matches!(
            report.outcomes[0],
            GuardianOutcome::TokenRemoved { .. }
        ));
        assert!(storage.get_guardian("g1").unwrap().unwrap().fcm_token.is_none());
    }

    #[tokio::test]
    async fn test_other_failure_modifies_nothing() {
        let storage = storage_with(&[
            ("g1", "child_01", Some("T1")),
            ("g2", "child_01", Some("T2")),
        ]);
        let before = snapshot(&storage);
        let messenger = Arc::new(ScriptedMessenger::failing(
            "T1",
            "messaging/server-unavailable",
        ));
        let dispatcher = Dispatcher::new(storage.clone(), messenger.clone());

        let report = dispatcher.on_alert_created(&panic_event()).await;

        assert!(matches!(
            report.outcomes[0],
            GuardianOutcome::SendFailed { .. }
        ));
        // The failure for g1 does not stop g2
        assert!(matches!(
            report.outcomes[1],
            GuardianOutcome::Delivered { .. }
        ));
        assert_eq!(messenger.sent().len(), 2);
        assert_eq!(snapshot(&storage), before);
    }

    #[tokio::test]
    async fn test_directory_failure_aborts_quietly() {
        let directory = Arc::new(BrokenDirectory {
            guardians: Vec::new(),
            fail_scan: true,
        });
        let messenger = Arc::new(ScriptedMessenger::default());
        let dispatcher = Dispatcher::new(directory, messenger.clone());

        let report = dispatcher.on_alert_created(&panic_event()).await;

        assert!(report.outcomes.is_empty());
        assert!(report.aborted.unwrap().contains("directory unavailable"));
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_isolated() {
        let directory = Arc::new(BrokenDirectory {
            guardians: vec![
                GuardianRecord::new("g1", Some("child_01".to_string()), Some("T1".into())),
                GuardianRecord::new("g2", Some("child_01".to_string()), Some("T2".into())),
            ],
            fail_scan: false,
        });
        let messenger = Arc::new(ScriptedMessenger::failing(
            "T1",
            REGISTRATION_TOKEN_NOT_REGISTERED,
        ));
        let dispatcher = Dispatcher::new(directory, messenger);

        let report = dispatcher.on_alert_created(&panic_event()).await;

        assert!(matches!(
            &report.outcomes[0],
            GuardianOutcome::CleanupFailed { reason, .. } if reason.contains("write rejected")
        ));
        assert!(matches!(
            report.outcomes[1],
            GuardianOutcome::Delivered { .. }
        ));
    }

    #[tokio::test]
    async fn test_report_serializes_outcome_tags() {
        let storage = storage_with(&[("g1", "child_01", None)]);
        let dispatcher = Dispatcher::new(storage, Arc::new(ScriptedMessenger::default()));

        let report = dispatcher.on_alert_created(&panic_event()).await;
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["device_id"], "child_01");
        assert_eq!(json["outcomes"][0]["outcome"], "skipped_no_token");
        assert!(json.get("aborted").is_none());
    }

    #[test]
    fn test_outcome_guardian_id() {
        let outcome = GuardianOutcome::SendFailed {
            guardian_id: "g9".to_string(),
            error: SendError::new("messaging/internal-error", "boom"),
        };
        assert_eq!(outcome.guardian_id(), "g9");
        assert!(outcome.attempted());
    }
}
