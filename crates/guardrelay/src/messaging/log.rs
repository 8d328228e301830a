//! A messenger that only logs what it would send.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use super::{Messenger, SendError};
use crate::notification::Message;

/// Logs each message and reports it as delivered.
#[derive(Debug, Default)]
pub struct LogMessenger {
    sent: AtomicU64,
}

impl LogMessenger {
    /// Create a new log messenger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages logged so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Messenger for LogMessenger {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &Message) -> Result<String, SendError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            title = %message.notification.title,
            device_id = %message.data.device_id,
            status = %message.data.status,
            "Would send push notification"
        );
        Ok(format!("log/{n}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertEvent, AlertRecord};

    #[tokio::test]
    async fn test_log_messenger_counts_sends() {
        let messenger = LogMessenger::new();
        let event = AlertEvent {
            device_id: "child_01".to_string(),
            timestamp: "1".to_string(),
            record: AlertRecord::default(),
        };
        let message = Message::for_alert(&event, "T1");

        assert_eq!(messenger.send(&message).await.unwrap(), "log/1");
        assert_eq!(messenger.send(&message).await.unwrap(), "log/2");
        assert_eq!(messenger.sent(), 2);
    }
}
