//! Delivery of alert creation events to the dispatcher.
//!
//! Store writes hand their creation events to an [`AlertTrigger`]. A single
//! [`TriggerWorker`] drains the queue and runs every event as its own task, so
//! a slow push request for one alert never holds up another.

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::alert::AlertEvent;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::{Error, Result};

/// Sending half of the alert queue.
#[derive(Debug, Clone)]
pub struct AlertTrigger {
    sender: mpsc::Sender<AlertEvent>,
}

/// Receiving half of the alert queue.
#[derive(Debug)]
pub struct TriggerWorker {
    receiver: mpsc::Receiver<AlertEvent>,
    dispatcher: Dispatcher,
}

/// Create a trigger and the worker that serves it.
#[must_use]
pub fn channel(dispatcher: Dispatcher, capacity: usize) -> (AlertTrigger, TriggerWorker) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
        AlertTrigger { sender },
        TriggerWorker {
            receiver,
            dispatcher,
        },
    )
}

impl AlertTrigger {
    /// Queue creation events, waiting if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TriggerClosed`] if the worker has stopped.
    pub async fn fire(&self, events: Vec<AlertEvent>) -> Result<()> {
        for event in events {
            debug!(path = %event.path(), "Queueing alert");
            self.sender
                .send(event)
                .await
                .map_err(|_| Error::TriggerClosed)?;
        }
        Ok(())
    }
}

impl TriggerWorker {
    /// Dispatch events until every [`AlertTrigger`] is dropped, then wait for
    /// in-flight dispatches. Returns how many dispatches completed.
    ///
    /// Reports are logged as they complete and not kept.
    pub async fn run(mut self) -> usize {
        let mut tasks = JoinSet::new();
        let mut completed = 0;

        loop {
            tokio::select! {
                event = self.receiver.recv() => {
                    let Some(event) = event else { break };
                    let dispatcher = self.dispatcher.clone();
                    tasks.spawn(async move { dispatcher.on_alert_created(&event).await });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    completed += collect(joined);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            completed += collect(joined);
        }
        info!(dispatched = completed, "Alert trigger stopped");
        completed
    }
}

fn collect(joined: std::result::Result<DispatchReport, tokio::task::JoinError>) -> usize {
    match joined {
        Ok(report) => {
            debug!(
                device_id = %report.device_id,
                timestamp = %report.timestamp,
                guardians = report.outcomes.len(),
                delivered = report.delivered(),
                aborted = report.aborted.is_some(),
                "Alert dispatch completed"
            );
            1
        }
        Err(e) => {
            error!(error = %e, "Alert dispatch task failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::alert::AlertRecord;
    use crate::guardian::GuardianRecord;
    use crate::messaging::LogMessenger;
    use crate::storage::Storage;

    fn event(device_id: &str, timestamp: &str) -> AlertEvent {
        AlertEvent {
            device_id: device_id.to_string(),
            timestamp: timestamp.to_string(),
            record: AlertRecord {
                status: Some("sos".to_string()),
                lat: None,
                lng: None,
            },
        }
    }

    #[tokio::test]
    async fn test_worker_dispatches_every_event() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage
            .upsert_guardian(&GuardianRecord::new(
                "g1",
                Some("child_01".to_string()),
                Some("T1".to_string()),
            ))
            .unwrap();
        let messenger = Arc::new(LogMessenger::new());
        let dispatcher = Dispatcher::new(storage, messenger.clone());

        let (trigger, worker) = channel(dispatcher, 4);
        let handle = tokio::spawn(worker.run());

        trigger
            .fire(vec![event("child_01", "1"), event("child_01", "2")])
            .await
            .unwrap();
        trigger.fire(vec![event("child_02", "3")]).await.unwrap();
        drop(trigger);

        assert_eq!(handle.await.unwrap(), 3);
        assert_eq!(messenger.sent(), 2);
    }

    #[tokio::test]
    async fn test_worker_keeps_up_with_a_small_queue() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage
            .upsert_guardian(&GuardianRecord::new(
                "g1",
                Some("child_01".to_string()),
                Some("T1".to_string()),
            ))
            .unwrap();
        let messenger = Arc::new(LogMessenger::new());
        let dispatcher = Dispatcher::new(storage, messenger.clone());

        let (trigger, worker) = channel(dispatcher, 8);
        let handle = tokio::spawn(worker.run());

        for batch in 0..50 {
            let events = (0..100)
                .map(|i| event("child_01", &format!("{batch}-{i}")))
                .collect();
            trigger.fire(events).await.unwrap();
        }
        drop(trigger);

        assert_eq!(handle.await.unwrap(), 5000);
        assert_eq!(messenger.sent(), 5000);
    }

    #[tokio::test]
    async fn test_fire_after_worker_stopped() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(storage, Arc::new(LogMessenger::new()));

        let (trigger, worker) = channel(dispatcher, 1);
        drop(worker);

        let err = trigger.fire(vec![event("child_01", "1")]).await.unwrap_err();
        assert!(matches!(err, Error::TriggerClosed));
    }

    #[tokio::test]
    async fn test_fire_nothing_is_ok() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(storage, Arc::new(LogMessenger::new()));
        let (trigger, _worker) = channel(dispatcher, 1);

        assert!(trigger.fire(Vec::new()).await.is_ok());
    }
}
