//! `guardrelay` - Alert relay for child-safety devices
//!
//! Devices write through a proxy endpoint into a JSON tree. When a write
//! creates a record under `alerts/{deviceId}/{timestamp}`, every guardian
//! paired with that device receives a push notification, and push tokens the
//! transport reports as stale are cleared from the guardian directory.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod alert;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod guardian;
pub mod logging;
pub mod messaging;
pub mod notification;
pub mod proxy;
pub mod server;
pub mod storage;
pub mod trigger;

pub use alert::{AlertEvent, AlertRecord, AlertStatus};
pub use config::Config;
pub use dispatcher::{DispatchReport, Dispatcher, GuardianOutcome};
pub use error::{Error, Result};
pub use guardian::{GuardianDirectory, GuardianRecord};
pub use logging::init_logging;
pub use messaging::{Messenger, SendError};
pub use notification::Message;
pub use storage::{Storage, StorageStats};
