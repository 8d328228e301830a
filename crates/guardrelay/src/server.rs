//! HTTP surface of the relay.
//!
//! Builds the router around the proxy write endpoint and wires storage, the
//! alert trigger and the dispatcher together for `guardrelay serve`.

use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::messaging;
use crate::proxy;
use crate::storage::Storage;
use crate::trigger::{self, AlertTrigger};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The data store.
    pub storage: Arc<Storage>,
    /// Where newly created alerts are sent.
    pub trigger: AlertTrigger,
}

/// Build the router with the proxy endpoint mounted at `route`.
pub fn router(state: AppState, route: &str) -> Router {
    Router::new()
        .route(route, post(proxy::handle_write))
        .with_state(state)
}

/// Run the relay until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the store cannot be opened, the messaging backend
/// cannot be built, or the listener cannot bind.
pub async fn serve(config: &Config) -> Result<()> {
    let storage = Arc::new(Storage::open(config.database_path())?);
    let messenger = messaging::from_config(config)?;
    info!(backend = messenger.name(), "Messaging backend ready");

    let dispatcher = Dispatcher::new(storage.clone(), messenger);
    let (alert_trigger, worker) = trigger::channel(dispatcher, config.trigger.queue_capacity);
    let worker = tokio::spawn(worker.run());

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        addr = %addr,
        route = %config.server.proxy_route,
        "Relay listening"
    );

    let app = router(
        AppState {
            storage,
            trigger: alert_trigger,
        },
        &config.server.proxy_route,
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Waiting for in-flight alerts");
    match worker.await {
        Ok(dispatched) => info!(dispatched, "Relay stopped"),
        Err(e) => return Err(Error::internal(format!("alert worker panicked: {e}"))),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    info!("Shutdown requested");
}
