use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

pub(crate) mod future_versions;
pub(crate) mod processor;
pub(crate) mod scanner;
pub(crate) mod service;
pub(crate) mod update_feed;

pub(crate) use service::SyncService;

/// Spawns the long-lived scheduler tasks. Each one loops on its own
/// interval until the shutdown token is cancelled; cancellation also
/// aborts any in-flight upstream requests.
pub(crate) fn start(service: Arc<SyncService>, shutdown: CancellationToken) {
    info!("Starting sync tickers");

    tokio::spawn(update_feed::run(service.clone(), shutdown.clone()));
    tokio::spawn(future_versions::run(service.clone(), shutdown.clone()));
    tokio::spawn(processor::run(service.clone(), shutdown.clone()));
    tokio::spawn(scanner::run(service, shutdown));
}
