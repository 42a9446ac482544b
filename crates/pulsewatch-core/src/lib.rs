//! Core pipeline for the pulsewatch telemetry monitor: remote folder
//! watching, snapshot-diff tailing, row decoding, fixed-size batching,
//! anomaly detection, cooldown-gated alerting, and local persistence.

pub mod alert;
pub mod batch;
pub mod decode;
pub mod detect;
pub mod error;
pub mod model;
pub mod notify;
pub mod transport;
pub mod writer;

mod tail;
mod watch;

use crate::alert::AlertGate;
use crate::notify::Notifier;
use crate::transport::RemoteTransport;
use crate::writer::PersistenceWriter;
use anyhow::{Context, Result};
use pulsewatch_config::AppConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Default)]
pub struct Metrics {
    pub files_discovered: AtomicU64,
    pub files_active: AtomicU64,
    pub rows_decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub batches_sealed: AtomicU64,
    pub rows_discarded: AtomicU64,
    pub events_detected: AtomicU64,
    pub alerts_sent: AtomicU64,
    pub alerts_suppressed: AtomicU64,
    pub alerts_dropped: AtomicU64,
    pub send_failures: AtomicU64,
    pub listing_failures: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub persist_failures: AtomicU64,
}

fn spawn_status_task(
    metrics: Arc<Metrics>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }

            info!(
                files_active = metrics.files_active.load(Ordering::Relaxed),
                rows_decoded = metrics.rows_decoded.load(Ordering::Relaxed),
                decode_errors = metrics.decode_errors.load(Ordering::Relaxed),
                batches_sealed = metrics.batches_sealed.load(Ordering::Relaxed),
                events_detected = metrics.events_detected.load(Ordering::Relaxed),
                alerts_sent = metrics.alerts_sent.load(Ordering::Relaxed),
                alerts_suppressed = metrics.alerts_suppressed.load(Ordering::Relaxed),
                "pipeline status"
            );
        }
    })
}

/// Run the monitor until a ctrl-c arrives. Shutdown is cooperative: the
/// watcher and every tailer finish their in-flight cycle, already-sealed
/// batches are flushed, and the alert queue drains before this returns.
pub async fn run_monitor(
    config: AppConfig,
    transport: Arc<dyn RemoteTransport>,
    notifier: Arc<dyn Notifier>,
) -> Result<()> {
    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::default());
    let writer = Arc::new(
        PersistenceWriter::new(&config.output).context("failed to prepare output locations")?,
    );

    let (gate, dispatch_handle) = AlertGate::new(&config.alert, notifier, metrics.clone());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let status_handle = spawn_status_task(
        metrics.clone(),
        Duration::from_secs_f64(config.ingest.status_interval_seconds.max(1.0)),
        shutdown_rx.clone(),
    );

    let watcher_handle = tokio::spawn(watch::run_watcher(
        config.clone(),
        transport,
        gate.clone(),
        writer,
        metrics.clone(),
        shutdown_rx,
    ));

    info!("pulsewatch monitor running; waiting for shutdown signal");
    tokio::signal::ctrl_c()
        .await
        .context("signal handler failed")?;
    info!("shutdown signal received; letting in-flight cycles finish");

    shutdown_tx.send(true).ok();
    watcher_handle
        .await
        .context("watcher task failed during shutdown")?;

    // All tailers are gone, so this gate holds the last queue sender; once it
    // drops, the dispatcher drains whatever is left and exits.
    drop(gate);
    dispatch_handle.await.ok();
    status_handle.await.ok();

    info!(
        "stopped after {} rows decoded, {} batches sealed, {} alerts sent",
        metrics.rows_decoded.load(Ordering::Relaxed),
        metrics.batches_sealed.load(Ordering::Relaxed),
        metrics.alerts_sent.load(Ordering::Relaxed),
    );

    Ok(())
}
