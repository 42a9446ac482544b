//! Polling directory watcher. The remote side cannot push change events, so
//! each cycle lists every configured folder, diffs against a cumulative
//! seen-set, and starts one tailer task per accepted new name.

use crate::alert::AlertGate;
use crate::model::RemoteFileMeta;
use crate::tail::Tailer;
use crate::transport::RemoteTransport;
use crate::writer::PersistenceWriter;
use crate::Metrics;
use chrono::{Local, NaiveDate};
use pulsewatch_config::{AppConfig, WatchConfig};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Why a newly observed name was not handed to a tailer, or None to accept.
fn filter_new_name(
    name: &str,
    meta: &RemoteFileMeta,
    cfg: &WatchConfig,
    today: NaiveDate,
) -> Option<&'static str> {
    if !name.ends_with(&format!(".{}", cfg.data_extension)) {
        return Some("unexpected extension");
    }
    if meta.is_temp {
        return Some("temporary artifact");
    }
    if cfg.require_current_date && meta.capture_date != Some(today) {
        return Some("capture date is not today");
    }
    None
}

pub(crate) async fn run_watcher(
    config: Arc<AppConfig>,
    transport: Arc<dyn RemoteTransport>,
    gate: Arc<AlertGate>,
    writer: Arc<PersistenceWriter>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let poll_interval = Duration::from_secs_f64(config.watch.poll_interval_seconds.max(0.05));
    let retry_backoff = Duration::from_secs_f64(config.watch.listing_retry_seconds.max(0.05));

    let mut seen: HashMap<String, HashSet<String>> = HashMap::new();
    let mut tailers = JoinSet::new();

    info!(
        "watching {} remote folder(s) every {:.1}s",
        config.watch.folders.len(),
        poll_interval.as_secs_f64()
    );

    'poll: loop {
        if *shutdown.borrow() {
            break;
        }

        for folder in &config.watch.folders {
            let names = match transport.list(folder).await {
                Ok(names) => names,
                Err(exc) => {
                    metrics.listing_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "listing {folder} failed: {exc}; retrying in {:.0}s",
                        retry_backoff.as_secs_f64()
                    );
                    if sleep_or_shutdown(retry_backoff, &mut shutdown).await {
                        break 'poll;
                    }
                    continue 'poll;
                }
            };

            let folder_seen = seen.entry(folder.clone()).or_default();
            let today = Local::now().date_naive();

            for name in names {
                // Every observed name enters the seen-set, accepted or not;
                // a name is considered at most once for its lifetime.
                if !folder_seen.insert(name.clone()) {
                    continue;
                }
                metrics.files_discovered.fetch_add(1, Ordering::Relaxed);

                let meta = RemoteFileMeta::parse(folder, &name, &config.watch.temp_marker);
                if let Some(reason) = filter_new_name(&name, &meta, &config.watch, today) {
                    info!("skipping {name} in {folder}: {reason}");
                    continue;
                }

                info!("new data file detected in {folder}: {name}");
                metrics.files_active.fetch_add(1, Ordering::Relaxed);
                let tailer = Tailer::new(
                    meta,
                    config.clone(),
                    transport.clone(),
                    gate.clone(),
                    writer.clone(),
                    metrics.clone(),
                );
                tailers.spawn(tailer.run(shutdown.clone()));
            }
        }

        while let Some(result) = tailers.try_join_next() {
            if let Err(exc) = result {
                error!("tailer task failed: {exc}");
            }
        }

        if sleep_or_shutdown(poll_interval, &mut shutdown).await {
            break;
        }
    }

    debug!("watcher stopping; waiting for {} tailer(s)", tailers.len());
    while let Some(result) = tailers.join_next().await {
        if let Err(exc) = result {
            error!("tailer task failed: {exc}");
        }
    }
}

/// Sleeps for `duration`, returning early with `true` when shutdown fires.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}
