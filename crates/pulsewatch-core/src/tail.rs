//! Incremental tailer: one task per remote file, reconstructing an ordered,
//! exactly-once row stream out of whole-file snapshots.
//!
//! The remote side has no partial read, so each cycle re-fetches the full
//! content and compares its byte size against the last recorded one. Only the
//! suffix past the consumed line offset is decoded, and the final line is
//! never trusted — it may be mid-write until a later snapshot shows data
//! beyond it.

use crate::alert::AlertGate;
use crate::batch::BatchBuffer;
use crate::model::{Batch, RemoteFileMeta};
use crate::transport::RemoteTransport;
use crate::writer::PersistenceWriter;
use crate::{decode, detect, Metrics};
use pulsewatch_config::AppConfig;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub(crate) struct TailState {
    pub(crate) lines_consumed: usize,
    pub(crate) last_size: u64,
    pub(crate) no_growth_polls: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    Continue,
    Completed,
    Vanished,
}

pub(crate) struct Tailer {
    meta: RemoteFileMeta,
    config: Arc<AppConfig>,
    transport: Arc<dyn RemoteTransport>,
    gate: Arc<AlertGate>,
    writer: Arc<PersistenceWriter>,
    metrics: Arc<Metrics>,
    state: TailState,
    buffer: BatchBuffer,
    batch_seq: u32,
}

impl Tailer {
    pub(crate) fn new(
        meta: RemoteFileMeta,
        config: Arc<AppConfig>,
        transport: Arc<dyn RemoteTransport>,
        gate: Arc<AlertGate>,
        writer: Arc<PersistenceWriter>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let buffer = BatchBuffer::new(config.ingest.batch_size);
        Self {
            meta,
            config,
            transport,
            gate,
            writer,
            metrics,
            state: TailState::default(),
            buffer,
            batch_seq: 0,
        }
    }

    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interval =
            Duration::from_secs_f64(self.config.ingest.tail_interval_seconds.max(0.05));
        info!("tailing {} from {}", self.meta.name, self.meta.folder);

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested; stopping tail of {}", self.meta.name);
                break;
            }

            match self.poll_cycle().await {
                CycleOutcome::Continue => {}
                CycleOutcome::Completed => {
                    self.finish();
                    break;
                }
                CycleOutcome::Vanished => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.metrics.files_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// One fetch-compare-consume step. Split out from `run` so tests can
    /// drive cycles without waiting on the poll interval.
    pub(crate) async fn poll_cycle(&mut self) -> CycleOutcome {
        let content = match self
            .transport
            .fetch(&self.meta.folder, &self.meta.name)
            .await
        {
            Ok(content) => content,
            Err(exc) if exc.is_fatal_for_file() => {
                self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                error!("{} is gone on the remote side: {exc}", self.meta.name);
                return CycleOutcome::Vanished;
            }
            Err(exc) => {
                self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "fetch of {} failed: {exc}; retrying next cycle",
                    self.meta.name
                );
                return CycleOutcome::Continue;
            }
        };

        if let Err(exc) = self.writer.mirror_snapshot(&self.meta, &content) {
            warn!("mirroring {} failed: {exc}", self.meta.name);
        }

        let size = content.len() as u64;
        if size <= self.state.last_size {
            self.state.no_growth_polls += 1;
            debug!(
                "no growth in {} ({} polls)",
                self.meta.name, self.state.no_growth_polls
            );
            if self.state.no_growth_polls >= self.config.ingest.no_growth_threshold.max(1) {
                return CycleOutcome::Completed;
            }
            return CycleOutcome::Continue;
        }

        let text = String::from_utf8_lossy(&content);
        let consumed = self.consume_new_lines(&text);
        if consumed == 0 {
            debug!("{} grew without completing a line", self.meta.name);
        }

        // The size is recorded even when no line completed; otherwise a file
        // whose trailing line grew once and then stalled would keep reading
        // as "grown" forever and completion could never fire.
        self.state.last_size = size;
        self.state.no_growth_polls = 0;

        CycleOutcome::Continue
    }

    /// Decode every newly completed line, excluding the final one. Returns
    /// how many lines were consumed.
    fn consume_new_lines(&mut self, text: &str) -> usize {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() <= 1 {
            return 0;
        }

        let upto = lines.len() - 1;
        if upto <= self.state.lines_consumed {
            return 0;
        }

        let fresh = &lines[self.state.lines_consumed..upto];
        let mut consumed = 0;
        for line in fresh {
            consumed += 1;
            if decode::is_header(line) {
                continue;
            }

            match decode::decode(line) {
                Ok(row) => {
                    self.metrics.rows_decoded.fetch_add(1, Ordering::Relaxed);
                    if let Some(batch) = self.buffer.append(row) {
                        self.flush_batch(batch);
                    }
                }
                Err(exc) => {
                    self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("skipping undecodable row in {}: {exc}", self.meta.name);
                }
            }
        }

        self.state.lines_consumed += consumed;
        consumed
    }

    fn flush_batch(&mut self, batch: Batch) {
        self.batch_seq += 1;
        self.metrics.batches_sealed.fetch_add(1, Ordering::Relaxed);

        for event in detect::evaluate(&batch, &self.config.detect, &self.meta.name) {
            self.metrics.events_detected.fetch_add(1, Ordering::Relaxed);
            info!(
                "{} detected in {}: {}",
                event.kind.as_str(),
                event.source_file,
                event.detail
            );
            if let Err(exc) = self.writer.append_event(&event) {
                error!("event log append failed: {exc}");
            }
            self.gate.notify(event);
        }

        match self.writer.write_batch(&self.meta, self.batch_seq, &batch) {
            Ok(path) => {
                info!(
                    "wrote batch {} of {} ({} rows) to {}",
                    self.batch_seq,
                    self.meta.name,
                    batch.len(),
                    path.display()
                );
            }
            Err(exc) => {
                self.metrics.persist_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    "failed to persist batch {} of {}: {exc}; continuing",
                    self.batch_seq, self.meta.name
                );
            }
        }
    }

    fn finish(&mut self) {
        info!(
            "{} completed after {} lines",
            self.meta.name, self.state.lines_consumed
        );

        if self.config.ingest.flush_partial_batches {
            if let Some(batch) = self.buffer.take_partial() {
                debug!(
                    "flushing {} remaining rows of {} as a short batch",
                    batch.len(),
                    self.meta.name
                );
                self.flush_batch(batch);
            }
        } else {
            let dropped = self.buffer.discard();
            if dropped > 0 {
                self.metrics
                    .rows_discarded
                    .fetch_add(dropped as u64, Ordering::Relaxed);
                debug!(
                    "discarding {dropped} unbatched rows from completed {}",
                    self.meta.name
                );
            }
        }
    }
}
