//! Cooldown-gated alerting. Detections inside the cooldown window collapse
//! to at most one outbound notification per scope; the cooldown stamp is
//! taken before dispatch is enqueued so two rapid detections cannot both
//! escape the window.

use crate::model::{AnomalyEvent, AnomalyKind};
use crate::notify::Notifier;
use crate::Metrics;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use pulsewatch_config::AlertConfig;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Last-sent bookkeeping, one scope per event kind or one shared scope.
#[derive(Debug)]
pub struct CooldownState {
    cooldown: TimeDelta,
    per_kind: bool,
    last_sent: HashMap<&'static str, DateTime<Utc>>,
}

impl CooldownState {
    pub fn new(cooldown_seconds: f64, per_kind: bool) -> Self {
        Self {
            cooldown: TimeDelta::milliseconds((cooldown_seconds.max(0.0) * 1000.0) as i64),
            per_kind,
            last_sent: HashMap::new(),
        }
    }

    fn scope(&self, kind: AnomalyKind) -> &'static str {
        if self.per_kind {
            kind.as_str()
        } else {
            "all"
        }
    }

    /// True when the window is open; the stamp is advanced in the same call,
    /// so concurrent callers racing on one scope see at most one pass.
    pub fn check_and_update(&mut self, kind: AnomalyKind, now: DateTime<Utc>) -> bool {
        let scope = self.scope(kind);
        if let Some(last) = self.last_sent.get(scope) {
            if now.signed_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        self.last_sent.insert(scope, now);
        true
    }
}

pub struct AlertGate {
    state: Mutex<CooldownState>,
    tx: mpsc::Sender<AnomalyEvent>,
    metrics: Arc<Metrics>,
}

impl AlertGate {
    pub fn new(
        cfg: &AlertConfig,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let handle = spawn_dispatch_task(notifier, cfg.recipient.clone(), rx, metrics.clone());

        let gate = Arc::new(Self {
            state: Mutex::new(CooldownState::new(cfg.cooldown_seconds, cfg.per_kind)),
            tx,
            metrics,
        });

        (gate, handle)
    }

    /// Forward an event to the channel unless its scope is cooling down. The
    /// event has already been written to the durable event log by the caller;
    /// suppression only skips the outbound send.
    pub fn notify(&self, event: AnomalyEvent) {
        let pass = {
            let mut state = self.state.lock().expect("cooldown mutex poisoned");
            state.check_and_update(event.kind, Utc::now())
        };

        if !pass {
            self.metrics.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(
                "suppressing {} alert for {} inside cooldown window",
                event.kind.as_str(),
                event.source_file
            );
            return;
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.alerts_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "alert queue full; dropping {} alert for {}",
                    event.kind.as_str(),
                    event.source_file
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(
                    "alert dispatcher gone; dropping {} alert for {}",
                    event.kind.as_str(),
                    event.source_file
                );
            }
        }
    }
}

fn spawn_dispatch_task(
    notifier: Arc<dyn Notifier>,
    recipient: String,
    mut rx: mpsc::Receiver<AnomalyEvent>,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match notifier
                .send(&recipient, event.kind.subject(), event.kind.body())
                .await
            {
                Ok(()) => {
                    metrics.alerts_sent.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "sent {} alert for {}",
                        event.kind.as_str(),
                        event.source_file
                    );
                }
                Err(exc) => {
                    metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "failed to send {} alert for {}: {exc}",
                        event.kind.as_str(),
                        event.source_file
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn event(kind: AnomalyKind) -> AnomalyEvent {
        AnomalyEvent {
            kind,
            detected_at: Utc::now(),
            source_file: "f.csv".to_string(),
            detail: "detail".to_string(),
        }
    }

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + seconds, 0).expect("valid timestamp")
    }

    #[test]
    fn same_kind_inside_window_is_suppressed() {
        let mut state = CooldownState::new(300.0, true);
        assert!(state.check_and_update(AnomalyKind::Dropout, ts(0)));
        assert!(!state.check_and_update(AnomalyKind::Dropout, ts(299)));
        assert!(state.check_and_update(AnomalyKind::Dropout, ts(300)));
    }

    #[test]
    fn per_kind_scopes_are_independent() {
        let mut state = CooldownState::new(300.0, true);
        assert!(state.check_and_update(AnomalyKind::Dropout, ts(0)));
        assert!(state.check_and_update(AnomalyKind::Noise, ts(1)));
    }

    #[test]
    fn shared_scope_collapses_kinds() {
        let mut state = CooldownState::new(300.0, false);
        assert!(state.check_and_update(AnomalyKind::Dropout, ts(0)));
        assert!(!state.check_and_update(AnomalyKind::Noise, ts(1)));
    }

    #[test]
    fn suppressed_attempt_does_not_extend_the_window() {
        let mut state = CooldownState::new(300.0, true);
        assert!(state.check_and_update(AnomalyKind::Dropout, ts(0)));
        assert!(!state.check_and_update(AnomalyKind::Dropout, ts(200)));
        // Still measured from the first send, not the suppressed attempt.
        assert!(state.check_and_update(AnomalyKind::Dropout, ts(301)));
    }

    struct CountingNotifier {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), ChannelError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn gate_sends_once_per_window() {
        let notifier = Arc::new(CountingNotifier {
            sent: AtomicUsize::new(0),
        });
        let metrics = Arc::new(Metrics::default());
        let cfg = AlertConfig::default();
        let (gate, handle) = AlertGate::new(&cfg, notifier.clone(), metrics.clone());

        gate.notify(event(AnomalyKind::Dropout));
        gate.notify(event(AnomalyKind::Dropout));
        drop(gate);
        handle.await.expect("dispatch task joins");

        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.alerts_suppressed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.alerts_sent.load(Ordering::Relaxed), 1);
    }
}
