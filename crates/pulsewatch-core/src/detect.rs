//! Anomaly predicates over a sealed batch. Both are stateless, always scan
//! the full batch, and may fire together.

use crate::model::{AnomalyEvent, AnomalyKind, Batch};
use chrono::Utc;
use pulsewatch_config::DetectConfig;

/// Linear-interpolation quantile over unsorted samples, matching the default
/// interpolation of numpy's `quantile`. Returns None for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }

    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// The status code carries a `1` digit when the sensor reported an invalid
/// reading.
fn status_indicates_dropout(status: &str) -> bool {
    status.contains('1')
}

pub fn check_dropout(batch: &Batch, cfg: &DetectConfig, source_file: &str) -> Option<AnomalyEvent> {
    let offending: Vec<&str> = batch
        .rows()
        .iter()
        .filter(|row| status_indicates_dropout(&row.spo2_status))
        .map(|row| row.timestamp.as_str())
        .collect();

    if offending.len() < cfg.dropout_min_rows.max(1) {
        return None;
    }

    Some(AnomalyEvent {
        kind: AnomalyKind::Dropout,
        detected_at: Utc::now(),
        source_file: source_file.to_string(),
        detail: format!(
            "{} error-status rows at [{}]",
            offending.len(),
            offending.join(", ")
        ),
    })
}

pub fn check_noise(batch: &Batch, cfg: &DetectConfig, source_file: &str) -> Option<AnomalyEvent> {
    let count = batch
        .rows()
        .iter()
        .filter(|row| {
            quantile(&row.perfusion, cfg.noise_quantile)
                .map_or(false, |p| p > cfg.noise_threshold)
        })
        .count();

    if count <= cfg.noise_min_rows {
        return None;
    }

    Some(AnomalyEvent {
        kind: AnomalyKind::Noise,
        detected_at: Utc::now(),
        source_file: source_file.to_string(),
        detail: format!(
            "{count} rows with q{:.2} perfusion above {}",
            cfg.noise_quantile, cfg.noise_threshold
        ),
    })
}

pub fn evaluate(batch: &Batch, cfg: &DetectConfig, source_file: &str) -> Vec<AnomalyEvent> {
    check_dropout(batch, cfg, source_file)
        .into_iter()
        .chain(check_noise(batch, cfg, source_file))
        .collect()
}
