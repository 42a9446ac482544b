//! Local persistence: one CSV artifact per sealed batch, an append-only
//! JSONL event log, and an optional mirror of the raw remote snapshots.

use crate::decode::{encode_f64_array, encode_i64_array};
use crate::error::PersistenceError;
use crate::model::{AnomalyEvent, Batch, EventRecord, RemoteFileMeta};
use pulsewatch_config::OutputConfig;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const ARTIFACT_HEADER: [&str; 10] = [
    "timestamp",
    "device_id",
    "battery",
    "hr",
    "o2",
    "spo2_status",
    "pleth",
    "red",
    "ir",
    "perfusion",
];

pub struct PersistenceWriter {
    output_root: PathBuf,
    event_log: PathBuf,
    mirror_raw: bool,
}

impl PersistenceWriter {
    pub fn new(cfg: &OutputConfig) -> Result<Self, PersistenceError> {
        let output_root = PathBuf::from(&cfg.root_dir);
        let event_log = PathBuf::from(&cfg.event_log);

        std::fs::create_dir_all(&output_root)?;
        if let Some(parent) = event_log.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            output_root,
            event_log,
            mirror_raw: cfg.mirror_raw,
        })
    }

    fn study_dir(&self, meta: &RemoteFileMeta) -> PathBuf {
        self.output_root.join(meta.study_folder())
    }

    pub fn artifact_path(&self, meta: &RemoteFileMeta, seq: u32) -> PathBuf {
        self.study_dir(meta)
            .join(format!("{}_batch{:04}.csv", meta.stem(), seq))
    }

    /// Serialize one sealed batch to a new artifact. Create-new semantics: a
    /// second write for the same sequence errors instead of overwriting.
    pub fn write_batch(
        &self,
        meta: &RemoteFileMeta,
        seq: u32,
        batch: &Batch,
    ) -> Result<PathBuf, PersistenceError> {
        let dir = self.study_dir(meta);
        std::fs::create_dir_all(&dir)?;

        let path = self.artifact_path(meta, seq);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|exc| map_create_error(exc, &path))?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(ARTIFACT_HEADER)?;
        for row in batch.rows() {
            writer.write_record(&[
                row.timestamp.clone(),
                row.device_id.clone(),
                row.battery.to_string(),
                row.hr.to_string(),
                row.o2.to_string(),
                row.spo2_status.clone(),
                encode_i64_array(&row.pleth),
                encode_i64_array(&row.red),
                encode_i64_array(&row.ir),
                encode_f64_array(&row.perfusion),
            ])?;
        }
        writer.flush()?;

        Ok(path)
    }

    /// Append one event to the durable log, one JSON object per line. Every
    /// detection lands here, cooled down or not.
    pub fn append_event(&self, event: &AnomalyEvent) -> Result<(), PersistenceError> {
        let record = EventRecord::from_event(event);
        let line = serde_json::to_string(&record)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.event_log)?;
        writeln!(file, "{line}")?;

        Ok(())
    }

    /// Overwrite the local copy of the raw remote file with the latest
    /// snapshot, same destination layout the pull used to write to.
    pub fn mirror_snapshot(
        &self,
        meta: &RemoteFileMeta,
        content: &[u8],
    ) -> Result<(), PersistenceError> {
        if !self.mirror_raw {
            return Ok(());
        }

        let dir = self.study_dir(meta);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(&meta.name), content)?;
        Ok(())
    }
}

fn map_create_error(exc: std::io::Error, path: &Path) -> PersistenceError {
    if exc.kind() == std::io::ErrorKind::AlreadyExists {
        PersistenceError::AlreadyExists(path.to_string_lossy().to_string())
    } else {
        PersistenceError::Io(exc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnomalyKind, Row};
    use chrono::Utc;

    fn writer_in(dir: &Path) -> PersistenceWriter {
        let cfg = OutputConfig {
            root_dir: dir.join("out").to_string_lossy().to_string(),
            event_log: dir.join("events.jsonl").to_string_lossy().to_string(),
            mirror_raw: true,
        };
        PersistenceWriter::new(&cfg).expect("writer builds")
    }

    fn sample_meta() -> RemoteFileMeta {
        RemoteFileMeta::parse(
            "/remote/data",
            "SmartCareCsv_24EIc-003-001U_26.12.2024.17.14.02_26.12.2024.17.18.43.csv",
            "temp",
        )
    }

    fn sample_row() -> Row {
        Row {
            timestamp: "26.12.2024.17.14.02".to_string(),
            device_id: "C4:64:E3:A8:90:11".to_string(),
            battery: 87,
            hr: 72,
            o2: 98,
            spo2_status: "0".to_string(),
            pleth: vec![100, 101],
            red: vec![2000],
            ir: vec![3000],
            perfusion: vec![1.5, 2.25],
        }
    }

    #[test]
    fn batch_artifact_has_header_and_wire_form_arrays() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = writer_in(dir.path());
        let batch = Batch::new(vec![sample_row(), sample_row()]);

        let path = writer
            .write_batch(&sample_meta(), 1, &batch)
            .expect("batch writes");
        let content = std::fs::read_to_string(&path).expect("artifact readable");

        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,device_id,battery,hr,o2,spo2_status,pleth,red,ir,perfusion")
        );
        let first = lines.next().expect("one data row");
        assert!(first.contains("\"[100, 101]\""));
        assert!(first.contains("\"[1.5, 2.25]\""));
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn rewriting_the_same_sequence_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = writer_in(dir.path());
        let batch = Batch::new(vec![sample_row()]);

        writer
            .write_batch(&sample_meta(), 1, &batch)
            .expect("first write");
        let err = writer
            .write_batch(&sample_meta(), 1, &batch)
            .expect_err("second write must not overwrite");
        assert!(matches!(err, PersistenceError::AlreadyExists(_)));
    }

    #[test]
    fn event_log_accumulates_one_json_object_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = writer_in(dir.path());
        let event = AnomalyEvent {
            kind: AnomalyKind::Dropout,
            detected_at: Utc::now(),
            source_file: "f.csv".to_string(),
            detail: "3 error-status rows".to_string(),
        };

        writer.append_event(&event).expect("first append");
        writer.append_event(&event).expect("second append");

        let content = std::fs::read_to_string(dir.path().join("events.jsonl")).expect("log");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).expect("valid json");
        assert_eq!(parsed["kind"], "dropout");
        assert_eq!(parsed["value"], "3 error-status rows");
    }

    #[test]
    fn mirror_overwrites_with_latest_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = writer_in(dir.path());
        let meta = sample_meta();

        writer.mirror_snapshot(&meta, b"one").expect("first mirror");
        writer.mirror_snapshot(&meta, b"two").expect("second mirror");

        let mirrored = dir
            .path()
            .join("out")
            .join("24EIc-003-001U 26122024")
            .join(&meta.name);
        assert_eq!(std::fs::read(mirrored).expect("mirrored file"), b"two");
    }
}
