use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// One decoded telemetry reading. Immutable once built; the decoder either
/// produces a whole `Row` or none at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: String,
    pub device_id: String,
    pub battery: u32,
    pub hr: u32,
    pub o2: u32,
    pub spo2_status: String,
    pub pleth: Vec<i64>,
    pub red: Vec<i64>,
    pub ir: Vec<i64>,
    pub perfusion: Vec<f64>,
}

/// A sealed group of rows in arrival order. Only the batch buffer constructs
/// these; once handed out the contents never change.
#[derive(Debug, Clone)]
pub struct Batch {
    rows: Vec<Row>,
}

impl Batch {
    pub(crate) fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Attributes derived from a remote file name such as
/// `SmartCareCsv_24EIc-003-001U_26.12.2024.17.14.02_26.12.2024.17.18.43.csv`:
/// the study code is the second underscore token, the capture date is the
/// first ten characters of the next-to-last token.
#[derive(Debug, Clone)]
pub struct RemoteFileMeta {
    pub folder: String,
    pub name: String,
    pub study_code: Option<String>,
    pub capture_date: Option<NaiveDate>,
    pub is_temp: bool,
}

impl RemoteFileMeta {
    pub fn parse(folder: &str, name: &str, temp_marker: &str) -> Self {
        let parts: Vec<&str> = name.split('_').collect();

        let study_code = if parts.len() >= 3 {
            Some(parts[1].to_string())
        } else {
            None
        };

        let capture_date = if parts.len() >= 3 {
            let start_token = parts[parts.len() - 2];
            start_token
                .get(..10)
                .and_then(|date| NaiveDate::parse_from_str(date, "%d.%m.%Y").ok())
        } else {
            None
        };

        let is_temp =
            !temp_marker.is_empty() && name.to_lowercase().contains(&temp_marker.to_lowercase());

        Self {
            folder: folder.to_string(),
            name: name.to_string(),
            study_code,
            capture_date,
            is_temp,
        }
    }

    /// Local folder for this study: `<study_code> <DDMMYYYY>`, or `unsorted`
    /// when the name carries no parseable study code and date.
    pub fn study_folder(&self) -> String {
        match (&self.study_code, self.capture_date) {
            (Some(code), Some(date)) => format!("{} {}", code, date.format("%d%m%Y")),
            _ => "unsorted".to_string(),
        }
    }

    /// File name without its extension, used for artifact naming.
    pub fn stem(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
    Dropout,
    Noise,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dropout => "dropout",
            Self::Noise => "noise",
        }
    }

    pub fn subject(self) -> &'static str {
        match self {
            Self::Dropout => "Oximeter Drop Detected",
            Self::Noise => "Noise Detected",
        }
    }

    pub fn body(self) -> &'static str {
        "Please check the patient"
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyEvent {
    pub kind: AnomalyKind,
    pub detected_at: DateTime<Utc>,
    pub source_file: String,
    pub detail: String,
}

/// One line of the durable event log.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: String,
    pub kind: String,
    pub message: String,
    pub value: String,
}

impl EventRecord {
    pub fn from_event(event: &AnomalyEvent) -> Self {
        Self {
            timestamp: event.detected_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            kind: event.kind.as_str().to_string(),
            message: format!("{} in {}", event.kind.subject(), event.source_file),
            value: event.detail.clone(),
        }
    }
}
