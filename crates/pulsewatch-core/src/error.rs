use thiserror::Error;

/// Failures talking to the remote device.
///
/// `NotFound` is fatal for the file being tailed; everything else is retried
/// on the next cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("remote file not found: {0}")]
    NotFound(String),
    #[error("no usable device: {0}")]
    Device(String),
    #[error("transport command failed: {0}")]
    Command(String),
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn is_fatal_for_file(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,
    #[error("line is not a quoted record")]
    Unquoted,
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("field `{name}` is not numeric: `{value}`")]
    Numeric { name: &'static str, value: String },
    #[error("field `{name}` is not an array literal: {reason}")]
    Array { name: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("artifact already exists: {0}")]
    AlreadyExists(String),
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("event encode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("notification auth: {0}")]
    Auth(String),
    #[error("notification request failed: {0}")]
    Http(String),
    #[error("notification endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}
