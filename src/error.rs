//! Error taxonomy for dump ingestion, caching and analysis.
//!
//! Almost every variant is scoped to a single frame: a batch run that hits one
//! of them skips that timestep and keeps going. Only [`DumpError::Config`] and
//! I/O failures on the cache root are fatal for a whole run.

use std::path::PathBuf;

use thiserror::Error;

use crate::frame::RecordKind;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed dump {path}: missing `{marker}`")]
    MalformedDump { path: PathBuf, marker: String },

    #[error("truncated dump {path}: header declares {declared} rows, payload has {found}")]
    TruncatedDump {
        path: PathBuf,
        declared: usize,
        found: usize,
    },

    #[error("corrupt payload in {path} at line {line}: {detail}")]
    CorruptPayload {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    #[error("invalid box bounds on {axis} axis: lo {lo} > hi {hi}")]
    InvalidBounds { axis: char, lo: f64, hi: f64 },

    #[error("no cached {kind} frame for timestep {timestep}")]
    FrameNotFound { kind: RecordKind, timestep: u64 },

    #[error("inconsistent cache entry for {kind} timestep {timestep}: {detail}")]
    InconsistentCacheEntry {
        kind: RecordKind,
        timestep: u64,
        detail: String,
    },

    #[error("column `{column}` not found (available: {})", .available.join(", "))]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    #[error("schema mismatch: {0}")]
    Schema(String),

    #[error("degenerate bins: {0}")]
    DegenerateBin(String),

    #[error("unknown species id {0}")]
    UnknownSpecies(i64),

    #[error("timestep {next} does not follow {last}")]
    OutOfOrder { last: u64, next: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("npy error on {path}: {detail}")]
    Npy { path: PathBuf, detail: String },

    #[error("metadata error on {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("csv error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

pub type DumpResult<T> = Result<T, DumpError>;

impl DumpError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DumpError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn npy(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        DumpError::Npy {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    /// True when the failure only invalidates one frame; batch runs skip and continue.
    pub fn is_frame_scoped(&self) -> bool {
        !matches!(self, DumpError::Config(_))
    }
}
