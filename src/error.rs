use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TrackerError {
    #[error("invalid geocode: {0}")]
    InvalidGeocode(String),

    #[error("invalid year: {0}")]
    InvalidYear(String),

    #[error("invalid epidemiological week: {0}")]
    InvalidWeek(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    #[error("permanent fetch failure: {0}")]
    PermanentFetch(String),

    #[error("fetch failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("download cancelled")]
    Cancelled,

    #[error("reference data not found: {0}")]
    #[diagnostic(help("run `dengue-tracker prepare` and generate the reference tables first"))]
    MissingReferenceData(PathBuf),

    #[error("failed to parse reference file {path}: {message}")]
    ReferenceParse { path: PathBuf, message: String },

    #[error("no case dataset at {0}")]
    #[diagnostic(help("run `dengue-tracker download` first"))]
    NoCaseData(PathBuf),

    #[error("failed to parse case dataset {path}: {message}")]
    DatasetParse { path: PathBuf, message: String },

    #[error("failed to persist case dataset: {0}")]
    #[diagnostic(help("the previous dataset was left untouched"))]
    Persistence(String),

    #[error("archive request failed: {0}")]
    ArchiveHttp(String),

    #[error("archive server returned status {status}: {message}")]
    ArchiveStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl TrackerError {
    /// Network-class failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::TransientFetch(_))
    }

    /// Errors a bulk download absorbs per cell instead of aborting.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            TrackerError::TransientFetch(_)
                | TrackerError::PermanentFetch(_)
                | TrackerError::RetriesExhausted { .. }
        )
    }
}
