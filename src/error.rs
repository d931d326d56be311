//! Error types for the detector.
//!
//! Per-pixel shortfalls (too few observations to fit, masked readings) are not
//! errors; they degrade to "no change" for that pixel. Only problems that make
//! the whole run meaningless surface here.

use crate::core_modules::epoch::YearWindow;
use thiserror::Error;

/// Error returned by a `SeriesProvider`.
pub type FetchError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, DetectorError>;

/// The collaborator call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Training,
    Monitoring,
    Retraining,
}

impl std::fmt::Display for FetchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FetchStage::Training => "training",
            FetchStage::Monitoring => "monitoring",
            FetchStage::Retraining => "retraining",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("{stage} fetch failed for {window}")]
    Fetch {
        stage: FetchStage,
        window: YearWindow,
        #[source]
        source: FetchError,
    },

    #[error("eligibility mask fetch failed")]
    EligibilityFetch(#[source] FetchError),

    #[error("{what} covers {found} pixels, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("worker pool failure: {0}")]
    WorkerPool(&'static str),
}
