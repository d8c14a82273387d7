//! Error types shared by the aggregation engine.

use thiserror::Error;

use crate::backend::StoreError;

/// Errors produced while building, loading or flushing the promtail config.
#[derive(Debug, Error)]
pub enum Error {
    /// Constructor input was rejected. Fatal at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The persisted text does not follow the header + record layout.
    #[error("malformed document at line {line}: {reason}")]
    MalformedDocument { line: usize, reason: String },

    /// Fetching or updating the backing object failed.
    #[error("backing store unavailable for {target}: {source}")]
    BackingStoreUnavailable {
        target: String,
        #[source]
        source: StoreError,
    },

    /// The workload runs several containers and none is marked as the
    /// logging container.
    #[error(
        "workload {workload} runs {containers} containers but none is selected with the '{label}' label",
        label = crate::resource::PROMTAIL_CONTAINER_NAME_LABEL
    )]
    AmbiguousContainerSelection { workload: String, containers: usize },

    /// The container named by the workload's label does not exist.
    #[error("container '{container}' selected for logging is not part of workload {workload}")]
    UnknownContainer { workload: String, container: String },

    /// The snippet source of a workload could not be read.
    #[error("snippet for workload {workload} unavailable: {reason}")]
    SnippetUnavailable { workload: String, reason: String },
}

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedDocument {
            line,
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }
}
