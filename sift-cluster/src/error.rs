use thiserror::Error;

use sift::{ConfigError, SourceError};

/// Failures of the distributed layer that prevent a job from starting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterError {
    /// A division count below 1
    #[error("division count must be at least 1, got {0}")]
    InvalidDivisionCount(i64),

    /// A slave job could not be encoded or decoded
    #[error("slave job encoding failed: {0}")]
    Serialization(String),

    /// The cluster refused a slave job
    #[error("dispatching slave job {slave} failed: {message}")]
    Dispatch {
        /// Index of the slave
        slave: usize,
        /// Why it was refused
        message: String,
    },

    /// The job or a rebuilt slave job is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The rows of the job's table could not be counted
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl From<bincode::Error> for ClusterError {
    fn from(e: bincode::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}

impl From<snap::Error> for ClusterError {
    fn from(e: snap::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}
