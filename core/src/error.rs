use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("{0}")]
    Validation(String),

    #[error("simulation '{id}' not found")]
    NotFound { id: String },

    #[error("simulation '{id}' is {actual}, expected {expected}")]
    InvalidState {
        id:       String,
        expected: String,
        actual:   String,
    },

    #[error("unknown distribution method '{0}'")]
    UnknownDistributionMethod(String),

    #[error("record count must be > 0, got {0}")]
    InvalidRecordCount(i64),

    #[error("invalid window: end {end} is before start {start}")]
    InvalidWindow { start: i64, end: i64 },

    #[error("job {job_id} references missing simulation '{simulation_id}'")]
    JobOrphaned { job_id: i64, simulation_id: String },

    #[error("record {sequence_index} of simulation '{simulation_id}' failed: {reason}")]
    ExecutionFailure {
        simulation_id:  String,
        sequence_index: i64,
        reason:         String,
    },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    /// HTTP status code for surfacing this error to an API caller.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_)
            | Self::InvalidState { .. }
            | Self::UnknownDistributionMethod(_)
            | Self::InvalidRecordCount(_)
            | Self::InvalidWindow { .. }
            | Self::Serialization(_) => 400,
            Self::NotFound { .. } => 404,
            Self::JobOrphaned { .. }
            | Self::ExecutionFailure { .. }
            | Self::StoreUnavailable(_)
            | Self::Database(_)
            | Self::Other(_) => 500,
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
