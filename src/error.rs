use thiserror::Error;

/// Failure classes surfaced to the task status field.
///
/// Configuration problems are caught before the task ever transitions to
/// running; data problems abort the load phase. Anything unexpected inside
/// the day loop propagates as a plain `anyhow::Error` and fails the run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The task row is not runnable as configured.
    #[error("invalid task configuration: {0}")]
    Configuration(String),

    /// The requested signal source exists but is not implemented.
    #[error("unsupported signal source: {0}")]
    UnsupportedSignalSource(String),

    /// Required rows were missing from the store.
    #[error("no data available: {0}")]
    DataUnavailable(String),
}

impl EngineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    pub fn data_unavailable(message: impl Into<String>) -> Self {
        EngineError::DataUnavailable(message.into())
    }
}
