use thiserror::Error;

/// Failures a pipeline stage can report.
///
/// Expected absences (no consensus, router rejection, gate failure) are not
/// errors and never show up here.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("insufficient data: need {required} candles, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("invariant violated in {component}: {detail}")]
    InvariantViolation { component: String, detail: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn unavailable(symbol: &str, reason: impl ToString) -> Self {
        PipelineError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invariant(component: &str, detail: impl ToString) -> Self {
        PipelineError::InvariantViolation {
            component: component.to_string(),
            detail: detail.to_string(),
        }
    }

    /// True for failures the cycle recovers from with a neutral default.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::InsufficientData { .. }
                | PipelineError::DataUnavailable { .. }
                | PipelineError::Timeout { .. }
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
