//! Error taxonomy for optimization runs.

use thiserror::Error;

use crate::types::RunStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizeError {
    /// Bad lengths, quantities or constraint values. Raised before any search.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A demand item fits no stock bar, remnant or allowed welded composite.
    #[error(
        "demand item {demand_id} ({length}mm) exceeds the longest available stock ({longest_available}mm)"
    )]
    Infeasible {
        demand_id: String,
        length: f64,
        longest_available: f64,
        /// Minimum weld count that would make the item placeable, when known.
        suggested_welds: Option<u32>,
    },

    /// Broken pattern arithmetic or ledger bookkeeping.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl OptimizeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        OptimizeError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        OptimizeError::Internal {
            message: message.into(),
        }
    }

    /// Terminal run status this error ends a run with. Input errors are
    /// raised before a run starts and have none.
    pub fn status(&self) -> Option<RunStatus> {
        match self {
            OptimizeError::InvalidInput { .. } => None,
            OptimizeError::Infeasible { .. } => Some(RunStatus::Infeasible),
            OptimizeError::Internal { .. } => Some(RunStatus::Failed),
        }
    }

    /// Stable code for the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            OptimizeError::InvalidInput { .. } => "invalid_input",
            OptimizeError::Infeasible { .. } => "infeasible",
            OptimizeError::Internal { .. } => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, OptimizeError>;
