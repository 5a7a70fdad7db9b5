use thiserror::Error;

use crate::reconciliation::{MatchAction, MatchStatus};

/// A user action that the transition table does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} a match that is {from}")]
pub struct TransitionError {
    pub from: MatchStatus,
    pub action: MatchAction,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no match candidate with id '{0}'")]
    UnknownCandidate(String),

    #[error("match '{id}': {source}")]
    NotAllowed {
        id: String,
        #[source]
        source: TransitionError,
    },

    #[error("server refused to {action} match '{id}'")]
    Refused {
        id: String,
        action: MatchAction,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to refresh match candidates")]
    Refresh(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("unknown match status: {0}")]
    UnknownStatus(String),

    #[error("unknown match action: {0}")]
    UnknownAction(String),

    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
