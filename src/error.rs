use thiserror::Error;

use crate::DynError;

/// Why a trade cycle could not run to completion.
///
/// `Fatal` covers precondition violations and terminal-negative confirmations
/// (rejected deposit, failed on-chain withdrawal, residual futures position):
/// the automated loop must stop and wait for an operator, because continuing
/// risks uncontrolled capital movement. `Venue` carries an unclassified venue
/// API failure that surfaced at the cycle boundary; the monitor loop treats it
/// as fail-stop as well, but logs it separately.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fatal abort: {0}")]
    Fatal(String),

    #[error("venue api error: {0}")]
    Venue(DynError),
}

impl CycleError {
    pub fn fatal(reason: impl Into<String>) -> Self {
        CycleError::Fatal(reason.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleError::Fatal(_))
    }
}

impl From<DynError> for CycleError {
    fn from(e: DynError) -> Self {
        CycleError::Venue(e)
    }
}
