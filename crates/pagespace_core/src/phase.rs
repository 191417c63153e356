use thiserror::Error;

/// Lifecycle of one export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Configuring,
    Listing,
    Rendering,
    Fetching,
    Done,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot {action} a run in phase {from:?}")]
pub struct PhaseError {
    pub from: RunPhase,
    pub action: &'static str,
}

impl RunPhase {
    pub fn advance(self) -> Result<RunPhase, PhaseError> {
        match self {
            RunPhase::Configuring => Ok(RunPhase::Listing),
            RunPhase::Listing => Ok(RunPhase::Rendering),
            RunPhase::Rendering => Ok(RunPhase::Fetching),
            RunPhase::Fetching => Ok(RunPhase::Done),
            RunPhase::Done | RunPhase::Failed => Err(PhaseError {
                from: self,
                action: "advance",
            }),
        }
    }

    /// Only configuration and page listing can fail a run; failures while
    /// rendering or fetching are isolated to their item.
    pub fn fail(self) -> Result<RunPhase, PhaseError> {
        match self {
            RunPhase::Configuring | RunPhase::Listing => Ok(RunPhase::Failed),
            _ => Err(PhaseError {
                from: self,
                action: "fail",
            }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }
}
