use crate::CoreError;
use std::fmt;

/// Progress of one object through a wait barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitState {
    Pending,
    InProgress,
    Reconciled,
    Failed,
    TimedOut,
    /// Not waited on because its apply or prune did not succeed.
    Skipped,
}

impl WaitState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WaitState::Reconciled | WaitState::Failed | WaitState::TimedOut | WaitState::Skipped
        )
    }
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitState::Pending => write!(f, "pending"),
            WaitState::InProgress => write!(f, "in-progress"),
            WaitState::Reconciled => write!(f, "reconciled"),
            WaitState::Failed => write!(f, "failed"),
            WaitState::TimedOut => write!(f, "timed-out"),
            WaitState::Skipped => write!(f, "skipped"),
        }
    }
}

pub fn validate_transition(from: WaitState, to: WaitState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            WaitState::Pending,
            WaitState::InProgress
                | WaitState::Reconciled
                | WaitState::Failed
                | WaitState::TimedOut
                | WaitState::Skipped
        ) | (
            WaitState::InProgress,
            WaitState::InProgress | WaitState::Reconciled | WaitState::Failed | WaitState::TimedOut
        )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
