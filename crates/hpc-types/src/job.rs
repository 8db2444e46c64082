//! Job lifecycle state machine.
//!
//! A `pending -> running -> {completed, failed, cancelled, timeout}`
//! pipeline for jobs handed off to this node, with an explicit
//! `queued` stage between admission and execution.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::Timeout
        )
    }

    fn valid_targets(&self) -> &'static [JobState] {
        match self {
            JobState::Pending => &[JobState::Queued, JobState::Failed, JobState::Cancelled],
            JobState::Queued => &[JobState::Running, JobState::Failed, JobState::Cancelled],
            JobState::Running => &[
                JobState::Completed,
                JobState::Failed,
                JobState::Cancelled,
                JobState::Timeout,
            ],
            // Terminal states are sinks.
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::Timeout => &[],
        }
    }

    /// Validate a transition against the table in spec §3; terminal states
    /// never accept an outgoing edge.
    pub fn transition(&self, to: JobState) -> Result<JobState, ModelError> {
        if self.valid_targets().contains(&to) {
            Ok(to)
        } else {
            Err(ModelError::InvalidJobTransition {
                from: format!("{self:?}"),
                to: format!("{to:?}"),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}
