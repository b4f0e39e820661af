//! Job state machine.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NeverStarted,
    /// Stopped explicitly; `start()` resumes.
    Paused,
    Running,
    /// Every task settled successfully.
    Finished,
    /// Every task settled and at least one failed for a reason other than cancellation.
    Failed,
}

impl JobState {
    /// True once no more work will happen without another `start()`.
    pub fn is_settled(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }

    pub(crate) fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (NeverStarted | Paused | Finished | Failed, Running) => true,
            (Running, Paused | Finished | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::NeverStarted => "never-started",
            JobState::Paused => "paused",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}
