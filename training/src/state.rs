use std::fmt;

/// The lifecycle of a `TrainingLoop`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Idle,
    Running,
    Validating,
    Snapshotting,
    Done,
    Failed,
}

impl LoopState {
    /// Whether the loop can't make any further progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Validating => "validating",
            Self::Snapshotting => "snapshotting",
            Self::Done => "done",
            Self::Failed => "failed",
        };

        write!(f, "{s}")
    }
}
