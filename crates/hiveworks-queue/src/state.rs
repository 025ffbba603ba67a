use std::fmt;

/// Per-project queue state. `idle` is the default absent value; `running`
/// and `paused` toggle via `pause`/`resume`; `stopped` and `completed` are
/// terminal for a given run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "stopped" => Self::Stopped,
            "completed" => Self::Completed,
            _ => Self::Idle,
        }
    }

    /// `pop()` is a no-op while paused or stopped.
    pub fn blocks_pop(&self) -> bool {
        matches!(self, Self::Paused | Self::Stopped)
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
