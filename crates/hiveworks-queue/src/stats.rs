use serde::{Deserialize, Serialize};

/// Snapshot of a project queue's counters plus the two live-measured depths
/// (`pending`, `processing`), which are never stored as counters themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub retried: i64,
    pub pending: i64,
    pub processing: i64,
}

impl QueueStats {
    pub fn success_rate(&self) -> f64 {
        let done = self.completed + self.failed;
        if done == 0 {
            return 0.0;
        }
        (self.completed as f64 / done as f64 * 100.0 * 100.0).round() / 100.0
    }
}
