/// Redis key layout for one project's queue. `spider:{project_id}:*` for a
/// live run, `test_spider:{project_id}:*` for a test run — kept as
/// independent namespaces so a test run never touches live queue state.
pub struct QueueKeys {
    pending: String,
    processing: String,
    seen: String,
    completed: String,
    stats: String,
    state: String,
    item_count: String,
    queued_count: String,
}

impl QueueKeys {
    pub fn new(project_id: i64, is_test: bool) -> Self {
        let prefix = if is_test { "test_spider" } else { "spider" };
        let base = format!("{prefix}:{project_id}");
        Self {
            pending: format!("{base}:pending"),
            processing: format!("{base}:processing"),
            seen: format!("{base}:seen"),
            completed: format!("{base}:completed"),
            stats: format!("{base}:stats"),
            state: format!("{base}:state"),
            item_count: format!("{base}:item_count"),
            queued_count: format!("{base}:queued_count"),
        }
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }
    pub fn processing(&self) -> &str {
        &self.processing
    }
    pub fn seen(&self) -> &str {
        &self.seen
    }
    pub fn completed(&self) -> &str {
        &self.completed
    }
    pub fn stats(&self) -> &str {
        &self.stats
    }
    pub fn state(&self) -> &str {
        &self.state
    }
    pub fn item_count(&self) -> &str {
        &self.item_count
    }
    pub fn queued_count(&self) -> &str {
        &self.queued_count
    }

    pub fn all(&self) -> [&str; 8] {
        [
            &self.pending,
            &self.processing,
            &self.seen,
            &self.completed,
            &self.stats,
            &self.state,
            &self.item_count,
            &self.queued_count,
        ]
    }
}
