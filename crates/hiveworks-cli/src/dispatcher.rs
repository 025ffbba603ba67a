use std::sync::Arc;

use async_trait::async_trait;

use hiveworks_workers::RunDispatcher;

use crate::commands::start_task;
use crate::context::AppContext;

/// Bridges the scheduler's "this project is due" decision to the same
/// task-registry-managed run flow a `run` command triggers, so a scheduled
/// fire and a manual `run` command can't both be in flight unsupervised.
pub struct CliDispatcher {
    ctx: Arc<AppContext>,
}

impl CliDispatcher {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RunDispatcher for CliDispatcher {
    async fn dispatch_run(&self, project_id: i64) -> Result<(), String> {
        start_task(self.ctx.clone(), project_id, false, None).await;
        Ok(())
    }
}
