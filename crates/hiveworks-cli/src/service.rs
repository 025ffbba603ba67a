use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use hiveworks_workers::Scheduler;

use crate::commands::run_command_listener;
use crate::context::AppContext;
use crate::dispatcher::CliDispatcher;
use crate::generator::GeneratorManager;

/// Top-level process wiring: command listener, content generator pool, and
/// (when enabled) the schedule poller, each as its own background task
/// sharing one `AppContext` and cancelled together on shutdown.
pub struct Service {
    ctx: Arc<AppContext>,
    handles: Vec<JoinHandle<()>>,
}

impl Service {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx, handles: Vec::new() }
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("starting hiveworks-cli service");
        let cancel = self.ctx.shutdown.clone();

        let listener_ctx = self.ctx.clone();
        let listener_cancel = cancel.clone();
        self.handles
            .push(tokio::spawn(run_command_listener(listener_ctx, listener_cancel)));

        let generator_ctx = self.ctx.clone();
        let generator_cancel = cancel.clone();
        self.handles.push(tokio::spawn(async move {
            GeneratorManager::new(generator_ctx).run(generator_cancel).await;
        }));

        if self.ctx.config.enable_scheduler {
            let dispatcher = Arc::new(CliDispatcher::new(self.ctx.clone()));
            let scheduler = Scheduler::new(self.ctx.projects.clone(), dispatcher);
            let scheduler_cancel = cancel.clone();
            self.handles
                .push(tokio::spawn(async move { scheduler.run(scheduler_cancel).await }));
        } else {
            info!("scheduler disabled by configuration");
        }

        info!(tasks = self.handles.len(), "hiveworks-cli service started");
        Ok(())
    }

    /// Cancels the shared shutdown token and waits for every background
    /// task to observe it and exit.
    pub async fn stop(&mut self) {
        info!("stopping hiveworks-cli service");
        self.ctx.shutdown.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("hiveworks-cli service stopped");
    }
}
