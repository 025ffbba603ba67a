use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hiveworks_queue::{QueueState, RequestQueue};

use crate::context::AppContext;
use crate::run::run_project;

const COMMAND_CHANNELS: [&str; 2] = ["spider:commands", "worker:command"];
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// A parsed `spider:commands` / `worker:command` message. The bare string
/// `"restart"` and `{"action":"restart"}` are both accepted.
#[derive(Debug, Clone)]
pub enum Command {
    Run { project_id: i64, max_items: Option<i64> },
    Test { project_id: i64, max_items: Option<i64> },
    Stop { project_id: i64 },
    TestStop { project_id: i64 },
    Pause { project_id: i64 },
    Resume { project_id: i64 },
    Restart,
}

impl Command {
    pub fn parse(raw: &str) -> Option<Command> {
        let trimmed = raw.trim();
        if trimmed == "restart" || trimmed == "\"restart\"" {
            return Some(Command::Restart);
        }

        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        let action = value.get("action")?.as_str()?;
        let project_id = value.get("project_id").and_then(|v| v.as_i64());
        let max_items = value.get("max_items").and_then(|v| v.as_i64());

        match action {
            "run" => Some(Command::Run { project_id: project_id?, max_items }),
            "test" => Some(Command::Test { project_id: project_id?, max_items }),
            "stop" => Some(Command::Stop { project_id: project_id? }),
            "test_stop" => Some(Command::TestStop { project_id: project_id? }),
            "pause" => Some(Command::Pause { project_id: project_id? }),
            "resume" => Some(Command::Resume { project_id: project_id? }),
            "restart" => Some(Command::Restart),
            _ => None,
        }
    }
}

/// Subscribes to both command channels and dispatches every parsed message
/// until `cancel` fires. Reconnects on a dropped pub/sub connection rather
/// than exiting, matching a long-lived service's expectations.
pub async fn run_command_listener(ctx: Arc<AppContext>, cancel: CancellationToken) {
    'reconnect: loop {
        if cancel.is_cancelled() {
            return;
        }

        let mut pubsub = match ctx.redis_client.get_async_pubsub().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to open command pub/sub connection, retrying");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
        };

        for channel in COMMAND_CHANNELS {
            if let Err(e) = pubsub.subscribe(channel).await {
                warn!(channel, error = %e, "failed to subscribe to command channel");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue 'reconnect;
            }
        }
        info!(channels = ?COMMAND_CHANNELS, "command listener subscribed");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => {
                    match next {
                        Some(msg) => {
                            let Ok(payload) = msg.get_payload::<String>() else { continue };
                            debug!(payload = %payload, "command received");
                            match Command::parse(&payload) {
                                Some(cmd) => dispatch(ctx.clone(), cmd).await,
                                None => warn!(payload = %payload, "unrecognized command payload"),
                            }
                        }
                        None => {
                            warn!("command pub/sub stream ended, reconnecting");
                            continue 'reconnect;
                        }
                    }
                }
            }
        }
    }
}

async fn dispatch(ctx: Arc<AppContext>, cmd: Command) {
    match cmd {
        Command::Run { project_id, max_items } => start_task(ctx, project_id, false, max_items).await,
        Command::Test { project_id, max_items } => start_task(ctx, project_id, true, max_items).await,
        Command::Stop { project_id } => stop_task(&ctx, project_id, false, false).await,
        Command::TestStop { project_id } => stop_task(&ctx, project_id, true, true).await,
        Command::Pause { project_id } => set_queue_state(&ctx, project_id, QueueState::Paused).await,
        Command::Resume { project_id } => set_queue_state(&ctx, project_id, QueueState::Running).await,
        Command::Restart => {
            info!("restart command received, cancelling all tasks and signalling shutdown");
            ctx.restart_requested.store(true, Ordering::SeqCst);
            ctx.shutdown.cancel();
        }
    }
}

/// Cancels any existing task for `(project_id, is_test)`, then starts a
/// fresh one. Matches the `run`/`test` action's "cancel existing, start
/// new" contract.
pub async fn start_task(ctx: Arc<AppContext>, project_id: i64, is_test: bool, max_items: Option<i64>) {
    let key = (project_id, is_test);
    if let Some((_, old_cancel)) = ctx.tasks.remove(&key) {
        old_cancel.cancel();
    }

    let cancel = CancellationToken::new();
    ctx.tasks.insert(key, cancel.clone());

    let ctx_for_task = ctx.clone();
    tokio::spawn(async move {
        run_project(ctx_for_task, project_id, is_test, max_items, cancel).await;
    });
}

async fn stop_task(ctx: &Arc<AppContext>, project_id: i64, is_test: bool, clear: bool) {
    if let Some(entry) = ctx.tasks.get(&(project_id, is_test)) {
        entry.value().cancel();
    }

    let mut queue = RequestQueue::new(ctx.redis_conn.clone(), project_id, is_test);
    if let Err(e) = queue.stop(clear).await {
        warn!(project_id, error = %e, "queue stop failed");
    }

    if is_test {
        let channel = format!("spider:logs:test_{project_id}");
        let payload = serde_json::json!({"type": "end", "project_id": project_id});
        let mut conn = ctx.redis_conn.clone();
        let _: Result<(), _> = conn.publish(channel, payload.to_string()).await;
    }
}

async fn set_queue_state(ctx: &Arc<AppContext>, project_id: i64, state: QueueState) {
    let mut queue = RequestQueue::new(ctx.redis_conn.clone(), project_id, false);
    if let Err(e) = queue.set_state(state).await {
        warn!(project_id, error = %e, "failed to set queue state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_max_items() {
        let cmd = Command::parse(r#"{"action":"run","project_id":7,"max_items":50}"#).unwrap();
        assert!(matches!(cmd, Command::Run { project_id: 7, max_items: Some(50) }));
    }

    #[test]
    fn parses_test_without_max_items() {
        let cmd = Command::parse(r#"{"action":"test","project_id":3}"#).unwrap();
        assert!(matches!(cmd, Command::Test { project_id: 3, max_items: None }));
    }

    #[test]
    fn parses_stop_and_test_stop() {
        assert!(matches!(
            Command::parse(r#"{"action":"stop","project_id":1}"#),
            Some(Command::Stop { project_id: 1 })
        ));
        assert!(matches!(
            Command::parse(r#"{"action":"test_stop","project_id":1}"#),
            Some(Command::TestStop { project_id: 1 })
        ));
    }

    #[test]
    fn parses_pause_and_resume() {
        assert!(matches!(
            Command::parse(r#"{"action":"pause","project_id":2}"#),
            Some(Command::Pause { project_id: 2 })
        ));
        assert!(matches!(
            Command::parse(r#"{"action":"resume","project_id":2}"#),
            Some(Command::Resume { project_id: 2 })
        ));
    }

    #[test]
    fn restart_accepts_bare_string_and_json_form() {
        assert!(matches!(Command::parse("restart"), Some(Command::Restart)));
        assert!(matches!(Command::parse("\"restart\""), Some(Command::Restart)));
        assert!(matches!(
            Command::parse(r#"{"action":"restart"}"#),
            Some(Command::Restart)
        ));
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(Command::parse(r#"{"action":"frobnicate","project_id":1}"#).is_none());
    }

    #[test]
    fn rejects_run_missing_project_id() {
        assert!(Command::parse(r#"{"action":"run"}"#).is_none());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Command::parse("not json").is_none());
    }
}
