//! Deferred action worker.
//!
//! Each received action waits for its not-before time in its own task, then
//! runs under a semaphore that caps concurrent executions. Failures the
//! error type marks as transient are pushed back with a fixed backoff until
//! the attempt budget runs out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::FlowError;
use crate::scheduler::queue::{Action, ActionQueue, ActionReceiver, ScheduledAction};

/// Executes deferred actions. Returns a short outcome description.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, action: &Action) -> Result<String, FlowError>;
}

pub fn spawn_worker(
    handler: Arc<dyn ActionHandler>,
    queue: ActionQueue,
    mut receiver: ActionReceiver,
    config: SchedulerConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let permits = Arc::new(Semaphore::new(config.workers));
        info!(workers = config.workers, "Action worker started");

        while let Some(scheduled) = receiver.recv().await {
            let handler = Arc::clone(&handler);
            let queue = queue.clone();
            let permits = Arc::clone(&permits);
            let config = config.clone();

            tokio::spawn(async move {
                tokio::time::sleep_until(scheduled.not_before).await;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                run_one(handler.as_ref(), &queue, scheduled, &config).await;
            });
        }

        info!("Action queue closed, worker stopping");
    })
}

async fn run_one(
    handler: &dyn ActionHandler,
    queue: &ActionQueue,
    scheduled: ScheduledAction,
    config: &SchedulerConfig,
) {
    let ScheduledAction {
        action, attempt, ..
    } = scheduled;
    let attempt = attempt + 1;
    let name = action.name();
    let target = action.target();

    match handler.handle(&action).await {
        Ok(outcome) => {
            debug!(action = name, target = %target, attempt, outcome = %outcome, "Action done");
        }
        Err(e) if e.is_retryable() && attempt < config.max_attempts => {
            warn!(
                action = name,
                target = %target,
                attempt,
                error = %e,
                "Action failed, retrying"
            );
            queue.push(ScheduledAction {
                action,
                not_before: Instant::now() + config.retry_backoff,
                attempt,
            });
        }
        Err(e) => {
            error!(action = name, target = %target, attempt, error = %e, "Action failed");
        }
    }
}
