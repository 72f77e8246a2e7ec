use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config;

use super::context::RunContext;
use super::models::{Task, TaskPlatform};
use super::reconcile::{ChannelBatch, Reconciler};
use super::summary::ReconcileSummary;

/// key: task-poll-scheduler -> periodic reconciliation
///
/// Ticks never overlap: the next tick starts only after the previous run returns.
pub fn spawn(reconciler: Arc<Reconciler>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let interval = Duration::from_secs(*config::TASK_POLL_INTERVAL_SECS);
    let limit = *config::TASK_POLL_BATCH_LIMIT;

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("task poll scheduler stopping");
                        break;
                    }
                    continue;
                }
            }

            let ctx = RunContext::with_shutdown(shutdown.clone());
            if let Err(err) = process_tick(&reconciler, &ctx, limit).await {
                warn!(?err, run_id = %ctx.run_id(), "task reconciliation tick failed");
            }
        }
    })
}

/// key: task-poll-scheduler -> tick handler
pub async fn process_tick(
    reconciler: &Reconciler,
    ctx: &RunContext,
    limit: i64,
) -> Result<ReconcileSummary> {
    let pending = reconciler.store().list_unfinished(limit).await?;
    if pending.is_empty() {
        debug!(run_id = %ctx.run_id(), "no unfinished async tasks");
        return Ok(ReconcileSummary::default());
    }
    let batches = group_by_channel(pending);
    Ok(reconciler.reconcile_all(ctx, batches).await)
}

/// Groups tasks by platform and channel, ordered by channel id.
pub fn group_by_channel(tasks: Vec<Task>) -> Vec<ChannelBatch> {
    let mut grouped: BTreeMap<(i64, TaskPlatform), Vec<Task>> = BTreeMap::new();
    for task in tasks {
        grouped
            .entry((task.channel_id, task.platform))
            .or_default()
            .push(task);
    }
    grouped
        .into_iter()
        .map(|((channel_id, platform), tasks)| ChannelBatch {
            platform,
            channel_id,
            tasks,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, channel_id: i64) -> Task {
        let mut task = Task::new(id, TaskPlatform::VolcVideo);
        task.channel_id = channel_id;
        task
    }

    #[test]
    fn tasks_are_grouped_per_channel_in_order() {
        let batches = group_by_channel(vec![task("a", 3), task("b", 1), task("c", 3)]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].channel_id, 1);
        assert_eq!(batches[1].channel_id, 3);
        let ids: Vec<_> = batches[1].tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
