use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::billing::SettlementEngine;
use crate::channels::{Channel, ChannelDirectory};
use crate::error::{RelayError, RelayResult};
use crate::relay::{AdaptorRegistry, TaskAdaptor};

use super::claims::TaskClaims;
use super::context::RunContext;
use super::envelope::GatewayEnvelope;
use super::models::{Task, TaskInfo, TaskPlatform, TaskStatus};
use super::store::TaskStore;
use super::summary::ReconcileSummary;

/// Tasks of one platform sharing one channel; polled sequentially.
#[derive(Debug, Clone)]
pub struct ChannelBatch {
    pub platform: TaskPlatform,
    pub channel_id: i64,
    pub tasks: Vec<Task>,
}

/// Which decoder produced the normalized result.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Gateway(TaskInfo),
    Vendor(TaskInfo),
}

/// Tries the inter-service envelope first and only falls back to the vendor decoder
/// when the body is not a successful envelope.
pub fn decode_poll_response(adaptor: &dyn TaskAdaptor, body: &[u8]) -> RelayResult<PollResult> {
    match GatewayEnvelope::decode(body) {
        Some(envelope) if envelope.is_success() => {
            envelope.into_task_info().map(PollResult::Gateway)
        }
        _ => adaptor.parse_task_result(body).map(PollResult::Vendor),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Updated(TaskStatus),
    Settled { delta: i64 },
    Refunded { quota: i64 },
    /// Status was Unknown; left untouched for the next poll.
    Deferred,
}

/// key: task-reconciler -> poll, transition, settle
pub struct Reconciler {
    store: Arc<dyn TaskStore>,
    channels: Arc<dyn ChannelDirectory>,
    adaptors: AdaptorRegistry,
    settlement: SettlementEngine,
    claims: TaskClaims,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        channels: Arc<dyn ChannelDirectory>,
        adaptors: AdaptorRegistry,
        settlement: SettlementEngine,
    ) -> Self {
        Self {
            store,
            channels,
            adaptors,
            settlement,
            claims: TaskClaims::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn claims(&self) -> &TaskClaims {
        &self.claims
    }

    /// Channels run concurrently; a failing channel never blocks the others.
    pub async fn reconcile_all(
        &self,
        ctx: &RunContext,
        batches: Vec<ChannelBatch>,
    ) -> ReconcileSummary {
        let span = info_span!("reconcile_run", run_id = %ctx.run_id());
        async move {
            let runs = batches.into_iter().map(|batch| async move {
                let channel_id = batch.channel_id;
                match self.reconcile_channel(ctx, batch).await {
                    Ok(summary) => summary,
                    Err((summary, err)) => {
                        error!(?err, %channel_id, "failed to update async tasks for channel");
                        summary
                    }
                }
            });

            let mut total = ReconcileSummary::default();
            for summary in join_all(runs).await {
                total.absorb(summary);
            }
            info!(
                polled = total.polled,
                updated = total.updated,
                settled = total.settled,
                refunded = total.refunded,
                deferred = total.deferred,
                skipped = total.skipped,
                failed = total.failed,
                channel_failures = total.channel_failures,
                "task reconciliation run finished"
            );
            total
        }
        .instrument(span)
        .await
    }

    pub async fn reconcile_channel(
        &self,
        ctx: &RunContext,
        batch: ChannelBatch,
    ) -> Result<ReconcileSummary, (ReconcileSummary, RelayError)> {
        let mut summary = ReconcileSummary::default();
        let ChannelBatch {
            platform,
            channel_id,
            tasks,
        } = batch;
        info!(%channel_id, %platform, pending = tasks.len(), "polling pending async tasks");
        if tasks.is_empty() {
            return Ok(summary);
        }

        let channel = match self.channels.channel(channel_id).await {
            Ok(channel) => channel,
            Err(err) => {
                let task_ids: Vec<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
                let reason = format!("failed to get channel info, channel id: {channel_id}");
                let now = Utc::now().timestamp();
                if let Err(update_err) = self.store.bulk_fail(&task_ids, &reason, now).await {
                    error!(?update_err, %channel_id, "failed to mark channel tasks as failed");
                }
                summary.channel_failures += 1;
                summary.failed += task_ids.len() as u64;
                return Err((summary, err));
            }
        };

        let adaptor = match self.adaptors.get(platform) {
            Ok(adaptor) => adaptor,
            Err(err) => {
                summary.channel_failures += 1;
                return Err((summary, err));
            }
        };
        let base_url = channel.resolve_base_url(platform);

        for task in tasks {
            if ctx.is_cancelled() {
                info!(%channel_id, "run cancelled, not starting further polls");
                break;
            }
            let Some(_claim) = self.claims.try_claim(&task.task_id) else {
                debug!(task_id = %task.task_id, "task already claimed by another pass");
                summary.skipped += 1;
                continue;
            };

            let task_id = task.task_id.clone();
            match self
                .reconcile_task(ctx, adaptor.as_ref(), &channel, &base_url, task)
                .await
            {
                Ok(outcome) => summary.record(&outcome),
                Err(err) => {
                    if err.is_transient() {
                        warn!(?err, %task_id, %channel_id, "task poll deferred");
                    } else {
                        error!(?err, %task_id, %channel_id, "failed to update async task");
                    }
                    summary.record_failure();
                }
            }
        }
        Ok(summary)
    }

    async fn reconcile_task(
        &self,
        ctx: &RunContext,
        adaptor: &dyn TaskAdaptor,
        channel: &Channel,
        base_url: &str,
        mut task: Task,
    ) -> RelayResult<TaskOutcome> {
        let body: Bytes = adaptor
            .fetch_task(base_url, &channel.key, &task.task_id)
            .await?;
        let info = match decode_poll_response(adaptor, &body)? {
            PollResult::Gateway(info) => info,
            PollResult::Vendor(info) => {
                task.data = body;
                info
            }
        };
        self.apply_result(ctx, &mut task, &info, Utc::now().timestamp())
            .await
    }

    /// Applies one normalized result to `task`.
    ///
    /// The new status is persisted before any billing effect. If that write fails the
    /// task keeps its stored status and the whole transition is retried on the next
    /// poll, so a refund or settlement is never applied to a transition that was not
    /// recorded. Billing failures are logged and leave the recorded status in place.
    pub async fn apply_result(
        &self,
        ctx: &RunContext,
        task: &mut Task,
        info: &TaskInfo,
        now: i64,
    ) -> RelayResult<TaskOutcome> {
        let Some(status) = info.status else {
            return Err(RelayError::ResponseParse(format!(
                "task {} status is empty",
                task.task_id
            )));
        };
        let previous = task.status;

        match status {
            TaskStatus::Submitted => task.progress = "10%".to_string(),
            TaskStatus::Queued => task.progress = "20%".to_string(),
            TaskStatus::InProgress => {
                task.progress = "30%".to_string();
                task.mark_started(now);
            }
            TaskStatus::Success => {
                task.progress = "100%".to_string();
                task.mark_started(now);
                task.mark_finished(now);
                task.fail_reason = info.url.clone();
            }
            TaskStatus::Failure => {
                task.progress = "100%".to_string();
                task.mark_started(now);
                task.mark_finished(now);
                task.fail_reason = info.reason.clone();
                info!(task_id = %task.task_id, reason = %task.fail_reason, "async task failed");
            }
            TaskStatus::Unknown => {
                warn!(
                    run_id = %ctx.run_id(),
                    task_id = %task.task_id,
                    reason = %info.reason,
                    "vendor reported an unrecognized state, retrying next poll"
                );
                return Ok(TaskOutcome::Deferred);
            }
        }
        task.status = status;
        if !info.progress.is_empty() {
            task.progress = info.progress.clone();
        }

        self.store.update(task).await?;

        match status {
            TaskStatus::Success if info.total_tokens > 0 => {
                match self.settlement.settle(ctx, task, info, now).await {
                    Ok(outcome) => {
                        if outcome.delta != 0 {
                            if let Err(err) = self.store.update(task).await {
                                error!(?err, task_id = %task.task_id, "failed to persist settled quota");
                            }
                        }
                        Ok(TaskOutcome::Settled {
                            delta: outcome.delta,
                        })
                    }
                    Err(err) => {
                        error!(?err, run_id = %ctx.run_id(), task_id = %task.task_id, "settlement failed");
                        Ok(TaskOutcome::Updated(status))
                    }
                }
            }
            TaskStatus::Failure if previous != TaskStatus::Failure => {
                match self.settlement.refund_failed(ctx, task).await {
                    Ok(quota) if quota != 0 => Ok(TaskOutcome::Refunded { quota }),
                    Ok(_) => Ok(TaskOutcome::Updated(status)),
                    Err(err) => {
                        error!(?err, run_id = %ctx.run_id(), task_id = %task.task_id, "failure refund failed");
                        Ok(TaskOutcome::Updated(status))
                    }
                }
            }
            _ => Ok(TaskOutcome::Updated(status)),
        }
    }
}
