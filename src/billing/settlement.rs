use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::config;
use crate::error::RelayResult;
use crate::tasks::{RunContext, Task, TaskInfo};

use super::ledger::{AdjustmentDetails, AdjustmentType, ConsumeLogEntry, Ledger};
use super::rates::RateProvider;

const DEFAULT_GROUP: &str = "default";

/// Ratios applied to a settlement, already neutralized (never zero).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementRates {
    pub model_ratio: f64,
    pub completion_ratio: f64,
    pub group_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementAction {
    /// User was charged the shortfall.
    Supplement(i64),
    /// User was credited the excess.
    Refund(i64),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementOutcome {
    pub model_name: String,
    pub actual_quota: i64,
    pub delta: i64,
    pub rates: SettlementRates,
    pub action: SettlementAction,
}

/// key: billing-settlement -> usage based quota correction
#[derive(Clone)]
pub struct SettlementEngine {
    ledger: Arc<dyn Ledger>,
    rates: Arc<dyn RateProvider>,
    default_model: String,
}

impl SettlementEngine {
    pub fn new(ledger: Arc<dyn Ledger>, rates: Arc<dyn RateProvider>) -> Self {
        Self {
            ledger,
            rates,
            default_model: config::DEFAULT_BILLING_MODEL.clone(),
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn rates_for(&self, model_name: &str, group: &str) -> SettlementRates {
        SettlementRates {
            model_ratio: neutral(self.rates.model_ratio(model_name)),
            completion_ratio: neutral(self.rates.completion_ratio(model_name)),
            group_ratio: neutral(self.rates.group_ratio(group)),
        }
    }

    /// Charges or credits the gap between the usage-based cost and `task.quota`.
    ///
    /// `task.quota` becomes the actual cost once the balance adjustment lands, so a
    /// repeated settlement with the same usage is a no-op. Failures after the balance
    /// adjustment (audit entries, aggregates) are logged and do not undo it.
    pub async fn settle(
        &self,
        ctx: &RunContext,
        task: &mut Task,
        info: &TaskInfo,
        now: i64,
    ) -> RelayResult<SettlementOutcome> {
        let model_name = resolve_model_name(task, info, &self.default_model);
        if model_name == self.default_model && task.model_name.is_empty() {
            info!(
                run_id = %ctx.run_id(),
                task_id = %task.task_id,
                model = %model_name,
                "no model recorded for task, billing default model"
            );
        }
        let group = if task.group.is_empty() {
            DEFAULT_GROUP
        } else {
            task.group.as_str()
        };
        let rates = self.rates_for(&model_name, group);
        let actual_quota = compute_actual_quota(info.total_tokens, &rates);
        let delta = actual_quota - task.quota;

        let action = if delta > 0 {
            self.ledger.decrease_user_quota(task.user_id, delta).await?;
            self.record_supplement(ctx, task, info, &model_name, &rates, delta, now)
                .await;
            SettlementAction::Supplement(delta)
        } else if delta < 0 {
            self.ledger.increase_user_quota(task.user_id, -delta).await?;
            let content = format!(
                "video task {} token-based adjustment, refunded {} (tokens: {}, model: {})",
                task.task_id, -delta, info.total_tokens, model_name
            );
            if let Err(err) = self.ledger.record_system_log(task.user_id, &content).await {
                error!(?err, run_id = %ctx.run_id(), task_id = %task.task_id, "failed to record settlement refund log");
            }
            SettlementAction::Refund(-delta)
        } else {
            SettlementAction::None
        };

        if delta != 0 {
            task.quota = actual_quota;
        }

        info!(
            run_id = %ctx.run_id(),
            task_id = %task.task_id,
            tokens = info.total_tokens,
            quota = actual_quota,
            delta,
            "video task settled on token usage"
        );

        Ok(SettlementOutcome {
            model_name,
            actual_quota,
            delta,
            rates,
            action,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_supplement(
        &self,
        ctx: &RunContext,
        task: &Task,
        info: &TaskInfo,
        model_name: &str,
        rates: &SettlementRates,
        delta: i64,
        now: i64,
    ) {
        let username = match self.ledger.username(task.user_id).await {
            Ok(name) => name,
            Err(err) => {
                warn!(?err, user_id = task.user_id, "falling back to synthetic username");
                format!("user_{}", task.user_id)
            }
        };
        let entry = ConsumeLogEntry {
            user_id: task.user_id,
            username,
            channel_id: task.channel_id,
            token_id: task.token_id,
            token_name: task.token_name.clone(),
            model_name: model_name.to_string(),
            group: task.group.clone(),
            prompt_tokens: 0,
            completion_tokens: info.total_tokens,
            quota: delta,
            content: format!(
                "video task supplemental charge, model ratio {:.2}, completion ratio {:.2}, group ratio {:.2}",
                rates.model_ratio, rates.completion_ratio, rates.group_ratio
            ),
            use_time_seconds: task.use_time_seconds(now),
            is_stream: false,
            other: AdjustmentDetails {
                task_id: task.task_id.clone(),
                action: task.action.clone(),
                model_ratio: rates.model_ratio,
                completion_ratio: rates.completion_ratio,
                group_ratio: rates.group_ratio,
                adjustment_type: AdjustmentType::Supplement,
            },
        };

        if let Err(err) = self.ledger.record_consume_log(&entry).await {
            error!(?err, run_id = %ctx.run_id(), task_id = %task.task_id, "failed to record supplement consume log");
        }
        if let Err(err) = self
            .ledger
            .update_user_used_quota_and_request_count(task.user_id, delta)
            .await
        {
            error!(?err, run_id = %ctx.run_id(), user_id = task.user_id, "failed to update user usage aggregate");
        }
        if let Err(err) = self
            .ledger
            .update_channel_used_quota(task.channel_id, delta)
            .await
        {
            error!(?err, run_id = %ctx.run_id(), channel_id = task.channel_id, "failed to update channel usage aggregate");
        }
    }

    /// Releases the whole reservation held by a failed task. Returns the refunded amount.
    pub async fn refund_failed(&self, ctx: &RunContext, task: &Task) -> RelayResult<i64> {
        let quota = task.quota;
        if quota == 0 {
            return Ok(0);
        }
        self.ledger.increase_user_quota(task.user_id, quota).await?;
        let content = format!(
            "video async task {} failed, refunded {}",
            task.task_id, quota
        );
        if let Err(err) = self.ledger.record_system_log(task.user_id, &content).await {
            error!(?err, run_id = %ctx.run_id(), task_id = %task.task_id, "failed to record failure refund log");
        }
        Ok(quota)
    }
}

fn neutral(ratio: f64) -> f64 {
    if ratio == 0.0 {
        1.0
    } else {
        ratio
    }
}

/// `round(tokens * completion * model * group)`, floored to one unit when the model
/// is billable at all.
pub fn compute_actual_quota(total_tokens: i64, rates: &SettlementRates) -> i64 {
    let raw = total_tokens as f64 * rates.completion_ratio * rates.model_ratio * rates.group_ratio;
    let actual = raw.round() as i64;
    if actual <= 0 && rates.model_ratio > 0.0 {
        1
    } else {
        actual
    }
}

#[derive(Deserialize)]
struct ModelProbe {
    #[serde(default)]
    model: String,
}

fn probe_model(raw: &[u8]) -> Option<String> {
    serde_json::from_slice::<ModelProbe>(raw)
        .ok()
        .map(|probe| probe.model)
        .filter(|model| !model.is_empty())
}

/// Task model, then the success snapshot, then the raw vendor payload, then `default`.
pub fn resolve_model_name(task: &Task, info: &TaskInfo, default: &str) -> String {
    if !task.model_name.is_empty() {
        return task.model_name.clone();
    }
    probe_model(info.reason.as_bytes())
        .or_else(|| probe_model(&task.data))
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{TaskPlatform, TaskStatus};
    use bytes::Bytes;

    fn rates(model: f64, completion: f64, group: f64) -> SettlementRates {
        SettlementRates {
            model_ratio: model,
            completion_ratio: completion,
            group_ratio: group,
        }
    }

    #[test]
    fn actual_quota_rounds_product() {
        assert_eq!(compute_actual_quota(50, &rates(1.0, 2.0, 1.0)), 100);
        assert_eq!(compute_actual_quota(3, &rates(0.5, 1.0, 1.0)), 2);
        assert_eq!(compute_actual_quota(10, &rates(0.33, 1.0, 1.0)), 3);
    }

    #[test]
    fn tiny_usage_charges_minimal_unit() {
        assert_eq!(compute_actual_quota(1, &rates(0.1, 1.0, 1.0)), 1);
        assert_eq!(compute_actual_quota(0, &rates(1.0, 1.0, 1.0)), 1);
    }

    #[test]
    fn zero_rates_are_neutral() {
        assert_eq!(neutral(0.0), 1.0);
        assert_eq!(neutral(2.5), 2.5);
    }

    #[test]
    fn model_name_fallback_order() {
        let mut task = Task::new("cgt-1", TaskPlatform::VolcVideo);
        let mut info = TaskInfo::new("cgt-1", TaskStatus::Success, "100%");

        assert_eq!(resolve_model_name(&task, &info, "fallback"), "fallback");

        task.data = Bytes::from_static(br#"{"model":"from-data"}"#);
        assert_eq!(resolve_model_name(&task, &info, "fallback"), "from-data");

        info.reason = r#"{"model":"from-snapshot"}"#.to_string();
        assert_eq!(resolve_model_name(&task, &info, "fallback"), "from-snapshot");

        task.model_name = "from-task".to_string();
        assert_eq!(resolve_model_name(&task, &info, "fallback"), "from-task");
    }

    #[test]
    fn unparseable_reason_is_skipped() {
        let mut task = Task::new("cgt-1", TaskPlatform::VolcVideo);
        task.data = Bytes::from_static(br#"{"model":"from-data"}"#);
        let mut info = TaskInfo::new("cgt-1", TaskStatus::Success, "100%");
        info.reason = "https://cdn/video.mp4".to_string();
        assert_eq!(resolve_model_name(&task, &info, "fallback"), "from-data");
    }
}
