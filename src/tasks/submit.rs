use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::channels::Channel;
use crate::error::{RelayError, RelayResult};
use crate::relay::{AdaptorRegistry, TaskSubmitRequest};

use super::models::{Task, TaskPlatform, TaskStatus};
use super::store::TaskStore;

/// Billing identity of the caller. `reserved_quota` has already been debited by the
/// caller's pre-consume step.
#[derive(Debug, Clone, Default)]
pub struct SubmissionOwner {
    pub user_id: i64,
    pub token_id: i64,
    pub token_name: String,
    pub group: String,
    pub reserved_quota: i64,
}

/// key: task-submit -> vendor submission and task record creation
pub struct TaskSubmitter {
    store: Arc<dyn TaskStore>,
    adaptors: AdaptorRegistry,
}

impl TaskSubmitter {
    pub fn new(store: Arc<dyn TaskStore>, adaptors: AdaptorRegistry) -> Self {
        Self { store, adaptors }
    }

    pub async fn submit(
        &self,
        channel: &Channel,
        request: &TaskSubmitRequest,
        upstream_model: Option<&str>,
        owner: &SubmissionOwner,
    ) -> RelayResult<Task> {
        let platform = TaskPlatform::from_channel_type(channel.channel_type).ok_or_else(|| {
            RelayError::AdaptorMissing(format!("channel type {}", channel.channel_type))
        })?;
        let adaptor = self.adaptors.get(platform)?;

        let vendor_request = adaptor.build_request(request, upstream_model)?;
        let submitted = adaptor
            .submit(
                &channel.resolve_base_url(platform),
                &channel.key,
                &vendor_request,
            )
            .await?;

        let mut task = Task::new(submitted.task_id, platform);
        task.status = TaskStatus::Submitted;
        task.progress = "10%".to_string();
        task.model_name = vendor_request.model;
        task.user_id = owner.user_id;
        task.channel_id = channel.id;
        task.token_id = owner.token_id;
        task.token_name = owner.token_name.clone();
        task.group = owner.group.clone();
        task.quota = owner.reserved_quota;
        task.submit_time = Utc::now().timestamp();
        task.data = submitted.raw;

        self.store.create(&task).await?;
        info!(
            task_id = %task.task_id,
            channel_id = channel.id,
            vendor = adaptor.channel_name(),
            quota = task.quota,
            "async task recorded"
        );
        Ok(task)
    }
}
