use serde::Deserialize;

use crate::error::{RelayError, RelayResult};

use super::models::{TaskInfo, TaskStatus};

const SUCCESS_CODE: &str = "success";

/// key: task-envelope -> this gateway's inter-service task response
///
/// Returned when a channel points at another instance of this gateway instead of a
/// vendor. Every field the reconciler relies on is required so a vendor payload
/// never decodes as an envelope.
#[derive(Debug, Deserialize)]
pub struct GatewayEnvelope {
    pub code: String,
    #[serde(default)]
    pub message: String,
    pub data: EnvelopeTask,
}

#[derive(Debug, Deserialize)]
pub struct EnvelopeTask {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub progress: String,
    #[serde(default)]
    pub fail_reason: String,
}

impl GatewayEnvelope {
    pub fn decode(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// The envelope's fields are trusted as-is. An empty status maps to `None`.
    pub fn into_task_info(self) -> RelayResult<TaskInfo> {
        let data = self.data;
        let status = if data.status.is_empty() {
            None
        } else {
            Some(
                data.status
                    .parse::<TaskStatus>()
                    .map_err(|_| RelayError::UnknownStatus {
                        task_id: data.task_id.clone(),
                        status: data.status.clone(),
                    })?,
            )
        };
        Ok(TaskInfo {
            task_id: data.task_id,
            status,
            progress: data.progress,
            url: data.fail_reason.clone(),
            reason: data.fail_reason,
            total_tokens: 0,
        })
    }
}
