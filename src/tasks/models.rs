use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// key: task-status -> lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Submitted,
    Queued,
    InProgress,
    Success,
    Failure,
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = RelayError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "SUBMITTED" => Ok(TaskStatus::Submitted),
            "QUEUED" => Ok(TaskStatus::Queued),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILURE" => Ok(TaskStatus::Failure),
            "UNKNOWN" => Ok(TaskStatus::Unknown),
            other => Err(RelayError::InvalidArgument(format!(
                "unrecognized task status `{other}`"
            ))),
        }
    }
}

/// Which adaptor owns a task. Channels carry the numeric provider tag this maps from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPlatform {
    VolcVideo,
}

impl TaskPlatform {
    pub const VOLC_CHANNEL_TYPE: i32 = 45;

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPlatform::VolcVideo => "volcvideo",
        }
    }

    pub fn from_channel_type(channel_type: i32) -> Option<Self> {
        match channel_type {
            Self::VOLC_CHANNEL_TYPE => Some(TaskPlatform::VolcVideo),
            _ => None,
        }
    }

    /// Base URL used when a channel does not override it.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            TaskPlatform::VolcVideo => "https://ark.cn-beijing.volces.com",
        }
    }
}

impl fmt::Display for TaskPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPlatform {
    type Err = RelayError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "volcvideo" => Ok(TaskPlatform::VolcVideo),
            other => Err(RelayError::AdaptorMissing(other.to_string())),
        }
    }
}

/// key: task-model -> persisted task record
///
/// Created at submission with `quota` already debited from the user. Timestamps are
/// epoch seconds; `0` means unset.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub platform: TaskPlatform,
    pub action: String,
    pub status: TaskStatus,
    pub progress: String,
    pub model_name: String,
    pub user_id: i64,
    pub channel_id: i64,
    pub token_id: i64,
    pub token_name: String,
    pub group: String,
    pub quota: i64,
    pub submit_time: i64,
    pub start_time: i64,
    pub finish_time: i64,
    pub fail_reason: String,
    pub data: Bytes,
}

impl Task {
    pub fn new(task_id: impl Into<String>, platform: TaskPlatform) -> Self {
        Self {
            task_id: task_id.into(),
            platform,
            action: "generate".to_string(),
            status: TaskStatus::Submitted,
            progress: String::new(),
            model_name: String::new(),
            user_id: 0,
            channel_id: 0,
            token_id: 0,
            token_name: String::new(),
            group: String::new(),
            quota: 0,
            submit_time: 0,
            start_time: 0,
            finish_time: 0,
            fail_reason: String::new(),
            data: Bytes::new(),
        }
    }

    pub fn mark_started(&mut self, now: i64) {
        if self.start_time == 0 {
            self.start_time = now;
        }
    }

    pub fn mark_finished(&mut self, now: i64) {
        if self.finish_time == 0 {
            self.finish_time = now;
        }
    }

    /// Seconds between submission and completion, falling back to `now` when the
    /// recorded finish time does not lie after submission.
    pub fn use_time_seconds(&self, now: i64) -> i64 {
        let elapsed = self.finish_time - self.submit_time;
        if elapsed > 0 {
            elapsed
        } else {
            now - self.submit_time
        }
    }
}

/// key: task-info -> adaptor-normalized poll result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskInfo {
    pub task_id: String,
    pub status: Option<TaskStatus>,
    pub progress: String,
    pub url: String,
    pub reason: String,
    pub total_tokens: i64,
}

impl TaskInfo {
    pub fn new(task_id: impl Into<String>, status: TaskStatus, progress: &str) -> Self {
        Self {
            task_id: task_id.into(),
            status: Some(status),
            progress: progress.to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in [
            TaskStatus::Submitted,
            TaskStatus::Queued,
            TaskStatus::InProgress,
            TaskStatus::Success,
            TaskStatus::Failure,
            TaskStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("NOT_START".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn timestamps_are_set_once() {
        let mut task = Task::new("cgt-1", TaskPlatform::VolcVideo);
        task.mark_started(100);
        task.mark_started(200);
        task.mark_finished(300);
        task.mark_finished(400);
        assert_eq!(task.start_time, 100);
        assert_eq!(task.finish_time, 300);
    }

    #[test]
    fn use_time_falls_back_to_now() {
        let mut task = Task::new("cgt-1", TaskPlatform::VolcVideo);
        task.submit_time = 1_000;
        assert_eq!(task.use_time_seconds(1_042), 42);
        task.finish_time = 1_010;
        assert_eq!(task.use_time_seconds(1_042), 10);
    }

    #[test]
    fn channel_type_maps_to_platform() {
        assert_eq!(
            TaskPlatform::from_channel_type(45),
            Some(TaskPlatform::VolcVideo)
        );
        assert_eq!(TaskPlatform::from_channel_type(1), None);
    }
}
