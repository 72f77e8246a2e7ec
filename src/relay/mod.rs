use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::{RelayError, RelayResult};
use crate::tasks::{TaskInfo, TaskPlatform};

pub mod submission;
pub mod volc;

pub use submission::{ImageReference, SubmissionMetadata, TaskSubmitRequest};
pub use volc::VolcVideoAdaptor;

/// A request already translated into a vendor's wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorRequest {
    pub model: String,
    pub body: Value,
}

/// Outcome of a successful submission: the vendor's task id plus the raw response body.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedTask {
    pub task_id: String,
    pub raw: Bytes,
}

/// key: relay-task-adaptor -> per-vendor submit/fetch/parse contract
#[async_trait]
pub trait TaskAdaptor: Send + Sync {
    /// Validates the generic request and maps it to the vendor shape. A non-empty
    /// `upstream_model` (from channel model mapping) replaces the caller's model.
    fn build_request(
        &self,
        request: &TaskSubmitRequest,
        upstream_model: Option<&str>,
    ) -> RelayResult<VendorRequest>;

    async fn submit(
        &self,
        base_url: &str,
        key: &str,
        request: &VendorRequest,
    ) -> RelayResult<SubmittedTask>;

    /// Issues the polling request and hands back the body untouched.
    async fn fetch_task(&self, base_url: &str, key: &str, task_id: &str) -> RelayResult<Bytes>;

    fn parse_task_result(&self, body: &[u8]) -> RelayResult<TaskInfo>;

    fn model_list(&self) -> Vec<&'static str>;

    fn channel_name(&self) -> &'static str;
}

/// key: relay-adaptor-registry -> platform lookup
#[derive(Clone, Default)]
pub struct AdaptorRegistry {
    adaptors: HashMap<TaskPlatform, Arc<dyn TaskAdaptor>>,
}

impl AdaptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in vendor adaptor.
    pub fn bootstrap() -> RelayResult<Self> {
        let mut registry = Self::new();
        registry.register(
            TaskPlatform::VolcVideo,
            Arc::new(VolcVideoAdaptor::from_config()?),
        );
        Ok(registry)
    }

    pub fn register(&mut self, platform: TaskPlatform, adaptor: Arc<dyn TaskAdaptor>) {
        self.adaptors.insert(platform, adaptor);
    }

    pub fn get(&self, platform: TaskPlatform) -> RelayResult<Arc<dyn TaskAdaptor>> {
        self.adaptors
            .get(&platform)
            .cloned()
            .ok_or_else(|| RelayError::AdaptorMissing(platform.to_string()))
    }
}
