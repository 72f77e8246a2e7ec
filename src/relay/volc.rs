use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config;
use crate::error::{RelayError, RelayResult};
use crate::tasks::{TaskInfo, TaskStatus};

use super::{SubmittedTask, TaskAdaptor, TaskSubmitRequest, VendorRequest};

// key: relay-volc-video -> Volcengine Ark content generation tasks

const TASKS_PATH: &str = "api/v3/contents/generations/tasks";
const DEFAULT_IMAGE_ROLE: &str = "first_frame";

#[derive(Debug, Serialize)]
struct ContentImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct ContentItem<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<ContentImageUrl<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

impl<'a> ContentItem<'a> {
    fn text(text: &'a str) -> Self {
        Self {
            kind: "text",
            text: Some(text),
            image_url: None,
            role: None,
        }
    }

    fn image(url: &'a str, role: Option<&'a str>) -> Self {
        Self {
            kind: "image_url",
            text: None,
            image_url: Some(ContentImageUrl { url }),
            role,
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    model: &'a str,
    content: Vec<ContentItem<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    return_last_frame: bool,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    id: String,
}

/// Vendor payloads send `null` for absent values; treat it like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FetchContent {
    #[serde(default, deserialize_with = "null_as_default")]
    video_url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FetchUsage {
    #[serde(default, deserialize_with = "null_as_default")]
    completion_tokens: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    total_tokens: i64,
}

#[derive(Debug, Default, Deserialize)]
struct FetchError {
    #[serde(default, deserialize_with = "null_as_default")]
    code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    content: FetchContent,
    #[serde(default, deserialize_with = "null_as_default")]
    usage: FetchUsage,
    #[serde(default, deserialize_with = "null_as_default")]
    created_at: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    updated_at: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    seed: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    resolution: String,
    #[serde(default, deserialize_with = "null_as_default")]
    duration: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    ratio: String,
    #[serde(default, deserialize_with = "null_as_default")]
    framespersecond: i64,
    #[serde(default)]
    error: Option<FetchError>,
}

/// Vendor metadata kept on a finished task so settlement can recover the model later.
#[derive(Debug, Serialize)]
struct SuccessSnapshot<'a> {
    id: &'a str,
    model: &'a str,
    status: &'a str,
    content: &'a FetchContent,
    usage: &'a FetchUsage,
    created_at: i64,
    updated_at: i64,
    seed: i64,
    resolution: &'a str,
    duration: i64,
    ratio: &'a str,
    framespersecond: i64,
}

impl<'a> From<&'a FetchResponse> for SuccessSnapshot<'a> {
    fn from(response: &'a FetchResponse) -> Self {
        Self {
            id: &response.id,
            model: &response.model,
            status: &response.status,
            content: &response.content,
            usage: &response.usage,
            created_at: response.created_at,
            updated_at: response.updated_at,
            seed: response.seed,
            resolution: &response.resolution,
            duration: response.duration,
            ratio: &response.ratio,
            framespersecond: response.framespersecond,
        }
    }
}

/// key: relay-volc-adaptor
#[derive(Clone)]
pub struct VolcVideoAdaptor {
    client: reqwest::Client,
}

impl VolcVideoAdaptor {
    pub fn new(timeout: Duration) -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                RelayError::UpstreamTransport(format!("failed to build volc client: {err}"))
            })?;
        Ok(Self { client })
    }

    pub fn from_config() -> RelayResult<Self> {
        Self::new(Duration::from_secs(*config::UPSTREAM_TIMEOUT_SECS))
    }

    fn endpoint(base_url: &str, suffix: Option<&str>) -> String {
        let base = base_url.trim_end_matches('/');
        match suffix {
            Some(task_id) => format!("{base}/{TASKS_PATH}/{task_id}"),
            None => format!("{base}/{TASKS_PATH}"),
        }
    }
}

#[async_trait]
impl TaskAdaptor for VolcVideoAdaptor {
    fn build_request(
        &self,
        request: &TaskSubmitRequest,
        upstream_model: Option<&str>,
    ) -> RelayResult<VendorRequest> {
        request.validate()?;

        let model = upstream_model
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| request.model.trim());

        let mut content = Vec::new();
        if request.has_prompt() {
            content.push(ContentItem::text(&request.prompt));
        }
        if let Some(image) = request.primary_image() {
            let role = request
                .metadata
                .role
                .as_deref()
                .filter(|role| !role.is_empty())
                .unwrap_or(DEFAULT_IMAGE_ROLE);
            content.push(ContentItem::image(image, Some(role)));
        }
        for image in &request.metadata.images {
            let url = image.url.trim();
            if url.is_empty() {
                continue;
            }
            let role = image.role.as_deref().filter(|role| !role.is_empty());
            content.push(ContentItem::image(url, role));
        }

        let body = SubmitBody {
            model,
            content,
            callback_url: request
                .metadata
                .callback_url
                .as_deref()
                .filter(|url| !url.is_empty()),
            return_last_frame: request.metadata.return_last_frame.unwrap_or(false),
        };
        let body = serde_json::to_value(&body)
            .map_err(|err| RelayError::InvalidArgument(err.to_string()))?;

        Ok(VendorRequest {
            model: model.to_string(),
            body,
        })
    }

    async fn submit(
        &self,
        base_url: &str,
        key: &str,
        request: &VendorRequest,
    ) -> RelayResult<SubmittedTask> {
        let response = self
            .client
            .post(Self::endpoint(base_url, None))
            .bearer_auth(key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request.body)
            .send()
            .await?;
        let status = response.status();
        let raw = response.bytes().await?;

        if !status.is_success() {
            return Err(RelayError::UpstreamTransport(format!(
                "volc submission returned {status}: {}",
                String::from_utf8_lossy(&raw)
            )));
        }

        let parsed: SubmitResponse = serde_json::from_slice(&raw)
            .map_err(|err| RelayError::ResponseParse(err.to_string()))?;
        if parsed.id.is_empty() {
            return Err(RelayError::ResponseParse("empty task id".to_string()));
        }

        tracing::info!(
            task_id = %parsed.id,
            model = %request.model,
            "volc video task submitted"
        );
        Ok(SubmittedTask {
            task_id: parsed.id,
            raw,
        })
    }

    async fn fetch_task(&self, base_url: &str, key: &str, task_id: &str) -> RelayResult<Bytes> {
        if task_id.is_empty() {
            return Err(RelayError::InvalidArgument("invalid task_id".to_string()));
        }
        let response = self
            .client
            .get(Self::endpoint(base_url, Some(task_id)))
            .bearer_auth(key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        // Error payloads are still parsed: they carry the vendor error code.
        Ok(response.bytes().await?)
    }

    fn parse_task_result(&self, body: &[u8]) -> RelayResult<TaskInfo> {
        let response: FetchResponse = serde_json::from_slice(body)
            .map_err(|err| RelayError::ResponseParse(err.to_string()))?;
        let task_id = response.id.clone();

        if let Some(error) = response.error.as_ref().filter(|e| !e.code.is_empty()) {
            let mut info = TaskInfo::new(task_id, TaskStatus::Failure, "100%");
            info.reason = format!("{}: {}", error.code, error.message);
            return Ok(info);
        }

        if response.status.is_empty() {
            let mut info = TaskInfo::new(task_id, TaskStatus::Unknown, "0%");
            info.reason = "unrecognized response format".to_string();
            return Ok(info);
        }

        let info = match response.status.to_ascii_lowercase().as_str() {
            "queued" => TaskInfo::new(task_id, TaskStatus::Queued, "20%"),
            "running" => TaskInfo::new(task_id, TaskStatus::InProgress, "60%"),
            "succeeded" => {
                let mut info = TaskInfo::new(task_id, TaskStatus::Success, "100%");
                info.url = response.content.video_url.clone();
                info.total_tokens = response.usage.total_tokens;
                match serde_json::to_string(&SuccessSnapshot::from(&response)) {
                    Ok(snapshot) => info.reason = snapshot,
                    Err(err) => tracing::warn!(?err, "failed to encode volc success snapshot"),
                }
                info
            }
            "failed" => {
                let mut info = TaskInfo::new(task_id, TaskStatus::Failure, "100%");
                info.reason = response
                    .error
                    .as_ref()
                    .map(|error| error.message.clone())
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| "task execution failed".to_string());
                info
            }
            _ => {
                let mut info = TaskInfo::new(task_id, TaskStatus::Unknown, "0%");
                info.reason = format!("unrecognized status: {}", response.status);
                info
            }
        };
        Ok(info)
    }

    fn model_list(&self) -> Vec<&'static str> {
        vec![
            "doubao-seedance-pro-250528",
            "doubao-seedance-1-0-lite-t2v-250428",
            "doubao-seedance-1-0-lite-i2v-250428",
            "wan2-1-14b-t2v-250428",
            "wan2-1-14b-i2v-250428",
            "wan2-1-14b-flf2v-250428",
        ]
    }

    fn channel_name(&self) -> &'static str {
        "volcvideo"
    }
}
