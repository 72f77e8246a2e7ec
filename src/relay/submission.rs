use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

/// key: relay-submission -> generic client request
///
/// The shape every adaptor accepts. Vendor-specific knobs travel in [`SubmissionMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmitRequest {
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub metadata: SubmissionMetadata,
}

/// Typed replacement for the free-form metadata map. Unknown or mistyped keys are
/// rejected at decode time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmissionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_last_frame: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageReference {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl TaskSubmitRequest {
    pub fn from_slice(body: &[u8]) -> RelayResult<Self> {
        serde_json::from_slice(body).map_err(|err| RelayError::Validation(err.to_string()))
    }

    /// The primary image, ignoring blank values.
    pub fn primary_image(&self) -> Option<&str> {
        self.image
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn has_prompt(&self) -> bool {
        !self.prompt.trim().is_empty()
    }

    fn has_image(&self) -> bool {
        self.primary_image().is_some()
            || self
                .metadata
                .images
                .iter()
                .any(|image| !image.url.trim().is_empty())
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.model.trim().is_empty() {
            return Err(RelayError::Validation("model is required".to_string()));
        }
        if !self.has_prompt() && !self.has_image() {
            return Err(RelayError::Validation(
                "prompt or image is required".to_string(),
            ));
        }
        Ok(())
    }
}
