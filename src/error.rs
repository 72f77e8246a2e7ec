use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),
    #[error("failed to parse upstream response: {0}")]
    ResponseParse(String),
    #[error("unknown task status `{status}` for task {task_id}")]
    UnknownStatus { task_id: String, status: String },
    #[error("ledger write failed: {0}")]
    LedgerWrite(String),
    #[error("task store error: {0}")]
    Store(String),
    #[error("channel #{channel_id} lookup failed: {reason}")]
    ChannelLookup { channel_id: i64, reason: String },
    #[error("no adaptor registered for platform `{0}`")]
    AdaptorMissing(String),
}

impl RelayError {
    /// HTTP-equivalent status for surfacing the error to a caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) | RelayError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            RelayError::UpstreamTransport(_) | RelayError::ResponseParse(_) => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::ChannelLookup { .. } => StatusCode::NOT_FOUND,
            RelayError::UnknownStatus { .. }
            | RelayError::LedgerWrite(_)
            | RelayError::Store(_)
            | RelayError::AdaptorMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Errors that are expected to clear on a later poll.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::UpstreamTransport(_) | RelayError::UnknownStatus { .. }
        )
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::UpstreamTransport(err.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = RelayError::Validation("model is required".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_transient());
    }

    #[test]
    fn unknown_status_is_transient() {
        let err = RelayError::UnknownStatus {
            task_id: "cgt-1".into(),
            status: "PAUSED".into(),
        };
        assert!(err.is_transient());
        assert_eq!(
            err.to_string(),
            "unknown task status `PAUSED` for task cgt-1"
        );
    }
}
