use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use crate::error::{RelayError, RelayResult};
use crate::tasks::TaskPlatform;

/// key: channel-model -> upstream credentials (read-only)
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Channel {
    pub id: i64,
    pub channel_type: i32,
    pub base_url: Option<String>,
    pub key: String,
}

impl Channel {
    /// Channel override first, otherwise the platform's default endpoint.
    pub fn resolve_base_url(&self, platform: TaskPlatform) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| platform.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn channel(&self, channel_id: i64) -> RelayResult<Channel>;
}

#[derive(Clone)]
pub struct PgChannelDirectory {
    pool: PgPool,
}

impl PgChannelDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelDirectory for PgChannelDirectory {
    async fn channel(&self, channel_id: i64) -> RelayResult<Channel> {
        sqlx::query_as::<_, Channel>(
            "SELECT id, channel_type, base_url, key FROM channels WHERE id = $1",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| RelayError::ChannelLookup {
            channel_id,
            reason: err.to_string(),
        })?
        .ok_or_else(|| RelayError::ChannelLookup {
            channel_id,
            reason: "channel not found".to_string(),
        })
    }
}
