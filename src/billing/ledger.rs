use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;

use crate::error::{RelayError, RelayResult};

/// Log categories as stored in the `logs.log_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Consume,
    System,
}

impl LogType {
    pub fn code(&self) -> i16 {
        match self {
            LogType::Consume => 2,
            LogType::System => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    Supplement,
}

/// Structured metadata attached to a settlement consumption entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentDetails {
    pub task_id: String,
    pub action: String,
    pub model_ratio: f64,
    pub completion_ratio: f64,
    pub group_ratio: f64,
    pub adjustment_type: AdjustmentType,
}

/// key: billing-consume-log -> supplemental charge audit entry
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeLogEntry {
    pub user_id: i64,
    pub username: String,
    pub channel_id: i64,
    pub token_id: i64,
    pub token_name: String,
    pub model_name: String,
    pub group: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub quota: i64,
    pub content: String,
    pub use_time_seconds: i64,
    pub is_stream: bool,
    pub other: AdjustmentDetails,
}

/// key: billing-ledger -> quota system of record
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn decrease_user_quota(&self, user_id: i64, quota: i64) -> RelayResult<()>;

    async fn increase_user_quota(&self, user_id: i64, quota: i64) -> RelayResult<()>;

    async fn record_consume_log(&self, entry: &ConsumeLogEntry) -> RelayResult<()>;

    async fn record_system_log(&self, user_id: i64, content: &str) -> RelayResult<()>;

    async fn update_user_used_quota_and_request_count(
        &self,
        user_id: i64,
        quota: i64,
    ) -> RelayResult<()>;

    async fn update_channel_used_quota(&self, channel_id: i64, quota: i64) -> RelayResult<()>;

    async fn username(&self, user_id: i64) -> RelayResult<String>;
}

/// key: billing-ledger-postgres
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn adjust_user_quota(&self, user_id: i64, delta: i64) -> RelayResult<()> {
        let result = sqlx::query("UPDATE users SET quota = quota + $2 WHERE id = $1")
            .bind(user_id)
            .bind(delta)
            .execute(&self.pool)
            .await
            .map_err(ledger_err)?;
        if result.rows_affected() == 0 {
            return Err(RelayError::LedgerWrite(format!("user {user_id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn decrease_user_quota(&self, user_id: i64, quota: i64) -> RelayResult<()> {
        if quota < 0 {
            return Err(RelayError::InvalidArgument(
                "quota cannot be negative".to_string(),
            ));
        }
        self.adjust_user_quota(user_id, -quota).await
    }

    async fn increase_user_quota(&self, user_id: i64, quota: i64) -> RelayResult<()> {
        if quota < 0 {
            return Err(RelayError::InvalidArgument(
                "quota cannot be negative".to_string(),
            ));
        }
        self.adjust_user_quota(user_id, quota).await
    }

    async fn record_consume_log(&self, entry: &ConsumeLogEntry) -> RelayResult<()> {
        let other = serde_json::to_string(&entry.other)
            .map_err(|err| RelayError::LedgerWrite(err.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO logs (
                user_id, created_at, log_type, content, username, token_name,
                model_name, quota, prompt_tokens, completion_tokens, use_time,
                is_stream, channel_id, token_id, group_name, other
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(entry.user_id)
        .bind(Utc::now().timestamp())
        .bind(LogType::Consume.code())
        .bind(&entry.content)
        .bind(&entry.username)
        .bind(&entry.token_name)
        .bind(&entry.model_name)
        .bind(entry.quota)
        .bind(entry.prompt_tokens)
        .bind(entry.completion_tokens)
        .bind(entry.use_time_seconds)
        .bind(entry.is_stream)
        .bind(entry.channel_id)
        .bind(entry.token_id)
        .bind(&entry.group)
        .bind(other)
        .execute(&self.pool)
        .await
        .map_err(ledger_err)?;
        Ok(())
    }

    async fn record_system_log(&self, user_id: i64, content: &str) -> RelayResult<()> {
        sqlx::query(
            "INSERT INTO logs (user_id, created_at, log_type, content) VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(Utc::now().timestamp())
        .bind(LogType::System.code())
        .bind(content)
        .execute(&self.pool)
        .await
        .map_err(ledger_err)?;
        Ok(())
    }

    async fn update_user_used_quota_and_request_count(
        &self,
        user_id: i64,
        quota: i64,
    ) -> RelayResult<()> {
        sqlx::query(
            "UPDATE users SET used_quota = used_quota + $2, request_count = request_count + 1 WHERE id = $1",
        )
        .bind(user_id)
        .bind(quota)
        .execute(&self.pool)
        .await
        .map_err(ledger_err)?;
        Ok(())
    }

    async fn update_channel_used_quota(&self, channel_id: i64, quota: i64) -> RelayResult<()> {
        sqlx::query("UPDATE channels SET used_quota = used_quota + $2 WHERE id = $1")
            .bind(channel_id)
            .bind(quota)
            .execute(&self.pool)
            .await
            .map_err(ledger_err)?;
        Ok(())
    }

    async fn username(&self, user_id: i64) -> RelayResult<String> {
        sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ledger_err)?
            .ok_or_else(|| RelayError::LedgerWrite(format!("user {user_id} not found")))
    }
}

fn ledger_err(err: sqlx::Error) -> RelayError {
    RelayError::LedgerWrite(err.to_string())
}
