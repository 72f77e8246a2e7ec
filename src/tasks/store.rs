use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{RelayError, RelayResult};

use super::models::{Task, TaskStatus};

/// key: task-store -> persisted task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &Task) -> RelayResult<()>;

    async fn get(&self, task_id: &str) -> RelayResult<Option<Task>>;

    async fn update(&self, task: &Task) -> RelayResult<()>;

    /// Moves every listed task to FAILURE at 100% with the given reason. `finish_time`
    /// is stamped with `now` unless already set.
    async fn bulk_fail(&self, task_ids: &[String], reason: &str, now: i64) -> RelayResult<u64>;

    /// Tasks not yet in a terminal status, oldest submission first.
    async fn list_unfinished(&self, limit: i64) -> RelayResult<Vec<Task>>;
}

/// key: task-store-postgres
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, task: &Task) -> RelayResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                task_id, platform, action, status, progress, model_name,
                user_id, channel_id, token_id, token_name, group_name, quota,
                submit_time, start_time, finish_time, fail_reason, data
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(&task.task_id)
        .bind(task.platform.as_str())
        .bind(&task.action)
        .bind(task.status.as_str())
        .bind(&task.progress)
        .bind(&task.model_name)
        .bind(task.user_id)
        .bind(task.channel_id)
        .bind(task.token_id)
        .bind(&task.token_name)
        .bind(&task.group)
        .bind(task.quota)
        .bind(task.submit_time)
        .bind(task.start_time)
        .bind(task.finish_time)
        .bind(&task.fail_reason)
        .bind(task.data.as_ref())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> RelayResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn update(&self, task: &Task) -> RelayResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = $2,
                progress = $3,
                model_name = $4,
                quota = $5,
                start_time = $6,
                finish_time = $7,
                fail_reason = $8,
                data = $9
            WHERE task_id = $1
            "#,
        )
        .bind(&task.task_id)
        .bind(task.status.as_str())
        .bind(&task.progress)
        .bind(&task.model_name)
        .bind(task.quota)
        .bind(task.start_time)
        .bind(task.finish_time)
        .bind(&task.fail_reason)
        .bind(task.data.as_ref())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(RelayError::Store(format!("task {} not found", task.task_id)));
        }
        Ok(())
    }

    async fn bulk_fail(&self, task_ids: &[String], reason: &str, now: i64) -> RelayResult<u64> {
        if task_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = $2,
                progress = '100%',
                fail_reason = $3,
                finish_time = CASE WHEN finish_time = 0 THEN $4 ELSE finish_time END
            WHERE task_id = ANY($1)
            "#,
        )
        .bind(task_ids)
        .bind(TaskStatus::Failure.as_str())
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn list_unfinished(&self, limit: i64) -> RelayResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE status NOT IN ('SUCCESS', 'FAILURE')
            ORDER BY submit_time ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(task_from_row).collect()
    }
}

fn task_from_row(row: &PgRow) -> RelayResult<Task> {
    let platform: String = row.try_get("platform").map_err(store_err)?;
    let status: String = row.try_get("status").map_err(store_err)?;
    let data: Vec<u8> = row.try_get("data").map_err(store_err)?;
    Ok(Task {
        task_id: row.try_get("task_id").map_err(store_err)?,
        platform: platform.parse()?,
        action: row.try_get("action").map_err(store_err)?,
        status: status.parse()?,
        progress: row.try_get("progress").map_err(store_err)?,
        model_name: row.try_get("model_name").map_err(store_err)?,
        user_id: row.try_get("user_id").map_err(store_err)?,
        channel_id: row.try_get("channel_id").map_err(store_err)?,
        token_id: row.try_get("token_id").map_err(store_err)?,
        token_name: row.try_get("token_name").map_err(store_err)?,
        group: row.try_get("group_name").map_err(store_err)?,
        quota: row.try_get("quota").map_err(store_err)?,
        submit_time: row.try_get("submit_time").map_err(store_err)?,
        start_time: row.try_get("start_time").map_err(store_err)?,
        finish_time: row.try_get("finish_time").map_err(store_err)?,
        fail_reason: row.try_get("fail_reason").map_err(store_err)?,
        data: Bytes::from(data),
    })
}

fn store_err(err: sqlx::Error) -> RelayError {
    RelayError::Store(err.to_string())
}

/// key: task-store-memory -> embedded deployments and tests
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<String, Task>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task) {
        self.tasks.insert(task.task_id.clone(), task);
    }

    pub fn snapshot(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task: &Task) -> RelayResult<()> {
        match self.tasks.entry(task.task_id.clone()) {
            Entry::Occupied(_) => Err(RelayError::Store(format!(
                "task {} already exists",
                task.task_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, task_id: &str) -> RelayResult<Option<Task>> {
        Ok(self.snapshot(task_id))
    }

    async fn update(&self, task: &Task) -> RelayResult<()> {
        match self.tasks.get_mut(&task.task_id) {
            Some(mut entry) => {
                *entry = task.clone();
                Ok(())
            }
            None => Err(RelayError::Store(format!("task {} not found", task.task_id))),
        }
    }

    async fn bulk_fail(&self, task_ids: &[String], reason: &str, now: i64) -> RelayResult<u64> {
        let mut affected = 0;
        for task_id in task_ids {
            if let Some(mut entry) = self.tasks.get_mut(task_id) {
                entry.status = TaskStatus::Failure;
                entry.progress = "100%".to_string();
                entry.fail_reason = reason.to_string();
                entry.mark_finished(now);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn list_unfinished(&self, limit: i64) -> RelayResult<Vec<Task>> {
        let mut pending: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|task| task.submit_time);
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }
}
