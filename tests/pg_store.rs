use bytes::Bytes;
use sqlx::PgPool;
use task_relay::billing::{Ledger, PgLedger};
use task_relay::channels::{ChannelDirectory, PgChannelDirectory};
use task_relay::tasks::{PgTaskStore, Task, TaskPlatform, TaskStatus, TaskStore};
use task_relay::RelayError;

fn task(task_id: &str, submit_time: i64, status: TaskStatus) -> Task {
    let mut task = Task::new(task_id, TaskPlatform::VolcVideo);
    task.status = status;
    task.progress = "10%".to_string();
    task.model_name = "doubao-seedance-1-0-lite-i2v-250428".to_string();
    task.user_id = 1;
    task.channel_id = 7;
    task.group = "default".to_string();
    task.quota = 100;
    task.submit_time = submit_time;
    task.data = Bytes::from_static(br#"{"id":"x"}"#);
    task
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn task_store_round_trips_and_lists_unfinished(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = PgTaskStore::new(pool.clone());

    store.create(&task("cgt-a", 20, TaskStatus::Queued)).await.unwrap();
    store.create(&task("cgt-b", 10, TaskStatus::Submitted)).await.unwrap();
    store.create(&task("cgt-c", 5, TaskStatus::Success)).await.unwrap();
    assert!(store.create(&task("cgt-a", 20, TaskStatus::Queued)).await.is_err());

    let pending = store.list_unfinished(10).await.unwrap();
    let ids: Vec<_> = pending.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, vec!["cgt-b", "cgt-a"]);

    let mut running = store.get("cgt-a").await.unwrap().unwrap();
    assert_eq!(running.data, Bytes::from_static(br#"{"id":"x"}"#));
    running.status = TaskStatus::InProgress;
    running.start_time = 30;
    store.update(&running).await.unwrap();
    assert_eq!(store.get("cgt-a").await.unwrap().unwrap(), running);

    let affected = store
        .bulk_fail(
            &["cgt-a".to_string(), "cgt-b".to_string()],
            "failed to get channel info, channel id: 7",
            90,
        )
        .await
        .unwrap();
    assert_eq!(affected, 2);
    let failed = store.get("cgt-b").await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failure);
    assert_eq!(failed.progress, "100%");
    assert_eq!(failed.finish_time, 90);
    assert!(store.list_unfinished(10).await.unwrap().is_empty());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn ledger_adjusts_balances_and_writes_logs(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    sqlx::query("INSERT INTO users (id, username, quota) VALUES (1, 'alice', 1000)")
        .execute(&pool)
        .await
        .unwrap();
    let ledger = PgLedger::new(pool.clone());

    ledger.decrease_user_quota(1, 30).await.unwrap();
    ledger.increase_user_quota(1, 5).await.unwrap();
    ledger
        .update_user_used_quota_and_request_count(1, 30)
        .await
        .unwrap();
    ledger
        .record_system_log(1, "video async task cgt-1 failed, refunded 5")
        .await
        .unwrap();

    let (quota, used, requests): (i64, i64, i64) =
        sqlx::query_as("SELECT quota, used_quota, request_count FROM users WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!((quota, used, requests), (975, 30, 1));
    assert_eq!(ledger.username(1).await.unwrap(), "alice");

    let logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs WHERE log_type = 4")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(logs, 1);

    assert!(matches!(
        ledger.increase_user_quota(404, 1).await,
        Err(RelayError::LedgerWrite(_))
    ));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn channel_directory_reports_missing_channels(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    sqlx::query("INSERT INTO channels (id, channel_type, base_url, key) VALUES (7, 45, NULL, 'sk')")
        .execute(&pool)
        .await
        .unwrap();
    let directory = PgChannelDirectory::new(pool);

    let channel = directory.channel(7).await.unwrap();
    assert_eq!(channel.channel_type, 45);
    assert_eq!(
        channel.resolve_base_url(TaskPlatform::VolcVideo),
        "https://ark.cn-beijing.volces.com"
    );

    assert!(matches!(
        directory.channel(8).await,
        Err(RelayError::ChannelLookup { channel_id: 8, .. })
    ));
}
