#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use task_relay::billing::{ConfiguredRates, ConsumeLogEntry, Ledger, SettlementEngine};
use task_relay::channels::{Channel, ChannelDirectory};
use task_relay::relay::{AdaptorRegistry, VolcVideoAdaptor};
use task_relay::tasks::{MemoryTaskStore, Reconciler, Task, TaskPlatform, TaskStatus};
use task_relay::{RelayError, RelayResult};

pub const MODEL: &str = "doubao-seedance-1-0-lite-i2v-250428";
pub const DEFAULT_MODEL: &str = "doubao-seedance-1-0-lite-i2v";
pub const USER_ID: i64 = 1;
pub const CHANNEL_ID: i64 = 7;
pub const API_KEY: &str = "sk-volc-test";

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    Decrease { user_id: i64, quota: i64 },
    Increase { user_id: i64, quota: i64 },
    Consume(ConsumeLogEntry),
    System { user_id: i64, content: String },
    UserUsage { user_id: i64, quota: i64 },
    ChannelUsage { channel_id: i64, quota: i64 },
}

/// Ledger double that records every call.
#[derive(Default)]
pub struct RecordingLedger {
    events: Mutex<Vec<LedgerEvent>>,
    fail_adjustments: AtomicBool,
}

impl RecordingLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_adjustments(&self, fail: bool) {
        self.fail_adjustments.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn system_logs(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LedgerEvent::System { content, .. } => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn consume_logs(&self) -> Vec<ConsumeLogEntry> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LedgerEvent::Consume(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: LedgerEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn check_adjustment(&self) -> RelayResult<()> {
        if self.fail_adjustments.load(Ordering::SeqCst) {
            return Err(RelayError::LedgerWrite("ledger unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn decrease_user_quota(&self, user_id: i64, quota: i64) -> RelayResult<()> {
        self.check_adjustment()?;
        self.push(LedgerEvent::Decrease { user_id, quota });
        Ok(())
    }

    async fn increase_user_quota(&self, user_id: i64, quota: i64) -> RelayResult<()> {
        self.check_adjustment()?;
        self.push(LedgerEvent::Increase { user_id, quota });
        Ok(())
    }

    async fn record_consume_log(&self, entry: &ConsumeLogEntry) -> RelayResult<()> {
        self.push(LedgerEvent::Consume(entry.clone()));
        Ok(())
    }

    async fn record_system_log(&self, user_id: i64, content: &str) -> RelayResult<()> {
        self.push(LedgerEvent::System {
            user_id,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn update_user_used_quota_and_request_count(
        &self,
        user_id: i64,
        quota: i64,
    ) -> RelayResult<()> {
        self.push(LedgerEvent::UserUsage { user_id, quota });
        Ok(())
    }

    async fn update_channel_used_quota(&self, channel_id: i64, quota: i64) -> RelayResult<()> {
        self.push(LedgerEvent::ChannelUsage { channel_id, quota });
        Ok(())
    }

    async fn username(&self, user_id: i64) -> RelayResult<String> {
        if user_id == USER_ID {
            Ok("alice".to_string())
        } else {
            Err(RelayError::LedgerWrite(format!("user {user_id} not found")))
        }
    }
}

#[derive(Default)]
pub struct StaticChannels {
    channels: HashMap<i64, Channel>,
}

impl StaticChannels {
    pub fn with(channel: Channel) -> Arc<Self> {
        let mut channels = HashMap::new();
        channels.insert(channel.id, channel);
        Arc::new(Self { channels })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ChannelDirectory for StaticChannels {
    async fn channel(&self, channel_id: i64) -> RelayResult<Channel> {
        self.channels
            .get(&channel_id)
            .cloned()
            .ok_or_else(|| RelayError::ChannelLookup {
                channel_id,
                reason: "channel not found".to_string(),
            })
    }
}

pub fn volc_channel(base_url: &str) -> Channel {
    Channel {
        id: CHANNEL_ID,
        channel_type: TaskPlatform::VOLC_CHANNEL_TYPE,
        base_url: Some(base_url.to_string()),
        key: API_KEY.to_string(),
    }
}

/// completion 2.0, model 1.0, group 1.0 for [`MODEL`]; everything else neutral.
pub fn rates() -> Arc<ConfiguredRates> {
    Arc::new(ConfiguredRates::new(
        HashMap::from([(MODEL.to_string(), 1.0)]),
        HashMap::from([(MODEL.to_string(), 2.0)]),
        HashMap::from([("default".to_string(), 1.0)]),
    ))
}

pub fn settlement(ledger: Arc<RecordingLedger>) -> SettlementEngine {
    SettlementEngine::new(ledger, rates()).with_default_model(DEFAULT_MODEL)
}

pub fn registry() -> AdaptorRegistry {
    let mut registry = AdaptorRegistry::new();
    registry.register(
        TaskPlatform::VolcVideo,
        Arc::new(VolcVideoAdaptor::new(Duration::from_secs(5)).unwrap()),
    );
    registry
}

pub fn pending_task(task_id: &str, quota: i64) -> Task {
    let mut task = Task::new(task_id, TaskPlatform::VolcVideo);
    task.status = TaskStatus::Submitted;
    task.progress = "10%".to_string();
    task.model_name = MODEL.to_string();
    task.user_id = USER_ID;
    task.channel_id = CHANNEL_ID;
    task.token_id = 3;
    task.token_name = "default-token".to_string();
    task.group = "default".to_string();
    task.quota = quota;
    task.submit_time = 1_700_000_000;
    task
}

pub struct Harness {
    pub store: Arc<MemoryTaskStore>,
    pub ledger: Arc<RecordingLedger>,
    pub reconciler: Reconciler,
}

pub fn harness(channels: Arc<StaticChannels>) -> Harness {
    let store = Arc::new(MemoryTaskStore::new());
    let ledger = RecordingLedger::new();
    let reconciler = Reconciler::new(
        store.clone(),
        channels,
        registry(),
        settlement(ledger.clone()),
    );
    Harness {
        store,
        ledger,
        reconciler,
    }
}
