pub mod claims;
pub mod context;
pub mod envelope;
pub mod models;
pub mod reconcile;
pub mod scheduler;
pub mod store;
pub mod submit;
pub mod summary;

pub use claims::{TaskClaim, TaskClaims};
pub use context::RunContext;
pub use envelope::GatewayEnvelope;
pub use models::{Task, TaskInfo, TaskPlatform, TaskStatus};
pub use reconcile::{decode_poll_response, ChannelBatch, PollResult, Reconciler, TaskOutcome};
pub use scheduler::{group_by_channel, process_tick, spawn as spawn_task_poller};
pub use store::{MemoryTaskStore, PgTaskStore, TaskStore};
pub use submit::{SubmissionOwner, TaskSubmitter};
pub use summary::ReconcileSummary;
