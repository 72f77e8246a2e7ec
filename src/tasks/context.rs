use tokio::sync::watch;
use uuid::Uuid;

/// key: task-run-context -> explicit per-run state passed through every operation
///
/// Carries the run id used in log fields and the shutdown signal. Cancellation only
/// stops new per-task polls; calls already in flight run to completion or timeout.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            shutdown: None,
        }
    }

    pub fn with_shutdown(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            shutdown: Some(shutdown),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
