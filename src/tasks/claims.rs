use std::sync::Arc;

use dashmap::DashSet;

/// key: task-claims -> per-task lease held for the duration of one poll
#[derive(Debug, Clone, Default)]
pub struct TaskClaims {
    held: Arc<DashSet<String>>,
}

impl TaskClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another pass already holds the task.
    pub fn try_claim(&self, task_id: &str) -> Option<TaskClaim> {
        if self.held.insert(task_id.to_string()) {
            Some(TaskClaim {
                held: Arc::clone(&self.held),
                task_id: task_id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_claimed(&self, task_id: &str) -> bool {
        self.held.contains(task_id)
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct TaskClaim {
    held: Arc<DashSet<String>>,
    task_id: String,
}

impl Drop for TaskClaim {
    fn drop(&mut self) {
        self.held.remove(&self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let claims = TaskClaims::new();
        let first = claims.try_claim("cgt-1").expect("first claim");
        assert!(claims.try_claim("cgt-1").is_none());
        assert!(claims.try_claim("cgt-2").is_some());

        drop(first);
        assert!(!claims.is_claimed("cgt-1"));
        assert!(claims.try_claim("cgt-1").is_some());
    }
}
