use serde::Serialize;

use super::reconcile::TaskOutcome;

/// key: reconcile-summary -> per-run outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub polled: u64,
    pub updated: u64,
    pub settled: u64,
    pub refunded: u64,
    pub deferred: u64,
    pub skipped: u64,
    pub failed: u64,
    pub channel_failures: u64,
}

impl ReconcileSummary {
    pub fn record(&mut self, outcome: &TaskOutcome) {
        self.polled += 1;
        match outcome {
            TaskOutcome::Updated(_) => self.updated += 1,
            TaskOutcome::Settled { .. } => {
                self.updated += 1;
                self.settled += 1;
            }
            TaskOutcome::Refunded { .. } => {
                self.updated += 1;
                self.refunded += 1;
            }
            TaskOutcome::Deferred => self.deferred += 1,
        }
    }

    pub fn record_failure(&mut self) {
        self.polled += 1;
        self.failed += 1;
    }

    pub fn absorb(&mut self, other: ReconcileSummary) {
        self.polled += other.polled;
        self.updated += other.updated;
        self.settled += other.settled;
        self.refunded += other.refunded;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.channel_failures += other.channel_failures;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::models::TaskStatus;

    #[test]
    fn summary_counts_outcomes() {
        let mut summary = ReconcileSummary::default();
        summary.record(&TaskOutcome::Updated(TaskStatus::Queued));
        summary.record(&TaskOutcome::Settled { delta: 30 });
        summary.record(&TaskOutcome::Refunded { quota: 100 });
        summary.record(&TaskOutcome::Deferred);
        summary.record_failure();

        assert_eq!(summary.polled, 5);
        assert_eq!(summary.updated, 3);
        assert_eq!(summary.settled, 1);
        assert_eq!(summary.refunded, 1);
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.failed, 1);

        let mut total = ReconcileSummary {
            skipped: 2,
            ..ReconcileSummary::default()
        };
        total.absorb(summary);
        assert_eq!(total.polled, 5);
        assert_eq!(total.skipped, 2);
    }
}
