use chrono::TimeDelta;

use crate::job::JobId;

/// Retries stop permanently once this many trials have been attempted.
pub const MAX_DEFERRED_TRIALS: u32 = 100;

/// Short fixed backoff between trials; the visibility race it papers over
/// (START arriving before the job row is committed) resolves in well under a
/// second in practice.
pub fn retry_delay() -> TimeDelta {
    TimeDelta::milliseconds(1100)
}

/// Stand-in scheduled on the system heap when a START command references a
/// job row that is not queryable yet (transaction visibility race). Each
/// wakeup attempts to resolve the real row; after `MAX_DEFERRED_TRIALS`
/// failed attempts the placeholder is dropped for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredJob {
    pub job_id: JobId,
    pub trials: u32,
}

impl DeferredJob {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id, trials: 0 }
    }

    /// Account for one failed resolution attempt. Returns the placeholder to
    /// re-schedule, or `None` once the trial ceiling is reached.
    pub fn retry(mut self) -> Option<Self> {
        self.trials += 1;
        if self.trials >= MAX_DEFERRED_TRIALS {
            None
        } else {
            Some(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retried_exactly_one_hundred_times() {
        let mut deferred = Some(DeferredJob::new(12));
        let mut attempts = 0;
        while let Some(d) = deferred.take() {
            attempts += 1;
            deferred = d.retry();
        }
        assert_eq!(attempts, MAX_DEFERRED_TRIALS);
    }

    #[test]
    fn trials_count_up_from_one() {
        let deferred = DeferredJob::new(12).retry().unwrap();
        assert_eq!(deferred.trials, 1);
    }
}
