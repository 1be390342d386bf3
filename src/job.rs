use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Jobs are keyed by their primary key in the backing store.
pub type JobId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Waiting,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A persisted job record.
///
/// A job without an owner is a *system* job: it runs automatically on a
/// recurring schedule driven by its (pseudo-)periodic job type. A job with an
/// owner is a *user* job: it runs once, queued until a concurrency slot is
/// free. The store row is always the source of truth; the scheduler only
/// caches rows in memory between explicit reloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Owning user. `None` designates a system job.
    pub owner: Option<String>,
    pub job_type_id: String,
    pub enabled: bool,
    /// Period between runs, in seconds. Meaningful only for periodic types.
    pub periodicity_secs: Option<u64>,
    /// Anchor for periodicity calculations ("every day at 3 AM" stays at
    /// 3 AM because wakeups are derived from this instant, not from "now").
    pub reference_run: DateTime<Utc>,
    pub status: JobStatus,
    /// Opaque job-type specific payload (e.g. the command of a shell job).
    #[serde(default)]
    pub data: Option<Value>,
}

impl Job {
    pub fn new_user(id: JobId, owner: impl Into<String>, job_type_id: impl Into<String>) -> Self {
        Self {
            id,
            owner: Some(owner.into()),
            job_type_id: job_type_id.into(),
            enabled: true,
            periodicity_secs: None,
            reference_run: Utc::now(),
            status: JobStatus::Waiting,
            data: None,
        }
    }

    pub fn new_system(
        id: JobId,
        job_type_id: impl Into<String>,
        periodicity_secs: u64,
        reference_run: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner: None,
            job_type_id: job_type_id.into(),
            enabled: true,
            periodicity_secs: Some(periodicity_secs),
            reference_run,
            status: JobStatus::Waiting,
            data: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.owner.is_none()
    }

    /// Configured period as a time delta, if any.
    pub fn period(&self) -> Option<TimeDelta> {
        self.periodicity_secs
            .map(|secs| TimeDelta::seconds(secs as i64))
    }

    /// Apply the changed-field values carried by a REFRESH command to this
    /// in-memory copy. Unknown fields and unparseable values are logged and
    /// skipped; a REFRESH is a hint, not a transaction.
    pub fn apply_refresh(&mut self, fields: &serde_json::Map<String, Value>) {
        for (name, value) in fields {
            match name.as_str() {
                "enabled" => match value.as_bool() {
                    Some(v) => self.enabled = v,
                    None => tracing::warn!(job_id = self.id, ?value, "Bad 'enabled' value"),
                },
                "periodicity_secs" => match value {
                    Value::Null => self.periodicity_secs = None,
                    v => match v.as_u64() {
                        Some(secs) => self.periodicity_secs = Some(secs),
                        None => {
                            tracing::warn!(job_id = self.id, ?value, "Bad 'periodicity_secs'")
                        }
                    },
                },
                "reference_run" => {
                    match value.as_str().and_then(|s| {
                        DateTime::parse_from_rfc3339(s)
                            .ok()
                            .map(|dt| dt.with_timezone(&Utc))
                    }) {
                        Some(ts) => self.reference_run = ts,
                        None => tracing::warn!(job_id = self.id, ?value, "Bad 'reference_run'"),
                    }
                }
                "data" => self.data = Some(value.clone()),
                other => {
                    tracing::debug!(job_id = self.id, field = other, "Ignoring refreshed field")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_job_defaults() {
        let job = Job::new_user(1, "kirika", "shell");
        assert!(!job.is_system());
        assert_eq!(job.status, JobStatus::Waiting);
        assert!(job.period().is_none());
    }

    #[test]
    fn system_job_period() {
        let job = Job::new_system(2, "cleaner", 3600, Utc::now());
        assert!(job.is_system());
        assert_eq!(job.period(), Some(TimeDelta::hours(1)));
    }

    #[test]
    fn apply_refresh_known_fields() {
        let mut job = Job::new_system(3, "cleaner", 3600, Utc::now());
        let fields = json!({
            "enabled": false,
            "periodicity_secs": 120,
            "reference_run": "2024-05-01T03:00:00Z",
        });
        job.apply_refresh(fields.as_object().unwrap());
        assert!(!job.enabled);
        assert_eq!(job.periodicity_secs, Some(120));
        assert_eq!(job.reference_run.to_rfc3339(), "2024-05-01T03:00:00+00:00");
    }

    #[test]
    fn apply_refresh_ignores_unknown_and_bad_values() {
        let mut job = Job::new_system(4, "cleaner", 3600, Utc::now());
        let fields = json!({
            "enabled": "yes",
            "no_such_field": 1,
        });
        job.apply_refresh(fields.as_object().unwrap());
        assert!(job.enabled);
    }
}
