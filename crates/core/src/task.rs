//! Scheduled task data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the scheduler fires a task when it comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Fires when due.
    Active,
    /// Ignored by the ticker; `next_run_at` keeps advancing on resume.
    Paused,
}

impl TaskStatus {
    /// Lowercase wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }
}

/// A cron-scheduled workflow trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique task id.
    pub id: String,
    /// Human-readable task name.
    pub name: String,
    /// Five-field cron expression, validated at creation.
    pub cron_expr: String,
    /// Workflow triggered on each firing.
    pub workflow_id: String,
    /// Execution input passed to each triggered run.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Whether the task currently fires.
    pub status: TaskStatus,
    /// Wall-clock time of the most recent actual firing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next scheduled firing. Advanced from the previous scheduled
    /// time, not from the firing time, so schedules do not drift.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn task_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Active).unwrap(),
            "\"active\""
        );
        assert_eq!(TaskStatus::Paused.as_str(), "paused");
    }

    #[test]
    fn task_roundtrips_through_json() {
        let task = ScheduledTask {
            id: "t-1".to_string(),
            name: "nightly".to_string(),
            cron_expr: "0 3 * * *".to_string(),
            workflow_id: "wf-1".to_string(),
            parameters: json!({ "mode": "full" }),
            status: TaskStatus::Active,
            last_run_at: None,
            next_run_at: Some(Utc::now()),
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: ScheduledTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
