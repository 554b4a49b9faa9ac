//! Task records and their lifecycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Scheduling priority. Higher runs first; FIFO within a level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    /// Numeric value (LOW=0, NORMAL=50, HIGH=100, CRITICAL=200).
    pub fn value(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 50,
            Self::High => 100,
            Self::Critical => 200,
        }
    }
}

/// Task category; selects the executing pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    #[default]
    Core,
    Plugin,
    Ui,
    Io,
    Background,
    User,
}

/// Status along the lawful task lifecycle.
///
/// ```text
/// pending ──► running ──► { completed | failed | cancelled }
/// pending ──► cancelled
/// ```
///
/// Terminal statuses never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → to` is a lawful transition.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

/// Progress snapshot reported by a running task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskProgress {
    /// Completion fraction in `[0.0, 1.0]`.
    pub fraction: f64,
    /// Optional human-readable status line.
    pub message: Option<String>,
}

/// Metadata describing a task to submit.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Display name.
    pub name: String,
    /// Pool-selecting category.
    pub category: TaskCategory,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Who submitted the task.
    pub submitter: String,
    /// Owning plugin, if submitted on behalf of one.
    pub plugin_id: Option<String>,
    /// Wall-clock timeout measured from submission.
    pub timeout: Option<Duration>,
    /// Whether `cancel` is honoured.
    pub cancellable: bool,
}

impl TaskSpec {
    /// A spec with defaults: core category, normal priority, cancellable.
    pub fn new(name: impl Into<String>, submitter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: TaskCategory::default(),
            priority: TaskPriority::default(),
            submitter: submitter.into(),
            plugin_id: None,
            timeout: None,
            cancellable: true,
        }
    }

    /// Sets the category.
    pub fn category(mut self, category: TaskCategory) -> Self {
        self.category = category;
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the owning plugin.
    pub fn plugin(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks the task non-cancellable.
    pub fn not_cancellable(mut self) -> Self {
        self.cancellable = false;
        self
    }
}

/// The full record of a scheduled task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Unique task id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Pool-selecting category.
    pub category: TaskCategory,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Who submitted the task.
    pub submitter: String,
    /// Owning plugin, if any.
    pub plugin_id: Option<String>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Latest reported progress.
    pub progress: TaskProgress,
    /// Whether `cancel` is honoured.
    pub cancellable: bool,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When the task started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Result payload on completion.
    pub result: Option<Value>,
    /// Error message on failure or cancellation.
    pub error: Option<String>,
}

impl TaskRecord {
    pub(crate) fn from_spec(spec: &TaskSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: spec.name.clone(),
            category: spec.category,
            priority: spec.priority,
            submitter: spec.submitter.clone(),
            plugin_id: spec.plugin_id.clone(),
            status: TaskStatus::Pending,
            progress: TaskProgress::default(),
            cancellable: spec.cancellable,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

/// Filter for [`get_tasks`](crate::task::TaskScheduler::get_tasks).
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Only tasks with this status.
    pub status: Option<TaskStatus>,
    /// Only tasks in this category.
    pub category: Option<TaskCategory>,
    /// Only tasks owned by this plugin.
    pub plugin_id: Option<String>,
    /// Maximum number of records; `None` uses the scheduler default.
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub(crate) fn matches(&self, record: &TaskRecord) -> bool {
        if let Some(status) = self.status
            && record.status != status
        {
            return false;
        }
        if let Some(category) = self.category
            && record.category != category
        {
            return false;
        }
        if let Some(plugin) = &self.plugin_id
            && record.plugin_id.as_deref() != Some(plugin.as_str())
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_and_values() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert_eq!(TaskPriority::Low.value(), 0);
        assert_eq!(TaskPriority::Critical.value(), 200);
    }

    #[test]
    fn test_status_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }
}
