use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Immediate,
    Todo,
    Scheduled,
    Recurring,
    Triggered,
    Delegated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Blocked,
    Waiting,
    Completed,
    Cancelled,
    Archived,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Archived)
    }
}

/// Urgency, importance, and impact, each in `[0, 1]`. `calculate()` combines
/// them into a `[0, 100]` base score; due-date urgency is folded in
/// separately by [`Task::priority_score`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskPriority {
    pub urgency: f32,
    pub importance: f32,
    pub impact: f32,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self { urgency: 0.5, importance: 0.5, impact: 0.5 }
    }
}

impl TaskPriority {
    pub fn new(urgency: f32, importance: f32, impact: f32) -> Self {
        Self { urgency, importance, impact }
    }

    pub fn calculate(&self) -> f32 {
        self.urgency * 0.4 + self.importance * 0.4 + self.impact * 0.2
    }

    pub fn from_str_band(band: &str) -> Self {
        let (urgency, importance, impact) = match band.to_lowercase().as_str() {
            "high" => (0.8, 0.8, 0.6),
            "medium" => (0.5, 0.5, 0.5),
            "low" => (0.2, 0.3, 0.2),
            _ => (0.5, 0.5, 0.5),
        };
        Self { urgency, importance, impact }
    }

    pub fn band(score: f32) -> &'static str {
        if score >= 70.0 {
            "high"
        } else if score >= 40.0 {
            "medium"
        } else {
            "low"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee: String,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub waiting_for: Option<String>,
    pub execution_result: String,
    pub source_conversation: Option<String>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

impl Task {
    pub fn new(title: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            task_type,
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            assignee: "self".to_string(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            due_date: None,
            scheduled_at: None,
            created_at: Utc::now(),
            completed_at: None,
            waiting_for: None,
            execution_result: String::new(),
            source_conversation: None,
            metadata: std::collections::HashMap::new(),
        }
    }

    pub fn is_overdue(&self) -> bool {
        match self.due_date {
            Some(due) => !self.status.is_terminal() && due < Utc::now(),
            None => false,
        }
    }

    /// Priority score in `[0, 100]`: `urgency*0.4 + importance*0.4 +
    /// impact*0.2`, plus 2 points per hour overdue capped at a 30-point
    /// boost, clamped to 100.
    pub fn priority_score(&self) -> f32 {
        let mut score = self.priority.calculate();
        if let Some(due) = self.due_date {
            let hours_overdue = (Utc::now() - due).num_minutes() as f32 / 60.0;
            if hours_overdue > 0.0 {
                score += (hours_overdue * 2.0).min(30.0);
            }
        }
        score.min(100.0)
    }
}
