use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display copy of a task's project. Not authoritative; refreshed whenever
/// the reference or the project itself changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectBadge {
    pub name: String,
    pub color: String,
}

/// Display copy of a task's priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityBadge {
    pub name: String,
    pub color: String,
    pub level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,

    #[serde(rename = "task")]
    pub text: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub project_id: Option<Uuid>,

    #[serde(default)]
    pub priority_id: Option<Uuid>,

    pub user_id: Uuid,

    pub created_at: DateTime<Utc>,

    #[serde(skip)]
    pub project: Option<ProjectBadge>,

    #[serde(skip)]
    pub priority: Option<PriorityBadge>,
}

impl Task {
    /// `completed` and `completed_at` must agree.
    pub fn is_consistent(&self) -> bool {
        self.completed == self.completed_at.is_some()
    }

    pub fn priority_level(&self) -> Option<i32> {
        self.priority.as_ref().map(|badge| badge.level)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub task: String,
    pub completed: bool,
    pub project_id: Option<Uuid>,
    pub priority_id: Option<Uuid>,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub color: String,

    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,

    pub user_id: Uuid,
}

impl Project {
    pub fn badge(&self) -> ProjectBadge {
        ProjectBadge {
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProject {
    pub name: String,
    pub color: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Priority {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub level: i32,
}

impl Priority {
    pub fn badge(&self) -> PriorityBadge {
        PriorityBadge {
            name: self.name.clone(),
            color: self.color.clone(),
            level: self.level,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub user_id: Uuid,
    pub confetti_enabled: bool,
    pub sound_enabled: bool,
    pub show_completed: bool,
    pub show_history: bool,
    pub sort_by_priority: bool,
}

impl Settings {
    pub fn defaults(user_id: Uuid) -> Self {
        Self {
            user_id,
            confetti_enabled: true,
            sound_enabled: true,
            show_completed: true,
            show_history: true,
            sort_by_priority: false,
        }
    }
}
