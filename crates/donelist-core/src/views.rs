use std::cmp::Ordering;
use std::collections::HashSet;

use uuid::Uuid;

use crate::day::Classifier;
use crate::record::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Active,
    Today,
    History,
}

/// The three lists shown to the user, always recomputed from the current
/// task list and pending set rather than patched incrementally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskViews {
    pub active: Vec<Task>,
    pub today: Vec<Task>,
    pub history: Vec<Task>,
}

impl TaskViews {
    pub fn derive(
        tasks: &[Task],
        pending: &HashSet<Uuid>,
        classifier: &Classifier,
        sort_by_priority: bool,
    ) -> Self {
        let mut views = TaskViews::default();
        for task in tasks {
            views.bucket_mut(bucket_for(task, pending, classifier)).push(task.clone());
        }
        if sort_by_priority {
            sort_by_priority_level(&mut views.active);
        }
        views
    }

    pub fn locate(&self, id: Uuid) -> Option<Bucket> {
        [
            (Bucket::Active, &self.active),
            (Bucket::Today, &self.today),
            (Bucket::History, &self.history),
        ]
        .into_iter()
        .find(|(_, tasks)| tasks.iter().any(|t| t.id == id))
        .map(|(bucket, _)| bucket)
    }

    /// Keeps only tasks assigned to one of `projects`. An empty selection
    /// means no filtering.
    pub fn retain_projects(&mut self, projects: &HashSet<Uuid>) {
        if projects.is_empty() {
            return;
        }
        let keep = |task: &Task| task.project_id.is_some_and(|id| projects.contains(&id));
        self.active.retain(keep);
        self.today.retain(keep);
        self.history.retain(keep);
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Vec<Task> {
        match bucket {
            Bucket::Active => &mut self.active,
            Bucket::Today => &mut self.today,
            Bucket::History => &mut self.history,
        }
    }
}

pub fn bucket_for(task: &Task, pending: &HashSet<Uuid>, classifier: &Classifier) -> Bucket {
    if !task.completed || pending.contains(&task.id) {
        return Bucket::Active;
    }
    match task.completed_at {
        Some(ts) if classifier.is_today(ts) => Bucket::Today,
        _ => Bucket::History,
    }
}

/// Stable sort: highest level first, tasks without a priority last.
pub fn sort_by_priority_level(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| match (a.priority_id, b.priority_id) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(_), Some(_)) => b
            .priority_level()
            .unwrap_or(0)
            .cmp(&a.priority_level().unwrap_or(0)),
    });
}
