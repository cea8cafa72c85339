//! One user's working set: tasks, reference data, preferences and the
//! completion workflow behind a single owner. UI handlers call the intent
//! methods here and re-render from [`Session::views`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::completion::{CompletionWorkflow, GRACE_PERIOD, Toggle, ToggleError};
use crate::day::DayBoundary;
use crate::effects::{Feedback, Origin};
use crate::gateway::{Gateway, StoreError};
use crate::prefs::{PreferenceSync, PrefsLoad, SettingKey};
use crate::record::{Priority, Project, Settings, Task};
use crate::reference::ReferenceCache;
use crate::store::{EditOutcome, TaskStore};
use crate::views::TaskViews;

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub boundary: DayBoundary,
    pub grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            boundary: DayBoundary::default(),
            grace: GRACE_PERIOD,
        }
    }
}

#[derive(Debug)]
pub struct Session<G, F> {
    user_id: Uuid,
    boundary: DayBoundary,
    store: TaskStore<G>,
    refs: ReferenceCache<G>,
    prefs: PreferenceSync<G>,
    workflow: CompletionWorkflow,
    feedback: F,
}

impl<G: Gateway, F: Feedback> Session<G, F> {
    /// Loads preferences, reference data and tasks. Each load failure is
    /// logged and leaves that part empty (or at defaults); the session
    /// opens regardless.
    #[instrument(skip(gateway, options, feedback))]
    pub async fn open(
        gateway: Arc<G>,
        user_id: Uuid,
        options: SessionOptions,
        feedback: F,
    ) -> Self {
        let mut session = Self {
            user_id,
            boundary: options.boundary,
            store: TaskStore::new(Arc::clone(&gateway), user_id),
            refs: ReferenceCache::new(Arc::clone(&gateway), user_id),
            prefs: PreferenceSync::new(gateway, user_id),
            workflow: CompletionWorkflow::new(options.grace),
            feedback,
        };

        if let PrefsLoad::Degraded(err) = session.prefs.load().await {
            warn!(error = %err, "running with default preferences");
        }
        let _ = session.refs.load().await;
        let _ = session.store.load().await;
        info!(
            tasks = session.store.tasks().len(),
            projects = session.refs.projects().len(),
            priorities = session.refs.priorities().len(),
            "session opened"
        );
        session
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn boundary(&self) -> &DayBoundary {
        &self.boundary
    }

    pub fn tasks(&self) -> &[Task] {
        self.store.tasks()
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.store.get(id)
    }

    pub fn projects(&self) -> &[Project] {
        self.refs.projects()
    }

    pub fn priorities(&self) -> &[Priority] {
        self.refs.priorities()
    }

    pub fn project_by_name(&self, name: &str) -> Option<&Project> {
        self.refs.project_by_name(name)
    }

    pub fn priority_by_name(&self, name: &str) -> Option<&Priority> {
        self.refs.priority_by_name(name)
    }

    pub fn settings(&self) -> &Settings {
        self.prefs.settings()
    }

    pub fn is_pending(&self, id: Uuid) -> bool {
        self.workflow.is_pending(id)
    }

    pub fn pending_ids(&self) -> HashSet<Uuid> {
        self.workflow.pending_ids()
    }

    /// Wakes when the pending set changes, so views should be re-derived.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.workflow.subscribe()
    }

    pub fn views(&self) -> TaskViews {
        self.views_at(Utc::now())
    }

    /// Derives all views against one `now`.
    pub fn views_at(&self, now: DateTime<Utc>) -> TaskViews {
        TaskViews::derive(
            self.store.tasks(),
            &self.workflow.pending_ids(),
            &self.boundary.classifier(now),
            self.prefs.settings().sort_by_priority,
        )
    }

    pub async fn reload(&mut self) -> Result<(), StoreError> {
        self.store.load().await
    }

    #[instrument(skip(self, text))]
    pub async fn add_task(
        &mut self,
        text: &str,
        project_id: Option<Uuid>,
        priority_id: Option<Uuid>,
    ) -> Result<Option<Task>, StoreError> {
        let added = self
            .store
            .add_task(text, project_id, priority_id, &self.refs)
            .await;
        match &added {
            Ok(Some(_)) => {
                if let Some(pid) = project_id {
                    let _ = self.refs.touch_project_usage(pid).await;
                }
            }
            Ok(None) => {}
            Err(_) => self.feedback.alert("Failed to add task. Please try again."),
        }
        added
    }

    /// Creates the named project on the fly and files the new task under it.
    #[instrument(skip(self, text))]
    pub async fn add_task_with_new_project(
        &mut self,
        text: &str,
        project_name: &str,
        priority_id: Option<Uuid>,
    ) -> Result<Option<Task>, StoreError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let project = match self.refs.create_project(project_name).await {
            Ok(project) => project,
            Err(err) => {
                self.feedback.alert("Failed to create project. Please try again.");
                return Err(err);
            }
        };
        self.add_task(text, project.map(|p| p.id), priority_id).await
    }

    pub async fn set_text(&mut self, id: Uuid, text: &str) -> EditOutcome {
        self.store.set_text(id, text).await
    }

    pub async fn set_project(&mut self, id: Uuid, project_id: Option<Uuid>) -> EditOutcome {
        self.store.set_project(id, project_id, &mut self.refs).await
    }

    pub async fn set_priority(&mut self, id: Uuid, priority_id: Option<Uuid>) -> EditOutcome {
        self.store.set_priority(id, priority_id, &self.refs).await
    }

    /// Deletes a task the user has confirmed deleting. Returns `Ok(false)`
    /// without contacting the store when `confirmed` is false.
    #[instrument(skip(self))]
    pub async fn delete_task(&mut self, id: Uuid, confirmed: bool) -> Result<bool, StoreError> {
        if !confirmed {
            return Ok(false);
        }
        match self.store.delete_task(id).await {
            Ok(()) => Ok(true),
            Err(err) => {
                self.feedback
                    .alert("Failed to delete task. Please try again.");
                Err(err)
            }
        }
    }

    pub async fn toggle_task(
        &mut self,
        id: Uuid,
        origin: Option<Origin>,
    ) -> Result<Toggle, ToggleError> {
        let result = self
            .workflow
            .toggle(&mut self.store, id, origin, self.prefs.settings(), &self.feedback)
            .await;
        if let Err(ToggleError::Store(_)) = &result {
            self.feedback
                .alert("Failed to update task. Please try again.");
        }
        result
    }

    pub async fn set_preference(&mut self, key: SettingKey, value: bool) -> Result<(), StoreError> {
        self.prefs.set(key, value).await
    }

    pub async fn create_project(&mut self, name: &str) -> Result<Option<Project>, StoreError> {
        self.refs.create_project(name).await
    }

    pub async fn rename_project(
        &mut self,
        id: Uuid,
        name: &str,
    ) -> Result<Option<Project>, StoreError> {
        let renamed = self.refs.rename_project(id, name).await?;
        if let Some(project) = &renamed {
            self.store.restyle_project(project);
        }
        Ok(renamed)
    }

    pub async fn recolor_project(
        &mut self,
        id: Uuid,
        color: &str,
    ) -> Result<Option<Project>, StoreError> {
        let recolored = self.refs.recolor_project(id, color).await?;
        if let Some(project) = &recolored {
            self.store.restyle_project(project);
        }
        Ok(recolored)
    }

    /// Deletes a project; its tasks stay, unassigned.
    pub async fn delete_project(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.refs.delete_project(id).await?;
        self.store.detach_project(id);
        Ok(())
    }

    /// Cancels grace timers. Call before tearing down the view.
    pub fn shutdown(&mut self) {
        self.workflow.shutdown();
    }
}
