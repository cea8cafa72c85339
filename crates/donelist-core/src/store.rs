//! The authoritative in-memory task list.
//!
//! Writes follow one of two strategies:
//!
//! * optimistic-then-reconcile (`set_text`, `set_project`, `set_priority`):
//!   the local copy changes first; if the remote write fails the whole list
//!   is reloaded from the store.
//! * confirm-then-apply (`add_task`, `delete_task`, `commit_completion`):
//!   nothing changes locally until the remote write succeeds.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::gateway::{
    Collection, Gateway, Key, Order, Query, Row, StoreError, decode, decode_all, encode, id_value,
    patch, timestamp_value,
};
use crate::record::{NewTask, Priority, Project, Task};
use crate::reference::ReferenceCache;

/// Result of an optimistic edit.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    /// Rejected locally; the store was never contacted.
    Skipped,
    Saved,
    /// The remote write failed and the list was reloaded.
    Reconciled(StoreError),
}

#[derive(Debug)]
pub struct TaskStore<G> {
    gateway: Arc<G>,
    user_id: Uuid,
    tasks: Vec<Task>,
}

impl<G: Gateway> TaskStore<G> {
    pub fn new(gateway: Arc<G>, user_id: Uuid) -> Self {
        Self {
            gateway,
            user_id,
            tasks: vec![],
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Replaces the list with the user's tasks, newest first, with project
    /// and priority display fields joined in. On failure the previous list
    /// is kept.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub async fn load(&mut self) -> Result<(), StoreError> {
        match self.fetch().await {
            Ok(tasks) => {
                info!(count = tasks.len(), "loaded tasks");
                self.tasks = tasks;
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to fetch tasks; keeping previous state");
                Err(err)
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<Task>, StoreError> {
        let user = self.user_id.to_string();
        let task_rows = self
            .gateway
            .list(
                Collection::Tasks,
                &Query::all()
                    .eq("user_id", user.clone())
                    .order_by(Order::desc("created_at")),
            )
            .await?;
        let project_rows = self
            .gateway
            .list(Collection::Projects, &Query::all().eq("user_id", user))
            .await?;
        let priority_rows = self
            .gateway
            .list(Collection::Priorities, &Query::all())
            .await?;

        let projects: Vec<Project> = decode_all(project_rows)?;
        let priorities: Vec<Priority> = decode_all(priority_rows)?;
        let mut tasks: Vec<Task> = decode_all(task_rows)?;
        for task in &mut tasks {
            denormalize(task, &projects, &priorities);
        }
        Ok(tasks)
    }

    /// Renames a task. Blank or unchanged text is ignored.
    #[instrument(skip(self, text))]
    pub async fn set_text(&mut self, id: Uuid, text: &str) -> EditOutcome {
        let text = text.trim();
        if text.is_empty() {
            debug!(task = %id, "ignoring blank task text");
            return EditOutcome::Skipped;
        }
        if self.get(id).is_some_and(|t| t.text == text) {
            debug!(task = %id, "task text unchanged");
            return EditOutcome::Skipped;
        }

        let owned = text.to_string();
        self.optimistic(
            id,
            patch([("task", Value::String(owned.clone()))]),
            move |task| task.text = owned,
        )
        .await
    }

    /// Assigns a project (or clears it). A successful assignment to a
    /// project also marks that project as recently used.
    #[instrument(skip(self, refs))]
    pub async fn set_project(
        &mut self,
        id: Uuid,
        project_id: Option<Uuid>,
        refs: &mut ReferenceCache<G>,
    ) -> EditOutcome {
        let badge = project_id
            .and_then(|pid| refs.project(pid))
            .map(Project::badge);
        let outcome = self
            .optimistic(
                id,
                patch([("project_id", id_value(project_id))]),
                move |task| {
                    task.project_id = project_id;
                    task.project = badge;
                },
            )
            .await;

        if outcome == EditOutcome::Saved
            && let Some(pid) = project_id
        {
            // Failures are logged by the cache; the assignment itself stands.
            let _ = refs.touch_project_usage(pid).await;
        }
        outcome
    }

    #[instrument(skip(self, refs))]
    pub async fn set_priority(
        &mut self,
        id: Uuid,
        priority_id: Option<Uuid>,
        refs: &ReferenceCache<G>,
    ) -> EditOutcome {
        let badge = priority_id
            .and_then(|pid| refs.priority(pid))
            .map(Priority::badge);
        self.optimistic(
            id,
            patch([("priority_id", id_value(priority_id))]),
            move |task| {
                task.priority_id = priority_id;
                task.priority = badge;
            },
        )
        .await
    }

    async fn optimistic<F>(&mut self, id: Uuid, fields: Row, apply: F) -> EditOutcome
    where
        F: FnOnce(&mut Task),
    {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            warn!(task = %id, "edit for unknown task ignored");
            return EditOutcome::Skipped;
        };
        apply(task);

        match self
            .gateway
            .update(Collection::Tasks, &Key::id(id), fields)
            .await
        {
            Ok(()) => {
                debug!(task = %id, "edit saved");
                EditOutcome::Saved
            }
            Err(err) => {
                error!(task = %id, error = %err, "edit failed; reloading tasks");
                // A failed reload is already logged and keeps the list as is.
                let _ = self.load().await;
                EditOutcome::Reconciled(err)
            }
        }
    }

    /// Creates a task. Blank text is ignored (`Ok(None)`); on success the
    /// stored record is appended to the list.
    #[instrument(skip(self, text, refs))]
    pub async fn add_task(
        &mut self,
        text: &str,
        project_id: Option<Uuid>,
        priority_id: Option<Uuid>,
        refs: &ReferenceCache<G>,
    ) -> Result<Option<Task>, StoreError> {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring blank task");
            return Ok(None);
        }
        let row = encode(&NewTask {
            task: text.to_string(),
            completed: false,
            project_id,
            priority_id,
            user_id: self.user_id,
        })?;

        let stored = match self.gateway.insert(Collection::Tasks, row).await {
            Ok(row) => row,
            Err(err) => {
                error!(error = %err, "failed to add task");
                return Err(err);
            }
        };
        let mut task: Task = decode(stored)?;
        denormalize(&mut task, refs.projects(), refs.priorities());
        info!(task = %task.id, "added task");
        self.tasks.push(task.clone());
        Ok(Some(task))
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&mut self, id: Uuid) -> Result<(), StoreError> {
        if let Err(err) = self.gateway.delete(Collection::Tasks, &Key::id(id)).await {
            error!(task = %id, error = %err, "failed to delete task");
            return Err(err);
        }
        self.tasks.retain(|t| t.id != id);
        info!(task = %id, "deleted task");
        Ok(())
    }

    /// Writes the completion state and, once the store accepts it, mirrors
    /// it locally. `completed_at = None` means "not completed".
    #[instrument(skip(self))]
    pub async fn commit_completion(
        &mut self,
        id: Uuid,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let completed_at = completed_at.map(|ts| ts.trunc_subsecs(6));
        let fields = patch([
            ("completed", Value::Bool(completed_at.is_some())),
            ("completed_at", timestamp_value(completed_at)),
        ]);
        if let Err(err) = self
            .gateway
            .update(Collection::Tasks, &Key::id(id), fields)
            .await
        {
            error!(task = %id, error = %err, "failed to update completion");
            return Err(err);
        }

        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
            task.completed = completed_at.is_some();
            task.completed_at = completed_at;
        }
        Ok(())
    }

    /// Clears references to a deleted project.
    pub fn detach_project(&mut self, project_id: Uuid) {
        for task in self
            .tasks
            .iter_mut()
            .filter(|t| t.project_id == Some(project_id))
        {
            task.project_id = None;
            task.project = None;
        }
    }

    /// Refreshes display fields after a project was renamed or recolored.
    pub fn restyle_project(&mut self, project: &Project) {
        for task in self
            .tasks
            .iter_mut()
            .filter(|t| t.project_id == Some(project.id))
        {
            task.project = Some(project.badge());
        }
    }
}

fn denormalize(task: &mut Task, projects: &[Project], priorities: &[Priority]) {
    task.project = task
        .project_id
        .and_then(|id| projects.iter().find(|p| p.id == id))
        .map(Project::badge);
    task.priority = task
        .priority_id
        .and_then(|id| priorities.iter().find(|p| p.id == id))
        .map(Priority::badge);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::gateway::Op;
    use crate::memory::MemoryGateway;

    struct Fixture {
        gateway: Arc<MemoryGateway>,
        user: Uuid,
        high: Uuid,
        low: Uuid,
        home: Uuid,
    }

    fn seed(gateway: &MemoryGateway, collection: Collection, value: Value) -> Uuid {
        let row = gateway
            .seed(collection, encode(&value).expect("encode row"))
            .expect("seed row");
        row["id"]
            .as_str()
            .and_then(|raw| raw.parse().ok())
            .expect("uuid id")
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(MemoryGateway::new());
        let user = Uuid::new_v4();
        let high = seed(
            &gateway,
            Collection::Priorities,
            json!({"name": "High", "color": "#ef4444", "level": 3}),
        );
        let low = seed(
            &gateway,
            Collection::Priorities,
            json!({"name": "Low", "color": "#10b981", "level": 1}),
        );
        let home = seed(
            &gateway,
            Collection::Projects,
            json!({"name": "Home", "color": "#3b82f6", "user_id": user}),
        );
        Fixture {
            gateway,
            user,
            high,
            low,
            home,
        }
    }

    impl Fixture {
        fn task(&self, text: &str, created_at: &str) -> Uuid {
            seed(
                &self.gateway,
                Collection::Tasks,
                json!({"task": text, "user_id": self.user, "created_at": created_at}),
            )
        }

        async fn open(&self) -> (TaskStore<MemoryGateway>, ReferenceCache<MemoryGateway>) {
            let mut refs = ReferenceCache::new(self.gateway.clone(), self.user);
            refs.load().await.expect("load refs");
            let mut store = TaskStore::new(self.gateway.clone(), self.user);
            store.load().await.expect("load tasks");
            (store, refs)
        }
    }

    #[tokio::test]
    async fn load_orders_newest_first_and_joins_display_fields() {
        let fx = fixture();
        fx.task("older", "2026-10-17T08:00:00Z");
        let newer = seed(
            &fx.gateway,
            Collection::Tasks,
            json!({
                "task": "newer",
                "user_id": fx.user,
                "created_at": "2026-10-18T08:00:00Z",
                "project_id": fx.home,
                "priority_id": fx.high,
            }),
        );
        seed(
            &fx.gateway,
            Collection::Tasks,
            json!({"task": "not mine", "user_id": Uuid::new_v4()}),
        );

        let (store, _) = fx.open().await;

        let texts: Vec<_> = store.tasks().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["newer", "older"]);
        let task = store.get(newer).expect("newer task");
        assert_eq!(task.project.as_ref().map(|b| b.name.as_str()), Some("Home"));
        assert_eq!(task.priority_level(), Some(3));
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_tasks() {
        let fx = fixture();
        fx.task("keep me", "2026-10-17T08:00:00Z");
        let (mut store, _) = fx.open().await;
        fx.gateway
            .fail_next(Collection::Tasks, Op::List, StoreError::unavailable("offline"));

        assert!(store.load().await.is_err());
        assert_eq!(store.tasks().len(), 1);
    }

    #[tokio::test]
    async fn blank_or_unchanged_text_never_reaches_store() {
        let fx = fixture();
        let id = fx.task("Buy milk", "2026-10-17T08:00:00Z");
        let (mut store, _) = fx.open().await;
        let before = fx.gateway.calls().len();

        assert_eq!(store.set_text(id, "   ").await, EditOutcome::Skipped);
        assert_eq!(store.set_text(id, "Buy milk").await, EditOutcome::Skipped);
        assert_eq!(store.set_text(id, " Buy milk  ").await, EditOutcome::Skipped);
        assert_eq!(fx.gateway.calls().len(), before);
    }

    #[tokio::test]
    async fn text_edit_is_trimmed_and_saved() {
        let fx = fixture();
        let id = fx.task("Buy milk", "2026-10-17T08:00:00Z");
        let (mut store, _) = fx.open().await;

        assert_eq!(store.set_text(id, "  Buy oat milk ").await, EditOutcome::Saved);
        assert_eq!(store.get(id).map(|t| t.text.as_str()), Some("Buy oat milk"));
        assert_eq!(fx.gateway.rows(Collection::Tasks)[0]["task"], json!("Buy oat milk"));
    }

    #[tokio::test]
    async fn failed_text_edit_reloads_from_store() {
        let fx = fixture();
        let id = fx.task("Buy milk", "2026-10-17T08:00:00Z");
        let (mut store, _) = fx.open().await;
        let loads = fx.gateway.count_calls(Op::List, Collection::Tasks);
        fx.gateway
            .fail_next(Collection::Tasks, Op::Update, StoreError::unavailable("timeout"));

        let outcome = store.set_text(id, "Buy bread").await;

        assert!(matches!(outcome, EditOutcome::Reconciled(_)));
        assert_eq!(fx.gateway.count_calls(Op::List, Collection::Tasks), loads + 1);
        assert_eq!(store.get(id).map(|t| t.text.as_str()), Some("Buy milk"));
    }

    #[tokio::test]
    async fn failed_priority_edit_leaves_consistent_badges() {
        let fx = fixture();
        let id = seed(
            &fx.gateway,
            Collection::Tasks,
            json!({"task": "Taxes", "user_id": fx.user, "priority_id": fx.low}),
        );
        let (mut store, refs) = fx.open().await;
        let loads = fx.gateway.count_calls(Op::List, Collection::Tasks);
        fx.gateway
            .fail_next(Collection::Tasks, Op::Update, StoreError::unavailable("timeout"));

        let outcome = store.set_priority(id, Some(fx.high), &refs).await;

        assert!(matches!(outcome, EditOutcome::Reconciled(_)));
        assert_eq!(fx.gateway.count_calls(Op::List, Collection::Tasks), loads + 1);
        let task = store.get(id).expect("task");
        assert_eq!(task.priority_id, Some(fx.low));
        assert_eq!(task.priority_level(), Some(1));
    }

    #[tokio::test]
    async fn priority_edit_updates_badge_immediately() {
        let fx = fixture();
        let id = fx.task("Taxes", "2026-10-17T08:00:00Z");
        let (mut store, refs) = fx.open().await;

        assert_eq!(store.set_priority(id, Some(fx.high), &refs).await, EditOutcome::Saved);
        assert_eq!(store.get(id).and_then(Task::priority_level), Some(3));
        assert_eq!(store.set_priority(id, None, &refs).await, EditOutcome::Saved);
        assert!(store.get(id).is_some_and(|t| t.priority.is_none()));
    }

    #[tokio::test]
    async fn project_assignment_touches_recency() {
        let fx = fixture();
        let id = fx.task("Paint fence", "2026-10-17T08:00:00Z");
        let (mut store, mut refs) = fx.open().await;

        let outcome = store.set_project(id, Some(fx.home), &mut refs).await;

        assert_eq!(outcome, EditOutcome::Saved);
        assert_eq!(
            store.get(id).and_then(|t| t.project.as_ref()).map(|b| b.name.as_str()),
            Some("Home")
        );
        assert!(refs.project(fx.home).and_then(|p| p.last_used_at).is_some());
        assert_eq!(fx.gateway.count_calls(Op::Update, Collection::Projects), 1);
    }

    #[tokio::test]
    async fn failed_project_assignment_reloads_without_touching() {
        let fx = fixture();
        let id = fx.task("Paint fence", "2026-10-17T08:00:00Z");
        let (mut store, mut refs) = fx.open().await;
        fx.gateway
            .fail_next(Collection::Tasks, Op::Update, StoreError::unavailable("timeout"));

        let outcome = store.set_project(id, Some(fx.home), &mut refs).await;

        assert!(matches!(outcome, EditOutcome::Reconciled(_)));
        assert!(store.get(id).is_some_and(|t| t.project_id.is_none() && t.project.is_none()));
        assert_eq!(fx.gateway.count_calls(Op::Update, Collection::Projects), 0);
    }

    #[tokio::test]
    async fn clearing_project_does_not_touch_recency() {
        let fx = fixture();
        let id = fx.task("Paint fence", "2026-10-17T08:00:00Z");
        let (mut store, mut refs) = fx.open().await;

        assert_eq!(store.set_project(id, None, &mut refs).await, EditOutcome::Saved);
        assert_eq!(fx.gateway.count_calls(Op::Update, Collection::Projects), 0);
    }

    #[tokio::test]
    async fn added_task_round_trips_through_load() {
        let fx = fixture();
        let (mut store, refs) = fx.open().await;

        let added = store
            .add_task("Buy milk", None, None, &refs)
            .await
            .expect("add")
            .expect("not blank");
        store.load().await.expect("reload");

        let task = store.get(added.id).expect("task after reload");
        assert_eq!(task.text, "Buy milk");
        assert!(!task.completed);
        assert_eq!(task.completed_at, None);
    }

    #[tokio::test]
    async fn add_task_rejects_blank_and_survives_failure() {
        let fx = fixture();
        let (mut store, refs) = fx.open().await;

        assert_eq!(store.add_task("  ", None, None, &refs).await, Ok(None));
        fx.gateway
            .fail_next(Collection::Tasks, Op::Insert, StoreError::unavailable("offline"));
        assert!(store.add_task("Walk dog", None, None, &refs).await.is_err());
        assert!(store.tasks().is_empty());
    }

    #[tokio::test]
    async fn added_task_carries_display_fields() {
        let fx = fixture();
        let (mut store, refs) = fx.open().await;

        let task = store
            .add_task("Plan trip", Some(fx.home), Some(fx.high), &refs)
            .await
            .expect("add")
            .expect("not blank");

        assert_eq!(task.project.map(|b| b.name), Some("Home".to_string()));
        assert_eq!(task.priority.map(|b| b.level), Some(3));
    }

    #[tokio::test]
    async fn delete_is_confirmed_before_removal() {
        let fx = fixture();
        let id = fx.task("Old errand", "2026-10-17T08:00:00Z");
        let (mut store, _) = fx.open().await;
        fx.gateway
            .fail_next(Collection::Tasks, Op::Delete, StoreError::unavailable("offline"));

        assert!(store.delete_task(id).await.is_err());
        assert!(store.get(id).is_some());

        store.delete_task(id).await.expect("delete");
        assert!(store.get(id).is_none());
        assert!(fx.gateway.rows(Collection::Tasks).is_empty());
    }

    #[tokio::test]
    async fn completion_commit_keeps_fields_consistent() {
        let fx = fixture();
        let id = fx.task("Stretch", "2026-10-17T08:00:00Z");
        let (mut store, _) = fx.open().await;

        store.commit_completion(id, Some(Utc::now())).await.expect("complete");
        assert!(store.get(id).is_some_and(|t| t.completed && t.is_consistent()));

        fx.gateway
            .fail_next(Collection::Tasks, Op::Update, StoreError::unavailable("offline"));
        assert!(store.commit_completion(id, None).await.is_err());
        assert!(store.get(id).is_some_and(|t| t.completed && t.is_consistent()));

        store.commit_completion(id, None).await.expect("uncomplete");
        assert!(store.get(id).is_some_and(|t| !t.completed && t.is_consistent()));

        store.load().await.expect("reload");
        assert!(store.tasks().iter().all(Task::is_consistent));
    }

    #[tokio::test]
    async fn detach_and_restyle_follow_project_changes() {
        let fx = fixture();
        let id = seed(
            &fx.gateway,
            Collection::Tasks,
            json!({"task": "Mow", "user_id": fx.user, "project_id": fx.home}),
        );
        let (mut store, refs) = fx.open().await;
        let mut renamed = refs.project(fx.home).cloned().expect("home");
        renamed.name = "House".to_string();

        store.restyle_project(&renamed);
        assert_eq!(
            store.get(id).and_then(|t| t.project.clone()).map(|b| b.name),
            Some("House".to_string())
        );

        store.detach_project(fx.home);
        assert!(store.get(id).is_some_and(|t| t.project_id.is_none() && t.project.is_none()));
    }
}
