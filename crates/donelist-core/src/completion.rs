//! Complete / reopen transitions and the post-completion grace window.
//!
//! A freshly completed task stays in the active list, struck through, for
//! the grace period. Its id sits in the pending map until the timer fires
//! or the task is reopened. Each new completion restarts the timer; a
//! generation number keeps a superseded timer from clearing a newer entry.
//! Every change to the pending set ticks a watch channel so a view can
//! re-render when a window closes on its own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::effects::{self, Feedback, Origin};
use crate::gateway::{Gateway, StoreError};
use crate::record::Settings;
use crate::store::TaskStore;

pub const GRACE_PERIOD: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Completed { at: DateTime<Utc> },
    Reopened,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToggleError {
    #[error("unknown task {0}")]
    UnknownTask(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct CompletionWorkflow {
    grace: Duration,
    pending: Arc<Mutex<HashMap<Uuid, u64>>>,
    timers: HashMap<Uuid, JoinHandle<()>>,
    generation: u64,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for CompletionWorkflow {
    fn default() -> Self {
        Self::new(GRACE_PERIOD)
    }
}

impl CompletionWorkflow {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timers: HashMap::new(),
            generation: 0,
            changes: Arc::new(watch::channel(0).0),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn pending_ids(&self) -> HashSet<Uuid> {
        self.pending.lock().keys().copied().collect()
    }

    pub fn is_pending(&self, id: Uuid) -> bool {
        self.pending.lock().contains_key(&id)
    }

    /// A receiver that wakes whenever the pending set changes, including
    /// when a grace window elapses without any caller involved.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Flips a task between completed and active.
    ///
    /// Completing fires the celebration (when an origin is given and the
    /// user allows it), writes the new state, and only after the store
    /// accepts it opens the grace window. Reopening writes first, then
    /// drops any grace window. A failed write leaves everything untouched.
    #[instrument(skip(self, store, settings, feedback))]
    pub async fn toggle<G, F>(
        &mut self,
        store: &mut TaskStore<G>,
        id: Uuid,
        origin: Option<Origin>,
        settings: &Settings,
        feedback: &F,
    ) -> Result<Toggle, ToggleError>
    where
        G: Gateway,
        F: Feedback + ?Sized,
    {
        feedback.release_focus();

        let Some(task) = store.get(id) else {
            return Err(ToggleError::UnknownTask(id));
        };

        if task.completed {
            store.commit_completion(id, None).await?;
            self.cancel(id);
            info!(task = %id, "task reopened");
            return Ok(Toggle::Reopened);
        }

        let now = Utc::now();
        if let Some(origin) = origin {
            effects::celebrate(
                feedback,
                origin,
                settings.confetti_enabled,
                settings.sound_enabled,
            );
        }
        store.commit_completion(id, Some(now)).await?;
        self.start_grace(id);
        let at = store.get(id).and_then(|t| t.completed_at).unwrap_or(now);
        info!(task = %id, "task completed");
        Ok(Toggle::Completed { at })
    }

    fn start_grace(&mut self, id: Uuid) {
        if let Some(previous) = self.timers.remove(&id) {
            previous.abort();
        }
        self.timers.retain(|_, handle| !handle.is_finished());

        self.generation += 1;
        let generation = self.generation;
        self.pending.lock().insert(id, generation);
        notify(&self.changes);

        let pending = Arc::clone(&self.pending);
        let changes = Arc::clone(&self.changes);
        let grace = self.grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let settled = {
                let mut pending = pending.lock();
                pending.get(&id) == Some(&generation) && pending.remove(&id).is_some()
            };
            if settled {
                debug!(task = %id, "grace window elapsed");
                notify(&changes);
            }
        });
        self.timers.insert(id, handle);
    }

    fn cancel(&mut self, id: Uuid) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
        if self.pending.lock().remove(&id).is_some() {
            notify(&self.changes);
        }
    }

    /// Aborts every grace timer and forgets pending ids.
    pub fn shutdown(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        self.pending.lock().clear();
        notify(&self.changes);
    }
}

fn notify(changes: &watch::Sender<u64>) {
    changes.send_modify(|tick| *tick = tick.wrapping_add(1));
}

impl Drop for CompletionWorkflow {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::day::DayBoundary;
    use crate::effects::testing::Recorder;
    use crate::gateway::{Collection, Op, encode};
    use crate::memory::MemoryGateway;
    use crate::views::{Bucket, TaskViews};

    struct Harness {
        gateway: Arc<MemoryGateway>,
        store: TaskStore<MemoryGateway>,
        workflow: CompletionWorkflow,
        settings: Settings,
        id: Uuid,
    }

    async fn harness() -> Harness {
        let gateway = Arc::new(MemoryGateway::new());
        let user = Uuid::new_v4();
        let row = gateway
            .seed(
                Collection::Tasks,
                encode(&json!({"task": "Water plants", "user_id": user})).expect("encode"),
            )
            .expect("seed task");
        let id = row["id"]
            .as_str()
            .and_then(|raw| raw.parse().ok())
            .expect("uuid id");
        let mut store = TaskStore::new(gateway.clone(), user);
        store.load().await.expect("load");
        Harness {
            gateway,
            store,
            workflow: CompletionWorkflow::default(),
            settings: Settings::defaults(user),
            id,
        }
    }

    impl Harness {
        async fn toggle(&mut self, feedback: &Recorder) -> Result<Toggle, ToggleError> {
            self.workflow
                .toggle(&mut self.store, self.id, None, &self.settings, feedback)
                .await
        }

        fn bucket(&self) -> Option<Bucket> {
            self.bucket_at(Utc::now())
        }

        fn bucket_at(&self, now: DateTime<Utc>) -> Option<Bucket> {
            let classifier = DayBoundary::default().classifier(now);
            TaskViews::derive(
                self.store.tasks(),
                &self.workflow.pending_ids(),
                &classifier,
                false,
            )
            .locate(self.id)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_task_settles_after_grace_window() {
        let mut h = harness().await;
        let feedback = Recorder::default();

        let toggled = h.toggle(&feedback).await.expect("complete");

        assert!(matches!(toggled, Toggle::Completed { .. }));
        assert!(h.store.get(h.id).is_some_and(|t| t.completed));
        assert!(h.workflow.is_pending(h.id));
        assert_eq!(h.bucket(), Some(Bucket::Active));

        tokio::time::sleep(Duration::from_millis(3_999)).await;
        assert!(h.workflow.is_pending(h.id));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!h.workflow.is_pending(h.id));
        assert_eq!(h.bucket(), Some(Bucket::Today));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_window_wakes_subscribers() {
        let mut h = harness().await;
        let feedback = Recorder::default();
        h.toggle(&feedback).await.expect("complete");
        let mut changes = h.workflow.subscribe();

        changes.changed().await.expect("workflow alive");

        assert!(!h.workflow.is_pending(h.id));
        assert_eq!(h.bucket(), Some(Bucket::Today));
    }

    #[tokio::test(start_paused = true)]
    async fn window_crossing_the_cutover_settles_into_history() {
        let mut h = harness().await;
        // 02:59:58 in Amsterdam (CEST); the cutover is 01:00:00 UTC.
        let completed_at = Utc
            .with_ymd_and_hms(2026, 10, 19, 0, 59, 58)
            .single()
            .expect("valid instant");
        h.store
            .commit_completion(h.id, Some(completed_at))
            .await
            .expect("complete");
        h.workflow.start_grace(h.id);
        let during = completed_at + chrono::Duration::seconds(1);
        assert_eq!(h.bucket_at(during), Some(Bucket::Active));

        tokio::time::sleep(GRACE_PERIOD + Duration::from_millis(1)).await;

        let after = completed_at + chrono::Duration::seconds(4);
        let views = TaskViews::derive(
            h.store.tasks(),
            &h.workflow.pending_ids(),
            &DayBoundary::default().classifier(after),
            false,
        );
        assert_eq!(views.locate(h.id), Some(Bucket::History));
        assert!(views.today.is_empty() && views.active.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_cancels_the_grace_window() {
        let mut h = harness().await;
        let feedback = Recorder::default();
        h.toggle(&feedback).await.expect("complete");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.toggle(&feedback).await, Ok(Toggle::Reopened));

        assert!(!h.workflow.is_pending(h.id));
        assert!(h.store.get(h.id).is_some_and(|t| !t.completed && t.completed_at.is_none()));
        assert_eq!(h.bucket(), Some(Bucket::Active));
    }

    #[tokio::test(start_paused = true)]
    async fn completing_again_restarts_the_timer() {
        let mut h = harness().await;
        let feedback = Recorder::default();
        h.toggle(&feedback).await.expect("complete");

        tokio::time::sleep(Duration::from_secs(3)).await;
        h.toggle(&feedback).await.expect("reopen");
        h.toggle(&feedback).await.expect("complete again");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.workflow.is_pending(h.id), "first timer must not clear the new window");

        tokio::time::sleep(Duration::from_millis(2_001)).await;
        assert!(!h.workflow.is_pending(h.id));
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_grace_directly_supersedes_previous_timer() {
        let mut h = harness().await;
        h.workflow.start_grace(h.id);
        tokio::time::sleep(Duration::from_secs(2)).await;
        h.workflow.start_grace(h.id);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(h.workflow.is_pending(h.id));
        assert_eq!(h.workflow.timers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_completion_changes_nothing() {
        let mut h = harness().await;
        let feedback = Recorder::default();
        h.gateway
            .fail_next(Collection::Tasks, Op::Update, StoreError::unavailable("offline"));

        let result = h.toggle(&feedback).await;

        assert!(matches!(result, Err(ToggleError::Store(_))));
        assert!(!h.workflow.is_pending(h.id));
        assert!(h.store.get(h.id).is_some_and(|t| !t.completed));
        assert!(h.workflow.timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reopen_keeps_pending_state() {
        let mut h = harness().await;
        let feedback = Recorder::default();
        h.toggle(&feedback).await.expect("complete");
        h.gateway
            .fail_next(Collection::Tasks, Op::Update, StoreError::unavailable("offline"));

        assert!(h.toggle(&feedback).await.is_err());
        assert!(h.workflow.is_pending(h.id));
        assert!(h.store.get(h.id).is_some_and(|t| t.completed));
    }

    #[tokio::test(start_paused = true)]
    async fn celebration_needs_origin_and_never_blocks() {
        let mut h = harness().await;
        let failing = Recorder::failing();

        let result = h
            .workflow
            .toggle(&mut h.store, h.id, Some(Origin::center()), &h.settings, &failing)
            .await;

        assert!(matches!(result, Ok(Toggle::Completed { .. })));
        assert_eq!(failing.events(), vec!["release_focus", "burst:5", "chime"]);

        let quiet = Recorder::default();
        h.toggle(&quiet).await.expect("reopen");
        h.toggle(&quiet).await.expect("complete without origin");
        assert_eq!(quiet.events(), vec!["release_focus", "release_focus"]);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_effects_stay_silent() {
        let mut h = harness().await;
        h.settings.confetti_enabled = false;
        h.settings.sound_enabled = false;
        let feedback = Recorder::default();

        h.workflow
            .toggle(&mut h.store, h.id, Some(Origin::center()), &h.settings, &feedback)
            .await
            .expect("complete");

        assert_eq!(feedback.events(), vec!["release_focus"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_task_is_rejected_before_any_write() {
        let mut h = harness().await;
        let feedback = Recorder::default();
        let calls = h.gateway.calls().len();

        let result = h
            .workflow
            .toggle(&mut h.store, Uuid::new_v4(), None, &h.settings, &feedback)
            .await;

        assert!(matches!(result, Err(ToggleError::UnknownTask(_))));
        assert_eq!(h.gateway.calls().len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_pending_and_timers() {
        let mut h = harness().await;
        let feedback = Recorder::default();
        h.toggle(&feedback).await.expect("complete");

        h.workflow.shutdown();

        assert!(h.workflow.pending_ids().is_empty());
        assert!(h.workflow.timers.is_empty());
        assert_eq!(h.bucket(), Some(Bucket::Today));
    }
}
