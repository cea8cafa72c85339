//! In-process gateway backed by plain row tables.
//!
//! [`Tables`] carries the relational behaviour shared with the file-backed
//! store (id assignment, column defaults, unique settings per user,
//! `ON DELETE SET NULL` for task references). [`MemoryGateway`] wraps it with
//! failure injection and call recording for tests.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::gateway::{Collection, Gateway, Key, Op, Query, Row, StoreError, timestamp_value};

#[derive(Debug, Clone, Default)]
pub struct Tables {
    rows: BTreeMap<Collection, Vec<Row>>,
}

impl Tables {
    pub fn rows(&self, collection: Collection) -> &[Row] {
        self.rows
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn replace(&mut self, collection: Collection, rows: Vec<Row>) {
        self.rows.insert(collection, rows);
    }

    pub fn select(&self, collection: Collection, query: &Query) -> Vec<Row> {
        query.apply(self.rows(collection).iter().cloned())
    }

    pub fn insert(
        &mut self,
        collection: Collection,
        row: Row,
        now: DateTime<Utc>,
    ) -> Result<Row, StoreError> {
        let row = stamp(collection, row, self.rows(collection), now)?;
        self.rows.entry(collection).or_default().push(row.clone());
        trace!(%collection, "inserted row");
        Ok(row)
    }

    pub fn update(
        &mut self,
        collection: Collection,
        key: &Key,
        patch: &Row,
    ) -> Result<(), StoreError> {
        let rows = self.rows.entry(collection).or_default();
        let mut touched = 0usize;
        for row in rows.iter_mut().filter(|row| key.matches(row)) {
            for (column, value) in patch {
                if column == "id" {
                    continue;
                }
                row.insert(column.clone(), value.clone());
            }
            touched += 1;
        }
        if touched == 0 {
            return Err(StoreError::not_found(format!(
                "no {collection} row with {key}"
            )));
        }
        Ok(())
    }

    /// Removes matching rows and returns every collection that changed.
    pub fn delete(
        &mut self,
        collection: Collection,
        key: &Key,
    ) -> Result<Vec<Collection>, StoreError> {
        let rows = self.rows.entry(collection).or_default();
        let before = rows.len();
        let mut removed_ids = Vec::new();
        rows.retain(|row| {
            if key.matches(row) {
                if let Some(id) = row.get("id") {
                    removed_ids.push(id.clone());
                }
                false
            } else {
                true
            }
        });
        if rows.len() == before {
            return Err(StoreError::not_found(format!(
                "no {collection} row with {key}"
            )));
        }

        let mut changed = vec![collection];
        let reference = match collection {
            Collection::Projects => Some("project_id"),
            Collection::Priorities => Some("priority_id"),
            _ => None,
        };
        if let Some(column) = reference {
            let tasks = self.rows.entry(Collection::Tasks).or_default();
            let mut detached = 0usize;
            for task in tasks.iter_mut() {
                if task.get(column).is_some_and(|v| removed_ids.contains(v)) {
                    task.insert(column.to_string(), Value::Null);
                    detached += 1;
                }
            }
            if detached > 0 {
                debug!(%collection, detached, "nulled task references");
                changed.push(Collection::Tasks);
            }
        }
        Ok(changed)
    }
}

fn stamp(
    collection: Collection,
    mut row: Row,
    existing: &[Row],
    now: DateTime<Utc>,
) -> Result<Row, StoreError> {
    if collection == Collection::Settings {
        let user = row
            .get("user_id")
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| StoreError::invalid("settings row requires user_id"))?;
        if existing.iter().any(|r| r.get("user_id") == Some(&user)) {
            return Err(StoreError::conflict(format!(
                "settings already exist for user {user}"
            )));
        }
        for column in [
            "confetti_enabled",
            "sound_enabled",
            "show_completed",
            "show_history",
        ] {
            row.entry(column).or_insert(Value::Bool(true));
        }
        row.entry("sort_by_priority").or_insert(Value::Bool(false));
        return Ok(row);
    }

    let id = match row.get("id").filter(|v| !v.is_null()) {
        Some(id) => id.clone(),
        None => Value::String(Uuid::new_v4().to_string()),
    };
    if existing.iter().any(|r| r.get("id") == Some(&id)) {
        return Err(StoreError::conflict(format!(
            "{collection} row {id} already exists"
        )));
    }
    row.insert("id".to_string(), id);

    match collection {
        Collection::Tasks => {
            require_text(&row, "task", collection)?;
            row.entry("completed").or_insert(Value::Bool(false));
            row.entry("completed_at").or_insert(Value::Null);
            row.entry("project_id").or_insert(Value::Null);
            row.entry("priority_id").or_insert(Value::Null);
            row.entry("created_at")
                .or_insert_with(|| timestamp_value(Some(now)));
        }
        Collection::Projects => {
            require_text(&row, "name", collection)?;
            row.entry("last_used_at").or_insert(Value::Null);
        }
        Collection::Priorities => {
            require_text(&row, "name", collection)?;
        }
        Collection::Settings => {}
    }
    Ok(row)
}

fn require_text(row: &Row, column: &str, collection: Collection) -> Result<(), StoreError> {
    match row.get(column).and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => Ok(()),
        _ => Err(StoreError::invalid(format!(
            "{collection}.{column} must be a non-empty string"
        ))),
    }
}

#[derive(Debug)]
struct Injected {
    collection: Collection,
    op: Op,
    error: StoreError,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: Tables,
    failures: VecDeque<Injected>,
    calls: Vec<(Op, Collection)>,
}

/// Gateway holding everything in memory. Failures queued with
/// [`MemoryGateway::fail_next`] are returned by the next matching call.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, collection: Collection, op: Op, error: StoreError) {
        self.state.lock().failures.push_back(Injected {
            collection,
            op,
            error,
        });
    }

    pub fn calls(&self) -> Vec<(Op, Collection)> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, op: Op, collection: Collection) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| **call == (op, collection))
            .count()
    }

    pub fn rows(&self, collection: Collection) -> Vec<Row> {
        self.state.lock().tables.rows(collection).to_vec()
    }

    /// Inserts directly, bypassing failure injection and call recording.
    pub fn seed(&self, collection: Collection, row: Row) -> Result<Row, StoreError> {
        self.state.lock().tables.insert(collection, row, Utc::now())
    }

    fn enter(
        &self,
        op: Op,
        collection: Collection,
    ) -> Result<parking_lot::MutexGuard<'_, MemoryState>, StoreError> {
        let mut state = self.state.lock();
        state.calls.push((op, collection));
        let position = state
            .failures
            .iter()
            .position(|f| f.op == op && f.collection == collection);
        if let Some(idx) = position
            && let Some(injected) = state.failures.remove(idx)
        {
            debug!(%collection, ?op, error = %injected.error, "returning injected failure");
            return Err(injected.error);
        }
        Ok(state)
    }
}

impl Gateway for MemoryGateway {
    async fn list(&self, collection: Collection, query: &Query) -> Result<Vec<Row>, StoreError> {
        let state = self.enter(Op::List, collection)?;
        Ok(state.tables.select(collection, query))
    }

    async fn insert(&self, collection: Collection, row: Row) -> Result<Row, StoreError> {
        let mut state = self.enter(Op::Insert, collection)?;
        state.tables.insert(collection, row, Utc::now())
    }

    async fn update(
        &self,
        collection: Collection,
        key: &Key,
        patch: Row,
    ) -> Result<(), StoreError> {
        let mut state = self.enter(Op::Update, collection)?;
        state.tables.update(collection, key, &patch)
    }

    async fn delete(&self, collection: Collection, key: &Key) -> Result<(), StoreError> {
        let mut state = self.enter(Op::Delete, collection)?;
        state.tables.delete(collection, key).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::gateway::{Order, single};

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("test rows must be objects"),
        }
    }

    #[tokio::test]
    async fn insert_assigns_id_and_task_defaults() {
        let gateway = MemoryGateway::new();
        let stored = gateway
            .insert(Collection::Tasks, row(json!({"task": "Buy milk"})))
            .await
            .expect("insert task");

        assert!(stored["id"].as_str().is_some());
        assert_eq!(stored["completed"], json!(false));
        assert_eq!(stored["completed_at"], Value::Null);
        assert!(stored["created_at"].as_str().is_some());
    }

    #[tokio::test]
    async fn rejects_second_settings_row_for_user() {
        let gateway = MemoryGateway::new();
        let user = Uuid::new_v4().to_string();
        gateway
            .insert(Collection::Settings, row(json!({"user_id": user})))
            .await
            .expect("first insert");
        let err = gateway
            .insert(Collection::Settings, row(json!({"user_id": user})))
            .await
            .expect_err("duplicate insert");
        assert_eq!(err.code, crate::gateway::ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn single_reports_not_found_for_missing_settings() {
        let gateway = MemoryGateway::new();
        let query = Query::all().eq("user_id", Uuid::new_v4().to_string());
        let err = single(&gateway, Collection::Settings, &query)
            .await
            .expect_err("no row");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn deleting_project_nulls_task_references() {
        let gateway = MemoryGateway::new();
        let project = gateway
            .seed(Collection::Projects, row(json!({"name": "Home", "color": "#10b981"})))
            .expect("seed project");
        let project_id = project["id"].clone();
        gateway
            .seed(
                Collection::Tasks,
                row(json!({"task": "Vacuum", "project_id": project_id})),
            )
            .expect("seed task");

        let id = project_id
            .as_str()
            .and_then(|raw| raw.parse::<Uuid>().ok())
            .expect("uuid id");
        gateway
            .delete(Collection::Projects, &Key::id(id))
            .await
            .expect("delete project");

        let tasks = gateway.rows(Collection::Tasks);
        assert_eq!(tasks[0]["project_id"], Value::Null);
        assert!(gateway.rows(Collection::Projects).is_empty());
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let gateway = MemoryGateway::new();
        gateway.fail_next(
            Collection::Priorities,
            Op::List,
            StoreError::unavailable("connection reset"),
        );
        let query = Query::all().order_by(Order::desc("level"));

        assert!(gateway.list(Collection::Priorities, &query).await.is_err());
        assert!(gateway.list(Collection::Priorities, &query).await.is_ok());
        assert_eq!(gateway.count_calls(Op::List, Collection::Priorities), 2);
    }

    #[tokio::test]
    async fn updating_missing_row_is_not_found() {
        let gateway = MemoryGateway::new();
        let err = gateway
            .update(
                Collection::Tasks,
                &Key::id(Uuid::new_v4()),
                row(json!({"task": "x"})),
            )
            .await
            .expect_err("missing row");
        assert!(err.is_not_found());
    }
}
