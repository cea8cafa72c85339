//! Contract for the remote record store.
//!
//! Rows travel as JSON objects keyed by the column names of the four
//! collections (`tasks`, `projects`, `priorities`, `settings`). Every
//! operation is asynchronous and fallible; callers must not assume any
//! ordering between two calls they issued independently.

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Tasks,
    Projects,
    Priorities,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Tasks,
        Collection::Projects,
        Collection::Priorities,
        Collection::Settings,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Collection::Tasks => "tasks",
            Collection::Projects => "projects",
            Collection::Priorities => "priorities",
            Collection::Settings => "settings",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Machine-readable failure class. Only `NotFound` changes control flow in
/// the core; everything else is reported as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    Conflict,
    Invalid,
    Unavailable,
    Other(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NotFound => f.write_str("not_found"),
            ErrorCode::Conflict => f.write_str("conflict"),
            ErrorCode::Invalid => f.write_str("invalid"),
            ErrorCode::Unavailable => f.write_str("unavailable"),
            ErrorCode::Other(code) => f.write_str(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    pub code: ErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invalid, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
    pub nulls_last: bool,
}

impl Order {
    /// Ascending, nulls last.
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: false,
            nulls_last: true,
        }
    }

    /// Descending, nulls first unless `nulls_last` is applied.
    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: true,
            nulls_last: false,
        }
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls_last = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order: Vec<Order>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters
            .iter()
            .all(|(column, expected)| row.get(column).unwrap_or(&Value::Null) == expected)
    }

    /// Filters and stably sorts `rows`.
    pub fn apply(&self, rows: impl IntoIterator<Item = Row>) -> Vec<Row> {
        let mut out: Vec<Row> = rows.into_iter().filter(|row| self.matches(row)).collect();
        out.sort_by(|a, b| compare_rows(a, b, &self.order));
        out
    }
}

/// Identifies the rows touched by `update` and `delete`.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub column: &'static str,
    pub value: Value,
}

impl Key {
    pub fn id(id: Uuid) -> Self {
        Self {
            column: "id",
            value: Value::String(id.to_string()),
        }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self {
            column: "user_id",
            value: Value::String(user_id.to_string()),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(self.column) == Some(&self.value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.value)
    }
}

pub trait Gateway {
    fn list(
        &self,
        collection: Collection,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Row>, StoreError>>;

    /// Inserts `row` and returns it as stored, including store-assigned
    /// columns such as `id` and `created_at`.
    fn insert(
        &self,
        collection: Collection,
        row: Row,
    ) -> impl Future<Output = Result<Row, StoreError>>;

    fn update(
        &self,
        collection: Collection,
        key: &Key,
        patch: Row,
    ) -> impl Future<Output = Result<(), StoreError>>;

    fn delete(
        &self,
        collection: Collection,
        key: &Key,
    ) -> impl Future<Output = Result<(), StoreError>>;
}

/// Fetches exactly one row, reporting `NotFound` when nothing matches.
pub async fn single<G: Gateway>(
    gateway: &G,
    collection: Collection,
    query: &Query,
) -> Result<Row, StoreError> {
    let mut rows = gateway.list(collection, query).await?;
    match rows.len() {
        1 => Ok(rows.remove(0)),
        0 => Err(StoreError::not_found(format!(
            "no {collection} row matches the query"
        ))),
        n => Err(StoreError::conflict(format!(
            "expected a single {collection} row, found {n}"
        ))),
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(StoreError::invalid(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(err) => Err(StoreError::invalid(err.to_string())),
    }
}

pub fn decode<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(row))
        .map_err(|err| StoreError::invalid(format!("malformed row: {err}")))
}

pub fn decode_all<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
    rows.into_iter().map(decode).collect()
}

/// Builds a partial row for `update`.
pub fn patch<I>(fields: I) -> Row
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    fields
        .into_iter()
        .map(|(column, value)| (column.to_string(), value))
        .collect()
}

pub fn timestamp_value(ts: Option<DateTime<Utc>>) -> Value {
    match ts {
        Some(ts) => Value::String(ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)),
        None => Value::Null,
    }
}

pub fn id_value(id: Option<Uuid>) -> Value {
    match id {
        Some(id) => Value::String(id.to_string()),
        None => Value::Null,
    }
}

fn compare_rows(a: &Row, b: &Row, order: &[Order]) -> Ordering {
    for o in order {
        let left = a.get(&o.column).filter(|v| !v.is_null());
        let right = b.get(&o.column).filter(|v| !v.is_null());
        let ord = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => {
                if o.nulls_last {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (Some(_), None) => {
                if o.nulls_last {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y);
                if o.descending { ord.reverse() } else { ord }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => {
            match (parse_timestamp(x), parse_timestamp(y)) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("test rows must be objects"),
        }
    }

    #[test]
    fn orders_by_recency_with_nulls_last_then_name() {
        let rows = vec![
            row(json!({"name": "zeta", "last_used_at": null})),
            row(json!({"name": "beta", "last_used_at": "2026-10-18T09:00:00Z"})),
            row(json!({"name": "alpha", "last_used_at": null})),
            row(json!({"name": "gamma", "last_used_at": "2026-10-18T09:00:00.500Z"})),
        ];
        let query = Query::all()
            .order_by(Order::desc("last_used_at").nulls_last())
            .order_by(Order::asc("name"));

        let names: Vec<_> = query
            .apply(rows)
            .into_iter()
            .map(|r| r["name"].as_str().unwrap_or_default().to_string())
            .collect();

        assert_eq!(names, vec!["gamma", "beta", "alpha", "zeta"]);
    }

    #[test]
    fn descending_defaults_to_nulls_first() {
        let rows = vec![
            row(json!({"level": 1})),
            row(json!({"level": null})),
            row(json!({"level": 3})),
        ];
        let levels: Vec<_> = Query::all()
            .order_by(Order::desc("level"))
            .apply(rows)
            .into_iter()
            .map(|r| r["level"].clone())
            .collect();

        assert_eq!(levels, vec![Value::Null, json!(3), json!(1)]);
    }

    #[test]
    fn equality_filters_treat_missing_as_null() {
        let query = Query::all().eq("project_id", Value::Null);
        assert!(query.matches(&row(json!({"task": "a"}))));
        assert!(!query.matches(&row(json!({"project_id": "p1"}))));
    }

    #[test]
    fn error_display_carries_code_and_message() {
        let err = StoreError::not_found("no settings row");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not_found: no settings row");
        assert!(!StoreError::unavailable("offline").is_not_found());
    }
}
