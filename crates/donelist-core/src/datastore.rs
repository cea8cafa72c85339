//! File-backed gateway: one JSON-lines file per collection under the data
//! directory, rewritten atomically after every successful write.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gateway::{Collection, Gateway, Key, Query, Row, StoreError, encode};
use crate::memory::Tables;

pub const DEFAULT_PRIORITIES: [(&str, &str, i32); 4] = [
    ("Urgent", "#DC2626", 4),
    ("High", "#EA580C", 3),
    ("Medium", "#EAB308", 2),
    ("Low", "#16A34A", 1),
];

const USER_FILE: &str = "user.data";

#[derive(Debug)]
pub struct FileGateway {
    data_dir: PathBuf,
    lock: Mutex<()>,
}

impl FileGateway {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let gateway = Self {
            data_dir,
            lock: Mutex::new(()),
        };
        for collection in Collection::ALL {
            let path = gateway.path(collection);
            if !path.exists() {
                fs::write(&path, "")
                    .with_context(|| format!("failed to create {}", path.display()))?;
            }
        }
        gateway.seed_priorities()?;

        info!(data_dir = %gateway.data_dir.display(), "opened datastore");
        Ok(gateway)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path(&self, collection: Collection) -> PathBuf {
        self.data_dir.join(format!("{}.data", collection.table()))
    }

    /// The id of the user owning this data directory, created on first use.
    #[tracing::instrument(skip(self))]
    pub fn local_user(&self) -> anyhow::Result<Uuid> {
        let path = self.data_dir.join(USER_FILE);
        if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return trimmed
                    .parse()
                    .with_context(|| format!("invalid user id in {}", path.display()));
            }
        }

        let user = Uuid::new_v4();
        fs::write(&path, format!("{user}\n"))
            .with_context(|| format!("failed writing {}", path.display()))?;
        info!(%user, "created local user id");
        Ok(user)
    }

    fn seed_priorities(&self) -> anyhow::Result<()> {
        let path = self.path(Collection::Priorities);
        if !load_jsonl(&path)?.is_empty() {
            return Ok(());
        }
        let mut tables = Tables::default();
        for (name, color, level) in DEFAULT_PRIORITIES {
            let row = encode(&json!({"name": name, "color": color, "level": level}))?;
            tables.insert(Collection::Priorities, row, Utc::now())?;
        }
        save_jsonl_atomic(&path, tables.rows(Collection::Priorities))
            .context("failed to seed priorities.data")?;
        info!(count = DEFAULT_PRIORITIES.len(), "seeded default priorities");
        Ok(())
    }

    fn load_tables(&self) -> Result<Tables, StoreError> {
        let mut tables = Tables::default();
        for collection in Collection::ALL {
            let rows = load_jsonl(&self.path(collection))
                .with_context(|| format!("failed to load {collection}.data"))
                .map_err(unavailable)?;
            tables.replace(collection, rows);
        }
        Ok(tables)
    }

    fn save(&self, tables: &Tables, changed: &[Collection]) -> Result<(), StoreError> {
        for &collection in changed {
            save_jsonl_atomic(&self.path(collection), tables.rows(collection))
                .with_context(|| format!("failed to save {collection}.data"))
                .map_err(unavailable)?;
        }
        Ok(())
    }
}

fn unavailable(err: anyhow::Error) -> StoreError {
    let message = format!("{err:#}");
    warn!(error = %message, "datastore io failed");
    StoreError::unavailable(message)
}

impl Gateway for FileGateway {
    async fn list(&self, collection: Collection, query: &Query) -> Result<Vec<Row>, StoreError> {
        let _guard = self.lock.lock();
        let rows = load_jsonl(&self.path(collection))
            .with_context(|| format!("failed to load {collection}.data"))
            .map_err(unavailable)?;
        Ok(query.apply(rows))
    }

    async fn insert(&self, collection: Collection, row: Row) -> Result<Row, StoreError> {
        let _guard = self.lock.lock();
        let mut tables = self.load_tables()?;
        let stored = tables.insert(collection, row, Utc::now())?;
        self.save(&tables, &[collection])?;
        Ok(stored)
    }

    async fn update(
        &self,
        collection: Collection,
        key: &Key,
        patch: Row,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut tables = self.load_tables()?;
        tables.update(collection, key, &patch)?;
        self.save(&tables, &[collection])
    }

    async fn delete(&self, collection: Collection, key: &Key) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut tables = self.load_tables()?;
        let changed = tables.delete(collection, key)?;
        self.save(&tables, &changed)
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Row>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let row: Row = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(row);
    }

    debug!(count = out.len(), "loaded rows from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, rows))]
fn save_jsonl_atomic(path: &Path, rows: &[Row]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = rows.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for row in rows {
        let serialized = serde_json::to_string(row)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
