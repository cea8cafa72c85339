//! Projects and priorities: loaded once per session, mutated in place.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use rand::seq::IndexedRandom;
use serde_json::Value;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::gateway::{
    Collection, Gateway, Key, Order, Query, StoreError, decode, decode_all, encode, patch,
    timestamp_value,
};
use crate::record::{NewProject, Priority, Project};

/// Colors picked at random for projects created on the fly.
pub const PROJECT_COLORS: [&str; 6] = [
    "#ef4444", "#f59e0b", "#10b981", "#3b82f6", "#8b5cf6", "#ec4899",
];

/// Named colors offered when recoloring a project.
pub const RECOLOR_PALETTE: [(&str, &str); 10] = [
    ("Gray", "#6B7280"),
    ("Brown", "#92400E"),
    ("Orange", "#EA580C"),
    ("Yellow", "#EAB308"),
    ("Green", "#16A34A"),
    ("Teal", "#0D9488"),
    ("Blue", "#2563EB"),
    ("Purple", "#9333EA"),
    ("Pink", "#DB2777"),
    ("Red", "#DC2626"),
];

#[derive(Debug)]
pub struct ReferenceCache<G> {
    gateway: Arc<G>,
    user_id: Uuid,
    projects: Vec<Project>,
    priorities: Vec<Priority>,
}

impl<G: Gateway> ReferenceCache<G> {
    pub fn new(gateway: Arc<G>, user_id: Uuid) -> Self {
        Self {
            gateway,
            user_id,
            projects: vec![],
            priorities: vec![],
        }
    }

    /// Loads both lists; a failure on one leaves that list as it was and
    /// does not prevent loading the other.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub async fn load(&mut self) -> Result<(), StoreError> {
        let projects = self.load_projects().await;
        let priorities = self.load_priorities().await;
        projects.and(priorities)
    }

    pub async fn load_projects(&mut self) -> Result<(), StoreError> {
        let query = Query::all()
            .eq("user_id", self.user_id.to_string())
            .order_by(Order::desc("last_used_at").nulls_last())
            .order_by(Order::asc("name"));
        let fetched = self
            .gateway
            .list(Collection::Projects, &query)
            .await
            .and_then(decode_all::<Project>);
        match fetched {
            Ok(projects) => {
                debug!(count = projects.len(), "loaded projects");
                self.projects = projects;
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to fetch projects");
                Err(err)
            }
        }
    }

    pub async fn load_priorities(&mut self) -> Result<(), StoreError> {
        let query = Query::all().order_by(Order::desc("level"));
        let fetched = self
            .gateway
            .list(Collection::Priorities, &query)
            .await
            .and_then(decode_all::<Priority>);
        match fetched {
            Ok(priorities) => {
                debug!(count = priorities.len(), "loaded priorities");
                self.priorities = priorities;
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to fetch priorities");
                Err(err)
            }
        }
    }

    /// Most recently used first, never-used last, then by name.
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Highest level first.
    pub fn priorities(&self) -> &[Priority] {
        &self.priorities
    }

    pub fn project(&self, id: Uuid) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn priority(&self, id: Uuid) -> Option<&Priority> {
        self.priorities.iter().find(|p| p.id == id)
    }

    pub fn project_by_name(&self, name: &str) -> Option<&Project> {
        let name = name.trim();
        self.projects
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn priority_by_name(&self, name: &str) -> Option<&Priority> {
        let name = name.trim();
        self.priorities
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Creates a project with a random palette color. Blank names are
    /// ignored (`Ok(None)`).
    #[instrument(skip(self))]
    pub async fn create_project(&mut self, name: &str) -> Result<Option<Project>, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            debug!("ignoring blank project name");
            return Ok(None);
        }
        let color = PROJECT_COLORS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(PROJECT_COLORS[0]);
        let row = encode(&NewProject {
            name: name.to_string(),
            color: color.to_string(),
            user_id: self.user_id,
        })?;

        let stored = match self.gateway.insert(Collection::Projects, row).await {
            Ok(row) => decode::<Project>(row)?,
            Err(err) => {
                error!(error = %err, "failed to create project");
                return Err(err);
            }
        };
        info!(project = %stored.id, color, "created project");
        self.projects.push(stored.clone());
        Ok(Some(stored))
    }

    /// Marks a project as just used. The local copy is bumped even when the
    /// remote write fails; the error is still returned for reporting.
    #[instrument(skip(self))]
    pub async fn touch_project_usage(&mut self, id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now().trunc_subsecs(6);
        let result = self
            .gateway
            .update(
                Collection::Projects,
                &Key::id(id),
                patch([("last_used_at", timestamp_value(Some(now)))]),
            )
            .await;
        if let Err(err) = &result {
            error!(project = %id, error = %err, "failed to update project timestamp");
        }

        if let Some(project) = self.projects.iter_mut().find(|p| p.id == id) {
            project.last_used_at = Some(now);
        }
        self.sort_projects();
        result
    }

    #[instrument(skip(self))]
    pub async fn rename_project(
        &mut self,
        id: Uuid,
        name: &str,
    ) -> Result<Option<Project>, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        self.apply_project_patch(id, ProjectField::Name(name.to_string()))
            .await
    }

    /// Any `#rgb` or `#rrggbb` color is accepted; anything else is ignored.
    #[instrument(skip(self))]
    pub async fn recolor_project(
        &mut self,
        id: Uuid,
        color: &str,
    ) -> Result<Option<Project>, StoreError> {
        if !is_hex_color(color) {
            debug!(color, "ignoring malformed color");
            return Ok(None);
        }
        self.apply_project_patch(id, ProjectField::Color(color.to_string()))
            .await
    }

    /// Removes the project. Tasks pointing at it are not touched here.
    #[instrument(skip(self))]
    pub async fn delete_project(&mut self, id: Uuid) -> Result<(), StoreError> {
        if let Err(err) = self.gateway.delete(Collection::Projects, &Key::id(id)).await {
            error!(project = %id, error = %err, "failed to delete project");
            return Err(err);
        }
        self.projects.retain(|p| p.id != id);
        info!(project = %id, "deleted project");
        Ok(())
    }

    async fn apply_project_patch(
        &mut self,
        id: Uuid,
        field: ProjectField,
    ) -> Result<Option<Project>, StoreError> {
        let column = field.column();
        if let Err(err) = self
            .gateway
            .update(Collection::Projects, &Key::id(id), patch([(column, field.value())]))
            .await
        {
            error!(project = %id, column, error = %err, "failed to update project");
            return Err(err);
        }

        let Some(project) = self.projects.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        field.apply(project);
        let updated = project.clone();
        self.sort_projects();
        Ok(Some(updated))
    }

    fn sort_projects(&mut self) {
        self.projects.sort_by(project_order);
    }
}

/// A user-editable project column.
#[derive(Debug, Clone)]
enum ProjectField {
    Name(String),
    Color(String),
}

impl ProjectField {
    fn column(&self) -> &'static str {
        match self {
            ProjectField::Name(_) => "name",
            ProjectField::Color(_) => "color",
        }
    }

    fn value(&self) -> Value {
        match self {
            ProjectField::Name(text) | ProjectField::Color(text) => Value::String(text.clone()),
        }
    }

    fn apply(self, project: &mut Project) {
        match self {
            ProjectField::Name(name) => project.name = name,
            ProjectField::Color(color) => project.color = color,
        }
    }
}

fn project_order(a: &Project, b: &Project) -> Ordering {
    match (a.last_used_at, b.last_used_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.name.cmp(&b.name))
}

fn is_hex_color(raw: &str) -> bool {
    raw.strip_prefix('#').is_some_and(|hex| {
        matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
    })
}
