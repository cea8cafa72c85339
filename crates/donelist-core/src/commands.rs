use std::collections::HashSet;
use std::io::{self, IsTerminal, Write};

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::cli::{Command, ProjectsCommand, parse_switch};
use crate::completion::Toggle;
use crate::effects::{Burst, Chime, Feedback, Origin};
use crate::gateway::Gateway;
use crate::prefs::SettingKey;
use crate::reference::RECOLOR_PALETTE;
use crate::render::{Renderer, Sections, short_id};
use crate::session::Session;
use crate::store::EditOutcome;

/// Feedback for a terminal session: the chime rings the bell, alerts go
/// to stderr, bursts are only logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalFeedback;

impl Feedback for TerminalFeedback {
    fn burst(&self, burst: &Burst) -> anyhow::Result<()> {
        debug!(particles = burst.particle_count, "burst");
        Ok(())
    }

    fn chime(&self, _chime: &Chime) -> anyhow::Result<()> {
        let mut err = io::stderr();
        if err.is_terminal() {
            err.write_all(b"\x07").context("failed to ring bell")?;
        }
        Ok(())
    }

    fn alert(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[instrument(skip(session, renderer, out))]
pub async fn dispatch<G, F, W>(
    session: &mut Session<G, F>,
    renderer: &Renderer,
    command: Command,
    mut out: W,
) -> anyhow::Result<()>
where
    G: Gateway,
    F: Feedback,
    W: Write,
{
    match command {
        Command::List { projects, all } => {
            let mut selected = HashSet::new();
            for name in &projects {
                selected.insert(project_id(session, name)?);
            }
            let mut views = session.views();
            views.retain_projects(&selected);
            let sections = if all {
                Sections::all()
            } else {
                Sections::from_settings(session.settings())
            };
            renderer.write_views(
                &mut out,
                &views,
                &session.pending_ids(),
                sections,
                session.boundary(),
            )
        }
        Command::Add {
            text,
            project,
            new_project,
            priority,
        } => {
            let text = text.join(" ");
            let priority = priority
                .map(|name| priority_id(session, &name))
                .transpose()?;
            let added = match new_project {
                Some(name) => session.add_task_with_new_project(&text, &name, priority).await?,
                None => {
                    let project = project
                        .map(|name| project_id(session, &name))
                        .transpose()?;
                    session.add_task(&text, project, priority).await?
                }
            };
            let task = added.ok_or_else(|| anyhow!("task text cannot be empty"))?;
            info!(task = %task.id, "added task");
            writeln!(out, "Added task {}.", short_id(task.id))?;
            Ok(())
        }
        Command::Edit { id, text } => {
            let id = resolve_task(session, &id)?;
            let outcome = session.set_text(id, &text.join(" ")).await;
            report_edit(&mut out, id, outcome)
        }
        Command::Project { id, name } => {
            let id = resolve_task(session, &id)?;
            let project = name.map(|name| project_id(session, &name)).transpose()?;
            let outcome = session.set_project(id, project).await;
            report_edit(&mut out, id, outcome)
        }
        Command::Priority { id, name } => {
            let id = resolve_task(session, &id)?;
            let priority = name.map(|name| priority_id(session, &name)).transpose()?;
            let outcome = session.set_priority(id, priority).await;
            report_edit(&mut out, id, outcome)
        }
        Command::Toggle { id } => {
            let id = resolve_task(session, &id)?;
            match session.toggle_task(id, Some(Origin::center())).await? {
                Toggle::Completed { .. } => writeln!(out, "Completed task {}.", short_id(id))?,
                Toggle::Reopened => writeln!(out, "Reopened task {}.", short_id(id))?,
            }
            Ok(())
        }
        Command::Delete { id, yes } => {
            let id = resolve_task(session, &id)?;
            if session.delete_task(id, yes).await? {
                writeln!(out, "Deleted task {}.", short_id(id))?;
            } else {
                writeln!(out, "Not deleted; pass --yes to confirm.")?;
            }
            Ok(())
        }
        Command::Projects { action } => {
            projects(session, renderer, action.unwrap_or(ProjectsCommand::List), out).await
        }
        Command::Priorities => renderer.write_priorities(&mut out, session.priorities()),
        Command::Settings { key, value } => match (key, value) {
            (None, _) => renderer.write_settings(&mut out, session.settings()),
            (Some(key), None) => {
                let key: SettingKey = key.parse()?;
                let value = if key.read(session.settings()) { "on" } else { "off" };
                writeln!(out, "{key} = {value}")?;
                Ok(())
            }
            (Some(key), Some(value)) => {
                let key: SettingKey = key.parse()?;
                let value = parse_switch(&value)?;
                session
                    .set_preference(key, value)
                    .await
                    .with_context(|| format!("failed to save {key}"))?;
                writeln!(out, "{key} = {}", if value { "on" } else { "off" })?;
                Ok(())
            }
        },
    }
}

async fn projects<G, F, W>(
    session: &mut Session<G, F>,
    renderer: &Renderer,
    action: ProjectsCommand,
    mut out: W,
) -> anyhow::Result<()>
where
    G: Gateway,
    F: Feedback,
    W: Write,
{
    match action {
        ProjectsCommand::List => renderer.write_projects(&mut out, session.projects()),
        ProjectsCommand::Add { name } => {
            let project = session
                .create_project(&name)
                .await?
                .ok_or_else(|| anyhow!("project name cannot be empty"))?;
            writeln!(out, "Created project {} ({}).", project.name, project.color)?;
            Ok(())
        }
        ProjectsCommand::Rename { name, new_name } => {
            let id = project_id(session, &name)?;
            let project = session
                .rename_project(id, &new_name)
                .await?
                .ok_or_else(|| anyhow!("project name cannot be empty"))?;
            writeln!(out, "Renamed project to {}.", project.name)?;
            Ok(())
        }
        ProjectsCommand::Recolor { name, color } => {
            let id = project_id(session, &name)?;
            let hex = palette_color(&color).unwrap_or(color.as_str()).to_string();
            let project = session
                .recolor_project(id, &hex)
                .await?
                .ok_or_else(|| anyhow!("not a color: {color}"))?;
            writeln!(out, "Project {} is now {}.", project.name, project.color)?;
            Ok(())
        }
        ProjectsCommand::Delete { name, yes } => {
            let id = project_id(session, &name)?;
            if !yes {
                writeln!(out, "Not deleted; pass --yes to confirm.")?;
                return Ok(());
            }
            session.delete_project(id).await?;
            writeln!(out, "Deleted project {name}; its tasks are now unassigned.")?;
            Ok(())
        }
    }
}

fn report_edit<W: Write>(mut out: W, id: Uuid, outcome: EditOutcome) -> anyhow::Result<()> {
    match outcome {
        EditOutcome::Saved => writeln!(out, "Updated task {}.", short_id(id))?,
        EditOutcome::Skipped => writeln!(out, "Nothing to change.")?,
        EditOutcome::Reconciled(err) => {
            return Err(anyhow!(err).context("update failed; task list reloaded from the store"));
        }
    }
    Ok(())
}

/// Accepts a full id or an unambiguous prefix of its hex digits.
pub fn resolve_task<G: Gateway, F: Feedback>(
    session: &Session<G, F>,
    raw: &str,
) -> anyhow::Result<Uuid> {
    if let Ok(id) = raw.trim().parse::<Uuid>()
        && session.task(id).is_some()
    {
        return Ok(id);
    }

    let prefix = raw.trim().replace('-', "").to_ascii_lowercase();
    if prefix.is_empty() {
        return Err(anyhow!("task id cannot be empty"));
    }
    let mut matches = session
        .tasks()
        .iter()
        .map(|t| t.id)
        .filter(|id| id.simple().to_string().starts_with(&prefix));
    let first = matches.next().ok_or_else(|| anyhow!("no task matches {raw}"))?;
    if matches.next().is_some() {
        return Err(anyhow!("task id {raw} is ambiguous"));
    }
    Ok(first)
}

fn project_id<G: Gateway, F: Feedback>(
    session: &Session<G, F>,
    name: &str,
) -> anyhow::Result<Uuid> {
    session
        .project_by_name(name)
        .map(|p| p.id)
        .ok_or_else(|| anyhow!("unknown project: {name}"))
}

fn priority_id<G: Gateway, F: Feedback>(
    session: &Session<G, F>,
    name: &str,
) -> anyhow::Result<Uuid> {
    session
        .priority_by_name(name)
        .map(|p| p.id)
        .ok_or_else(|| anyhow!("unknown priority: {name}"))
}

fn palette_color(name: &str) -> Option<&'static str> {
    RECOLOR_PALETTE
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(name.trim()))
        .map(|(_, hex)| *hex)
}
