use std::collections::HashSet;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use unicode_width::UnicodeWidthStr;
use uuid::Uuid;

use crate::config::Config;
use crate::day::DayBoundary;
use crate::record::{Priority, Project, Settings, Task};
use crate::views::TaskViews;

pub const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

/// Which completed sections to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections {
    pub today: bool,
    pub history: bool,
}

impl Sections {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            today: settings.show_completed,
            history: settings.show_history,
        }
    }

    pub fn all() -> Self {
        Self {
            today: true,
            history: true,
        }
    }
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all)]
    pub fn write_views<W: Write>(
        &self,
        mut out: W,
        views: &TaskViews,
        pending: &HashSet<Uuid>,
        sections: Sections,
        boundary: &DayBoundary,
    ) -> anyhow::Result<()> {
        if views.active.is_empty() {
            writeln!(out, "No active tasks.")?;
        } else {
            let rows = views
                .active
                .iter()
                .map(|task| {
                    let text = if pending.contains(&task.id) {
                        self.strike(&task.text)
                    } else {
                        task.text.clone()
                    };
                    vec![
                        self.paint(&short_id(task.id), "33"),
                        if task.completed { "[x]" } else { "[ ]" }.to_string(),
                        self.project_cell(task),
                        self.priority_cell(task),
                        text,
                    ]
                })
                .collect();
            write_table(&mut out, headers(&["ID", "", "Project", "Priority", "Task"]), rows)?;
        }

        if sections.today {
            writeln!(out)?;
            writeln!(out, "Today's Completed ({})", views.today.len())?;
            if !views.today.is_empty() {
                let rows = self.completed_rows(&views.today, boundary, "%H:%M");
                write_table(&mut out, headers(&["ID", "Done", "Project", "Task"]), rows)?;
            }
        }

        if sections.history {
            writeln!(out)?;
            writeln!(out, "History ({})", views.history.len())?;
            if !views.history.is_empty() {
                let rows = self.completed_rows(&views.history, boundary, "%Y-%m-%d %H:%M");
                write_table(&mut out, headers(&["ID", "Done", "Project", "Task"]), rows)?;
            }
        }

        Ok(())
    }

    pub fn write_projects<W: Write>(&self, mut out: W, projects: &[Project]) -> anyhow::Result<()> {
        if projects.is_empty() {
            writeln!(out, "No projects.")?;
            return Ok(());
        }
        let rows = projects
            .iter()
            .map(|p| {
                vec![
                    self.swatch(&p.name, &p.color),
                    p.color.clone(),
                    p.last_used_at
                        .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default(),
                ]
            })
            .collect();
        write_table(&mut out, headers(&["Project", "Color", "Last used"]), rows)
    }

    pub fn write_priorities<W: Write>(
        &self,
        mut out: W,
        priorities: &[Priority],
    ) -> anyhow::Result<()> {
        let rows = priorities
            .iter()
            .map(|p| {
                vec![
                    self.swatch(&p.name, &p.color),
                    p.level.to_string(),
                    p.color.clone(),
                ]
            })
            .collect();
        write_table(&mut out, headers(&["Priority", "Level", "Color"]), rows)
    }

    pub fn write_settings<W: Write>(&self, mut out: W, settings: &Settings) -> anyhow::Result<()> {
        let on_off = |v: bool| if v { "on" } else { "off" }.to_string();
        let rows = vec![
            vec!["confetti_enabled".to_string(), on_off(settings.confetti_enabled)],
            vec!["sound_enabled".to_string(), on_off(settings.sound_enabled)],
            vec!["show_completed".to_string(), on_off(settings.show_completed)],
            vec!["show_history".to_string(), on_off(settings.show_history)],
            vec!["sort_by_priority".to_string(), on_off(settings.sort_by_priority)],
        ];
        write_table(&mut out, headers(&["Setting", "Value"]), rows)
    }

    fn completed_rows(
        &self,
        tasks: &[Task],
        boundary: &DayBoundary,
        fmt: &str,
    ) -> Vec<Vec<String>> {
        tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(&short_id(task.id), "33"),
                    task.completed_at
                        .map(|ts| boundary.format_local(ts, fmt))
                        .unwrap_or_default(),
                    self.project_cell(task),
                    task.text.clone(),
                ]
            })
            .collect()
    }

    fn project_cell(&self, task: &Task) -> String {
        task.project
            .as_ref()
            .map(|p| self.swatch(&p.name, &p.color))
            .unwrap_or_default()
    }

    fn priority_cell(&self, task: &Task) -> String {
        task.priority
            .as_ref()
            .map(|p| self.swatch(&p.name, &p.color))
            .unwrap_or_default()
    }

    fn swatch(&self, text: &str, hex: &str) -> String {
        match rgb_code(hex) {
            Some(code) => self.paint(text, &code),
            None => text.to_string(),
        }
    }

    fn strike(&self, text: &str) -> String {
        if self.color {
            self.paint(text, "9")
        } else {
            format!("~{text}~")
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..SHORT_ID_LEN].to_string()
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn rgb_code(hex: &str) -> Option<String> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(digits.get(range)?, 16).ok();
    Some(format!(
        "38;2;{};{};{}",
        channel(0..2)?,
        channel(2..4)?,
        channel(4..6)?
    ))
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::record::ProjectBadge;

    fn task(text: &str) -> Task {
        Task {
            id: Uuid::new_v4(),
            text: text.to_string(),
            completed: false,
            completed_at: None,
            project_id: None,
            priority_id: None,
            user_id: Uuid::nil(),
            created_at: Utc::now(),
            project: None,
            priority: None,
        }
    }

    fn render(views: &TaskViews, pending: &HashSet<Uuid>, sections: Sections) -> String {
        let mut buf = Vec::new();
        Renderer::plain()
            .write_views(&mut buf, views, pending, sections, &DayBoundary::default())
            .expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn pending_tasks_are_struck_through() {
        let mut done = task("water plants");
        done.completed = true;
        let open = task("call mum");
        let views = TaskViews {
            active: vec![open, done.clone()],
            ..TaskViews::default()
        };

        let text = render(&views, &[done.id].into_iter().collect(), Sections::all());

        assert!(text.contains("~water plants~"));
        assert!(text.contains("[x]"));
        assert!(text.contains("call mum"));
        assert!(!text.contains("~call mum~"));
    }

    #[test]
    fn hidden_sections_are_omitted() {
        let views = TaskViews::default();

        let text = render(
            &views,
            &HashSet::new(),
            Sections {
                today: true,
                history: false,
            },
        );

        assert!(text.contains("Today's Completed (0)"));
        assert!(!text.contains("History"));
    }

    #[test]
    fn completed_time_is_shown_in_reference_timezone() {
        let mut done = task("stretch");
        done.completed = true;
        done.completed_at = Utc.with_ymd_and_hms(2026, 7, 1, 6, 30, 0).single();
        done.project = Some(ProjectBadge {
            name: "Health".to_string(),
            color: "#10b981".to_string(),
        });
        let views = TaskViews {
            today: vec![done],
            ..TaskViews::default()
        };

        let text = render(&views, &HashSet::new(), Sections::all());

        assert!(text.contains("08:30"), "{text}");
        assert!(text.contains("Health"));
    }

    #[test]
    fn columns_align_on_display_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            headers(&["A", "B"]),
            vec![
                vec!["日本".to_string(), "x".to_string()],
                vec!["ab".to_string(), "y".to_string()],
            ],
        )
        .expect("table");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[2], "日本 x ");
        assert_eq!(lines[3], "ab   y ");
    }

    #[test]
    fn hex_colors_become_truecolor_codes() {
        assert_eq!(rgb_code("#10b981").as_deref(), Some("38;2;16;185;129"));
        assert_eq!(rgb_code("teal"), None);
    }
}
