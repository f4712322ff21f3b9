use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::api::TaskPage;
use crate::columns::ColumnWidths;
use crate::config::Config;
use crate::grouping::Group;
use crate::notice::{Notice, NoticeLevel};
use crate::task::{Task, TaskPriority, TaskStatus};

const MAX_TEXT_WIDTH: usize = 40;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
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
            tz: cfg.timezone(),
        })
    }

    pub fn plain(tz: Tz) -> Self {
        Self { color: false, tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn format_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.tz).format("%d.%m.%Y %H:%M").to_string()
    }

    fn format_date(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.tz).format("%d.%m.%Y").to_string()
    }

    /// Prints groups one after another. A collapsed group shows only its
    /// heading; the compact view drops the address and created columns.
    #[tracing::instrument(skip_all, fields(groups = groups.len()))]
    pub fn print_groups<W: Write, F: Fn(&str) -> bool>(
        &self,
        out: &mut W,
        groups: &[Group],
        is_collapsed: F,
        compact: bool,
        selection: &std::collections::BTreeSet<i64>,
    ) -> anyhow::Result<()> {
        for group in groups {
            if !group.label.is_empty() {
                let marker = if is_collapsed(&group.key) { "▸" } else { "▾" };
                let heading = format!("{marker} {} ({})", group.label, group.tasks.len());
                writeln!(out, "{}", self.paint(&heading, "1"))?;
                if is_collapsed(&group.key) {
                    continue;
                }
            }
            self.print_task_table(out, &group.tasks, compact, selection)?;
            writeln!(out)?;
        }
        Ok(())
    }

    pub fn print_task_table<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        compact: bool,
        selection: &std::collections::BTreeSet<i64>,
    ) -> anyhow::Result<()> {
        let mut headers = vec!["", "ID", "Number", "Title", "Status", "Priority", "Assignee", "Planned"];
        if !compact {
            headers.extend(["Address", "Created"]);
        }

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mark = if selection.contains(&task.id) { "*" } else { "" };
            let mut row = vec![
                mark.to_string(),
                self.paint(&task.id.to_string(), "33"),
                task.number.clone().unwrap_or_default(),
                truncate(&task.title, MAX_TEXT_WIDTH),
                self.paint(task.status.label(), status_color(&task.status)),
                self.paint(task.priority.label(), priority_color(&task.priority)),
                task.assignee_name.clone().unwrap_or_default(),
                task.planned_date
                    .map(|at| self.format_date(at))
                    .unwrap_or_default(),
            ];
            if !compact {
                row.push(truncate(&task.address, MAX_TEXT_WIDTH));
                row.push(self.format_time(task.created_at));
            }
            rows.push(row);
        }

        write_table(out, headers.into_iter().map(str::to_string).collect(), rows)
    }

    pub fn print_page_footer<W: Write>(&self, out: &mut W, page: &TaskPage) -> anyhow::Result<()> {
        writeln!(
            out,
            "page {} of {}, {} task(s) total",
            page.page,
            page.pages.max(1),
            page.total
        )?;
        Ok(())
    }

    pub fn print_columns<W: Write>(&self, out: &mut W, widths: &ColumnWidths) -> anyhow::Result<()> {
        let rows = widths
            .iter()
            .map(|(key, width)| vec![key.to_string(), width.to_string()])
            .collect();
        write_table(out, vec!["Column".to_string(), "Width".to_string()], rows)
    }

    pub fn print_notice<W: Write>(&self, out: &mut W, notice: &Notice) -> anyhow::Result<()> {
        let code = match notice.level {
            NoticeLevel::Success => "32",
            NoticeLevel::Warning => "33",
            NoticeLevel::Error => "31",
        };
        writeln!(out, "{}", self.paint(&notice.text, code))?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || code.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn status_color(status: &TaskStatus) -> &'static str {
    match status {
        TaskStatus::New => "36",
        TaskStatus::InProgress => "34",
        TaskStatus::Done => "32",
        TaskStatus::Cancelled => "90",
        TaskStatus::Unrecognized(_) => "",
    }
}

fn priority_color(priority: &TaskPriority) -> &'static str {
    match priority {
        TaskPriority::Emergency => "31",
        TaskPriority::Urgent => "33",
        _ => "",
    }
}

fn truncate(text: &str, max: usize) -> String {
    let single_line = text.replace(['\r', '\n'], " ");
    if UnicodeWidthStr::width(single_line.as_str()) <= max {
        return single_line;
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in single_line.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > max {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
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
        for (idx, cell) in row.iter().enumerate().take(column_count) {
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
        for (idx, width) in widths.iter().enumerate() {
            let cell = row.get(idx).map(String::as_str).unwrap_or("");
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
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
