use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::api::TaskBackend;
use crate::bulk::{BulkAction, parse_planned_date};
use crate::cli::{BulkCommand, ColumnsCommand, Command, ListArgs};
use crate::config::Config;
use crate::controller::TaskListController;
use crate::csv::import_template;
use crate::filters::{AddressFilter, FilterChange, SystemClock};
use crate::http::HttpBackend;
use crate::notice::{Notice, NoticeLevel};
use crate::query::QueryState;
use crate::render::Renderer;
use crate::storage::{FileStorage, KeyValueStorage};
use crate::task::{TaskPriority, TaskStatus};

/// Wires the HTTP backend and on-disk state into a controller and runs
/// one command against it.
#[instrument(skip(cfg, data_dir, renderer))]
pub async fn dispatch(
    command: Command,
    cfg: &Config,
    data_dir: &Path,
    renderer: &Renderer,
) -> anyhow::Result<()> {
    let backend = HttpBackend::from_config(cfg)?;
    let storage = FileStorage::open(data_dir)
        .with_context(|| format!("failed to open state in {}", data_dir.display()))?;
    let mut controller = TaskListController::new(
        backend,
        storage,
        cfg.page_size()?,
        cfg.search_debounce()?,
        Arc::new(SystemClock),
    );

    let mut stdout = io::stdout().lock();
    execute(&mut controller, command, renderer, &mut stdout).await
}

pub async fn execute<B, S, W>(
    controller: &mut TaskListController<B, S>,
    command: Command,
    renderer: &Renderer,
    out: &mut W,
) -> anyhow::Result<()>
where
    B: TaskBackend,
    S: KeyValueStorage,
    W: Write,
{
    match command {
        Command::List {
            filters,
            group_by,
            collapse,
        } => {
            let state = open_list(controller, &filters).await?;
            controller.set_group_by(group_by);
            for key in &collapse {
                controller.toggle_group(key);
            }

            renderer.print_groups(
                out,
                &controller.groups(),
                |key| controller.is_group_collapsed(key),
                controller.settings().compact_view,
                controller.selection(),
            )?;
            if let Some(page) = state.page() {
                renderer.print_page_footer(out, page)?;
            }
            if let Some(location) = controller.location().filter(|q| !q.is_empty()) {
                writeln!(out, "location: ?{location}")?;
            }
            Ok(())
        }
        Command::Export {
            filters,
            ids,
            output,
        } => {
            open_list(controller, &filters).await?;
            if !ids.is_empty() {
                let visible: Vec<i64> = controller.visible().iter().map(|task| task.id).collect();
                for id in ids {
                    if visible.contains(&id) {
                        controller.select(id, true);
                    } else {
                        warn!(id, "task is not on the current page; not exported");
                    }
                }
                if controller.selection().is_empty() {
                    bail!("none of the requested tasks are on the current page");
                }
            }

            let count = if controller.selection().is_empty() {
                controller.visible().len()
            } else {
                controller.selection().len()
            };
            let text = controller.export_selected(&renderer.timezone());
            write_output(output.as_deref(), &text, out)?;
            info!(count, "exported tasks");
            Ok(())
        }
        Command::Import { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            controller.load_layout().await;
            let outcome = controller.import_csv(&text).await;
            report(controller, renderer, out)?;
            outcome.map(|_| ()).map_err(anyhow::Error::new)
        }
        Command::Template { output } => write_output(output.as_deref(), &import_template(), out),
        Command::Bulk {
            filters,
            ids,
            all,
            action,
        } => {
            let action = bulk_action(action)?;
            open_list(controller, &filters).await?;
            if all {
                controller.select_all();
            }
            for id in ids {
                controller.select(id, true);
            }
            debug!(selected = controller.selection().len(), "selection ready");

            let outcome = controller.run_bulk(action).await;
            report(controller, renderer, out)?;
            outcome.map(|_| ()).map_err(anyhow::Error::new)
        }
        Command::Columns { action } => {
            controller.load_layout().await;
            match action {
                ColumnsCommand::Show => {}
                ColumnsCommand::Set { column, width } => {
                    if !controller.settings().resizable_columns {
                        bail!("column resizing is disabled in the interface settings");
                    }
                    if controller.resize_column(&column, width).is_none() {
                        bail!("unknown column: {column}");
                    }
                }
                ColumnsCommand::Reset => controller.reset_columns(),
            }
            renderer.print_columns(out, controller.column_widths())
        }
    }
}

/// Mounts the controller with command-line filters layered over the
/// restored location. One fetch, one stored location.
async fn open_list<B, S>(
    controller: &mut TaskListController<B, S>,
    args: &ListArgs,
) -> anyhow::Result<QueryState>
where
    B: TaskBackend,
    S: KeyValueStorage,
{
    let changes = list_changes(args)?;
    match controller.mount_with(args.location.as_deref(), changes).await {
        QueryState::Failed(err) => {
            Err(anyhow::Error::new(err).context("could not load tasks"))
        }
        state => Ok(state),
    }
}

fn list_changes(args: &ListArgs) -> anyhow::Result<Vec<FilterChange>> {
    let mut changes = Vec::new();
    if args.clear {
        changes.push(FilterChange::Clear);
    }
    if let Some(search) = &args.search {
        changes.push(FilterChange::Search(search.clone()));
    }
    if let Some(raw) = &args.status {
        let status = TaskStatus::normalize(raw);
        if !status.is_known() {
            bail!("unknown status: {raw}");
        }
        changes.push(FilterChange::Status(Some(status)));
    }
    if let Some(raw) = &args.priority {
        let priority = TaskPriority::normalize(raw);
        if !priority.is_known() {
            bail!("unknown priority: {raw}");
        }
        changes.push(FilterChange::Priority(Some(priority)));
    }
    if let Some(id) = args.assignee {
        changes.push(FilterChange::Assignee(Some(id)));
    }
    if let Some(id) = args.address {
        changes.push(FilterChange::Address(Some(AddressFilter { id, title: None })));
    }
    if let Some(page) = args.page {
        changes.push(FilterChange::Page(page));
    }

    Ok(changes)
}

fn bulk_action(command: BulkCommand) -> anyhow::Result<BulkAction> {
    let action = match command {
        BulkCommand::Status { status } => BulkAction::SetStatus(TaskStatus::normalize(&status)),
        BulkCommand::Assign { user_id, none } => {
            if none {
                BulkAction::SetAssignee(None)
            } else {
                BulkAction::SetAssignee(Some(
                    user_id.ok_or_else(|| anyhow!("pass a user id or --none"))?,
                ))
            }
        }
        BulkCommand::Priority { priority } => {
            BulkAction::SetPriority(TaskPriority::normalize(&priority))
        }
        BulkCommand::PlannedDate { date } => BulkAction::SetPlannedDate(
            date.as_deref().map(parse_planned_date).transpose()?,
        ),
        BulkCommand::Delete => BulkAction::Delete,
    };
    Ok(action)
}

/// Prints the pending notice to stderr. An error-level notice fails the
/// command.
fn report<B, S, W>(
    controller: &mut TaskListController<B, S>,
    renderer: &Renderer,
    out: &mut W,
) -> anyhow::Result<()>
where
    B: TaskBackend,
    S: KeyValueStorage,
    W: Write,
{
    let Some(notice) = controller.take_notice() else {
        return Ok(());
    };
    renderer.print_notice(&mut io::stderr().lock(), &notice)?;
    if let Some(page) = controller.state().as_ref().and_then(QueryState::page) {
        renderer.print_page_footer(out, page)?;
    }
    fail_on_error(notice)
}

fn fail_on_error(notice: Notice) -> anyhow::Result<()> {
    match notice.level {
        NoticeLevel::Error => Err(anyhow!(notice.text)),
        NoticeLevel::Success | NoticeLevel::Warning => Ok(()),
    }
}

fn write_output<W: Write>(path: Option<&Path>, text: &str, out: &mut W) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
            info!(file = %path.display(), bytes = text.len(), "wrote file");
        }
        None => out.write_all(text.as_bytes())?,
    }
    Ok(())
}
