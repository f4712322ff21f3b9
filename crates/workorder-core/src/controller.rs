//! The task list screen as an explicit state owner.
//!
//! Every user intent goes through one method here. Filter changes are
//! reduced purely, then the location, selection and query are brought in
//! line. Persistence (location, column widths) is a side channel through
//! [`KeyValueStorage`] and never blocks the list.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};
use workorder_shared::InterfaceSettings;

use crate::api::TaskBackend;
use crate::bulk::{BulkAction, BulkOutcome, ValidationError, execute_bulk};
use crate::columns::{ColumnLayoutStore, ColumnWidths};
use crate::csv::{ImportOutcome, export_tasks, import_tasks, plan_import};
use crate::filters::{Clock, FilterChange, SearchInput, TaskFilters};
use crate::grouping::{GroupBy, Group, GroupingState};
use crate::location::{LocationSync, serialize_location};
use crate::notice::Notice;
use crate::query::{QueryState, TaskQueryExecutor};
use crate::storage::KeyValueStorage;
use crate::task::Task;

pub const LOCATION_KEY: &str = "tasks.location";

pub struct TaskListController<B, S> {
    backend: B,
    executor: TaskQueryExecutor,
    filters: TaskFilters,
    search: SearchInput,
    selection: BTreeSet<i64>,
    grouping: GroupingState,
    location: LocationSync,
    columns: ColumnLayoutStore<S>,
    settings: InterfaceSettings,
    clock: Arc<dyn Clock>,
    notice: Option<Notice>,
}

impl<B: TaskBackend, S: KeyValueStorage> TaskListController<B, S> {
    pub fn new(
        backend: B,
        storage: S,
        page_size: u32,
        debounce: chrono::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            executor: TaskQueryExecutor::new(),
            filters: TaskFilters::new(page_size),
            search: SearchInput::new(debounce),
            selection: BTreeSet::new(),
            grouping: GroupingState::default(),
            location: LocationSync::default(),
            columns: ColumnLayoutStore::new(storage),
            settings: InterfaceSettings::default(),
            clock,
            notice: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn executor(&self) -> &TaskQueryExecutor {
        &self.executor
    }

    pub fn filters(&self) -> &TaskFilters {
        &self.filters
    }

    pub fn search_draft(&self) -> &str {
        self.search.draft()
    }

    pub fn selection(&self) -> &BTreeSet<i64> {
        &self.selection
    }

    pub fn settings(&self) -> InterfaceSettings {
        self.settings
    }

    pub fn column_widths(&self) -> &ColumnWidths {
        self.columns.widths()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.current()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    /// Loads persisted layout and interface settings, restores filters
    /// from `initial_query` (or the last stored location), then fetches.
    pub async fn mount(&mut self, initial_query: Option<&str>) -> QueryState {
        self.mount_with(initial_query, Vec::new()).await
    }

    /// Like [`mount`](Self::mount), with `changes` reduced over the
    /// restored filters before the single fetch.
    #[instrument(skip(self))]
    pub async fn mount_with(
        &mut self,
        initial_query: Option<&str>,
        changes: Vec<FilterChange>,
    ) -> QueryState {
        self.load_layout().await;

        let stored = match initial_query {
            Some(query) => Some(query.to_string()),
            None => self
                .columns
                .storage()
                .get_item(LOCATION_KEY)
                .unwrap_or_else(|err| {
                    warn!(error = %err, "could not read stored location");
                    None
                }),
        };
        if let Some(query) = stored
            && let Some(filters) = self.location.observe(&query, self.filters.page_size)
        {
            debug!(query = %query, "restoring filters from location");
            self.search.reset_to(&filters.search);
            self.filters = filters;
        }
        for change in changes {
            self.sync_search(&change);
            self.filters = self.filters.reduce(change);
        }
        self.location.write(&self.filters);
        self.store_location();

        self.refresh().await
    }

    /// Column widths and interface settings, without touching the list.
    pub async fn load_layout(&mut self) {
        self.columns.load();
        self.settings = match self.backend.interface_settings().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = %err, "interface settings unavailable; using defaults");
                InterfaceSettings::default()
            }
        };
    }

    /// The only way filters change. A change that reduces to the current
    /// state is a no-op and keeps the selection.
    #[instrument(skip(self))]
    pub async fn apply(&mut self, change: FilterChange) -> QueryState {
        self.sync_search(&change);

        let next = self.filters.reduce(change);
        if next == self.filters {
            return self.state().unwrap_or(QueryState::Loading);
        }
        self.adopt(next);
        self.refresh().await
    }

    fn sync_search(&mut self, change: &FilterChange) {
        match change {
            FilterChange::Search(text) => self.search.reset_to(text),
            FilterChange::Clear => self.search.reset_to(""),
            _ => {}
        }
    }

    fn adopt(&mut self, filters: TaskFilters) {
        if !self.selection.is_empty() {
            debug!(count = self.selection.len(), "clearing selection on filter change");
        }
        self.selection.clear();
        self.filters = filters;
        self.persist_location();
    }

    fn persist_location(&mut self) {
        if let Some(query) = self.location.write(&self.filters)
            && let Err(err) = self.columns.storage().set_item(LOCATION_KEY, &query)
        {
            warn!(error = %err, "could not persist location");
        }
    }

    /// Stores the canonical form of the current filters, the same string
    /// [`LocationSync`] compares echoes against.
    fn store_location(&self) {
        let canonical = serialize_location(&self.filters);
        if let Err(err) = self.columns.storage().set_item(LOCATION_KEY, &canonical) {
            warn!(error = %err, "could not persist location");
        }
    }

    pub fn type_search(&mut self, text: &str) {
        self.search.edit(text, self.clock.now());
    }

    /// Commits the search draft once the debounce window has passed.
    pub async fn tick(&mut self) -> Option<QueryState> {
        let value = self.search.poll(self.clock.now())?;
        Some(self.apply(FilterChange::Search(value)).await)
    }

    pub async fn commit_search(&mut self) -> Option<QueryState> {
        let value = self.search.commit()?;
        Some(self.apply(FilterChange::Search(value)).await)
    }

    /// Back/forward navigation. Our own writes echo back and are ignored.
    pub async fn on_location_change(&mut self, query: &str) -> Option<QueryState> {
        let filters = self.location.observe(query, self.filters.page_size)?;
        info!(query, "location changed externally");
        self.search.reset_to(&filters.search);
        self.selection.clear();
        self.filters = filters;
        self.store_location();
        Some(self.refresh().await)
    }

    pub async fn refresh(&mut self) -> QueryState {
        let state = self.reload().await;
        if let QueryState::Failed(err) = &state {
            self.notice = Some(Notice::for_query_failure(err));
        }
        state
    }

    async fn reload(&self) -> QueryState {
        self.executor.fetch(&self.backend, &self.filters).await
    }

    /// Re-fetches after a mutation. A failed reload is folded into the
    /// pending batch notice instead of replacing it.
    async fn reload_after_mutation(&mut self) {
        self.executor.invalidate();
        if let QueryState::Failed(err) = self.reload().await {
            warn!(error = %err, "list reload after mutation failed");
            self.notice = self
                .notice
                .take()
                .map(|notice| notice.with_reload_failure(&err));
        }
    }

    pub async fn retry(&mut self) -> QueryState {
        self.notice = None;
        self.refresh().await
    }

    pub fn state(&self) -> Option<QueryState> {
        self.executor.state_for(&self.filters)
    }

    /// Tasks of the current page, or nothing while loading or failed.
    pub fn visible(&self) -> Vec<Task> {
        self.state()
            .and_then(|state| state.page().map(|page| page.items.clone()))
            .unwrap_or_default()
    }

    pub fn groups(&self) -> Vec<Group> {
        self.grouping.apply(&self.visible())
    }

    pub fn group_by(&self) -> GroupBy {
        self.grouping.group_by()
    }

    pub fn set_group_by(&mut self, by: GroupBy) {
        self.grouping.set_group_by(by);
    }

    pub fn toggle_group(&mut self, key: &str) {
        self.grouping.toggle(key);
    }

    pub fn is_group_collapsed(&self, key: &str) -> bool {
        self.grouping.is_collapsed(key)
    }

    pub fn select(&mut self, id: i64, selected: bool) {
        if selected {
            self.selection.insert(id);
        } else {
            self.selection.remove(&id);
        }
    }

    pub fn toggle(&mut self, id: i64) {
        if !self.selection.remove(&id) {
            self.selection.insert(id);
        }
    }

    pub fn select_all(&mut self) {
        self.selection = self.visible().iter().map(|task| task.id).collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Runs `action` over the selection. The selection survives a batch in
    /// which nothing succeeded so the user can retry it.
    #[instrument(skip(self), fields(selected = self.selection.len()))]
    pub async fn run_bulk(&mut self, action: BulkAction) -> Result<BulkOutcome, ValidationError> {
        let snapshot = self.visible();
        let outcome = match execute_bulk(&self.backend, &snapshot, &self.selection, &action).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.notice = Some(Notice::for_validation(&err));
                return Err(err);
            }
        };

        self.notice = Some(Notice::for_bulk(&outcome));
        if outcome.succeeded > 0 {
            self.selection.clear();
            self.reload_after_mutation().await;
        }
        Ok(outcome)
    }

    #[instrument(skip(self, text))]
    pub async fn import_csv(&mut self, text: &str) -> Result<ImportOutcome, ValidationError> {
        let plan = match plan_import(text) {
            Ok(plan) => plan,
            Err(err) => {
                self.notice = Some(Notice::for_validation(&err));
                return Err(err);
            }
        };

        let outcome = import_tasks(&self.backend, &plan).await;
        self.notice = Some(Notice::for_import(&outcome));
        if outcome.succeeded > 0 {
            self.reload_after_mutation().await;
        }
        Ok(outcome)
    }

    /// Selected rows of the current page, or the whole page when nothing
    /// is selected.
    pub fn export_selected(&self, tz: &Tz) -> String {
        let visible = self.visible();
        let tasks: Vec<Task> = if self.selection.is_empty() {
            visible
        } else {
            visible
                .into_iter()
                .filter(|task| self.selection.contains(&task.id))
                .collect()
        };
        export_tasks(&tasks, tz)
    }

    pub fn resize_column(&mut self, key: &str, width: u32) -> Option<u32> {
        self.columns.resize(key, width, self.settings.resizable_columns)
    }

    pub fn reset_columns(&mut self) {
        self.columns.reset();
    }
}
