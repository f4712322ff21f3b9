use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use workorder_core::api::{ApiError, TaskBackend};
use workorder_core::bulk::{BulkAction, BulkOutcome};
use workorder_core::controller::{LOCATION_KEY, TaskListController};
use workorder_core::csv::{ImportOutcome, plan_import};
use workorder_core::filters::{FilterChange, ManualClock, SystemClock, TaskFilters};
use workorder_core::grouping::GroupBy;
use workorder_core::notice::NoticeLevel;
use workorder_core::query::{QueryState, TaskQueryExecutor};
use workorder_core::storage::{FileStorage, KeyValueStorage, MemoryStorage};
use workorder_core::task::{TaskPriority, TaskStatus};
use workorder_shared::{
    InterfaceSettings, PaginatedResponse, PlannedDateUpdate, TaskAssignRequest, TaskCreate,
    TaskDto, TaskPatch, TaskStatusUpdate, TasksListArgs, WireValue,
};

fn dto(id: i64, status: &str, title: &str, address: &str) -> TaskDto {
    TaskDto {
        id,
        task_number: Some(format!("WO-{id:04}")),
        title: title.to_string(),
        raw_address: address.to_string(),
        description: String::new(),
        customer_name: None,
        customer_phone: None,
        lat: None,
        lon: None,
        status: WireValue::Text(status.to_string()),
        priority: WireValue::Int(2),
        created_at: "2026-01-10T09:00:00".to_string(),
        updated_at: "2026-01-10T09:00:00".to_string(),
        planned_date: None,
        completed_at: None,
        assigned_user_id: None,
        assigned_user_name: None,
        comments_count: 0,
    }
}

/// In-memory backend that records every call.
#[derive(Default)]
struct MockBackend {
    tasks: Mutex<Vec<TaskDto>>,
    calls: Mutex<Vec<String>>,
    fail_ids: Mutex<BTreeSet<i64>>,
    fail_list: Mutex<bool>,
    /// Scripted list responses: yields before answering, then these items.
    list_script: Mutex<VecDeque<(usize, Vec<TaskDto>)>>,
    settings: Mutex<Option<InterfaceSettings>>,
}

impl MockBackend {
    fn with_tasks(tasks: Vec<TaskDto>) -> Self {
        let backend = Self::default();
        *backend.tasks.lock() = tasks;
        *backend.settings.lock() = Some(InterfaceSettings {
            resizable_columns: true,
            compact_view: false,
        });
        backend
    }

    fn five_tasks() -> Self {
        Self::with_tasks(vec![
            dto(1, "NEW", "Leak", "Nevsky 1"),
            dto(2, "NEW", "Lamp", "Nevsky 2"),
            dto(3, "DONE", "Door", "Ligovsky 3"),
            dto(4, "DONE", "Lift", "Ligovsky 4"),
            dto(5, "IN_PROGRESS", "Pipe", "Sadovaya 5"),
        ])
    }

    fn list_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with("list"))
            .cloned()
            .collect()
    }

    fn mutation(&self, call: String, id: i64) -> Result<(), ApiError> {
        self.calls.lock().push(call);
        if self.fail_ids.lock().contains(&id) {
            return Err(ApiError::Status {
                status: 409,
                detail: format!("task {id} is locked"),
            });
        }
        Ok(())
    }

    fn status_of(&self, id: i64) -> Option<String> {
        self.tasks
            .lock()
            .iter()
            .find(|task| task.id == id)
            .map(|task| task.status.as_text())
    }
}

impl TaskBackend for MockBackend {
    async fn list_tasks(
        &self,
        args: &TasksListArgs,
    ) -> Result<PaginatedResponse<TaskDto>, ApiError> {
        let query = workorder_core::http::encode_query(&args.query_pairs());
        self.calls.lock().push(format!("list?{query}"));

        let scripted = self.list_script.lock().pop_front();
        if let Some((yields, items)) = scripted {
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
            let total = items.len() as u64;
            return Ok(PaginatedResponse {
                items,
                total,
                page: args.page,
                size: args.size,
                pages: 1,
            });
        }

        if *self.fail_list.lock() {
            return Err(ApiError::Transport("connection refused".to_string()));
        }

        let matching: Vec<TaskDto> = self
            .tasks
            .lock()
            .iter()
            .filter(|task| {
                args.status
                    .as_ref()
                    .is_none_or(|status| task.status.as_text() == *status)
            })
            .filter(|task| {
                args.search
                    .as_ref()
                    .is_none_or(|search| task.title.contains(search.as_str()))
            })
            .cloned()
            .collect();
        let size = args.size.max(1) as usize;
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((args.page.max(1) as usize - 1) * size)
            .take(size)
            .collect();
        Ok(PaginatedResponse {
            items,
            total: total as u64,
            page: args.page,
            size: args.size,
            pages: total.div_ceil(size) as u32,
        })
    }

    async fn update_status(&self, id: i64, body: &TaskStatusUpdate) -> Result<(), ApiError> {
        tokio::task::yield_now().await;
        self.mutation(format!("status {id} {}", body.status), id)?;
        if let Some(task) = self.tasks.lock().iter_mut().find(|task| task.id == id) {
            task.status = WireValue::Text(body.status.clone());
        }
        Ok(())
    }

    async fn assign_task(&self, id: i64, body: &TaskAssignRequest) -> Result<(), ApiError> {
        self.mutation(format!("assign {id} {:?}", body.assigned_user_id), id)
    }

    async fn update_planned_date(
        &self,
        id: i64,
        body: &PlannedDateUpdate,
    ) -> Result<(), ApiError> {
        self.mutation(format!("planned {id} {:?}", body.planned_date), id)
    }

    async fn patch_task(&self, id: i64, patch: &TaskPatch) -> Result<(), ApiError> {
        self.mutation(format!("patch {id} {:?}", patch.priority), id)
    }

    async fn delete_task(&self, id: i64) -> Result<(), ApiError> {
        self.mutation(format!("delete {id}"), id)?;
        self.tasks.lock().retain(|task| task.id != id);
        Ok(())
    }

    async fn create_task(&self, body: &TaskCreate) -> Result<(), ApiError> {
        self.calls.lock().push(format!("create {}", body.title));
        let mut tasks = self.tasks.lock();
        let id = tasks.iter().map(|task| task.id).max().unwrap_or(0) + 1;
        let mut created = dto(id, "NEW", &body.title, &body.address);
        created.priority = WireValue::Int(i64::from(body.priority.unwrap_or(1)));
        tasks.push(created);
        Ok(())
    }

    async fn interface_settings(&self) -> Result<InterfaceSettings, ApiError> {
        (*self.settings.lock()).ok_or_else(|| ApiError::Status {
            status: 404,
            detail: "Not Found".to_string(),
        })
    }
}

fn controller(backend: MockBackend) -> TaskListController<MockBackend, MemoryStorage> {
    TaskListController::new(
        backend,
        MemoryStorage::new(),
        20,
        Duration::milliseconds(700),
        Arc::new(SystemClock),
    )
}

#[tokio::test]
async fn bulk_status_attempts_only_allowed_transitions() {
    let mut ctl = controller(MockBackend::five_tasks());
    let state = ctl.mount(None).await;
    assert_eq!(state.page().map(|page| page.items.len()), Some(5));

    ctl.select_all();
    let lists_before = ctl.backend().list_calls().len();
    let outcome = ctl
        .run_bulk(BulkAction::SetStatus(TaskStatus::InProgress))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        BulkOutcome {
            succeeded: 2,
            failed: 0,
            skipped: 3
        }
    );
    let notice = ctl.notice().unwrap();
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert_eq!(notice.text, "Updated 2 of 5, 3 skipped");

    assert!(ctl.selection().is_empty());
    assert_eq!(ctl.backend().list_calls().len(), lists_before + 1);
    assert_eq!(ctl.backend().status_of(1).as_deref(), Some("IN_PROGRESS"));
    assert_eq!(ctl.backend().status_of(3).as_deref(), Some("DONE"));
    assert_eq!(
        ctl.visible().iter().filter(|t| t.status == TaskStatus::InProgress).count(),
        3
    );
}

#[tokio::test]
async fn batch_counts_survive_a_failed_reload() {
    let mut ctl = controller(MockBackend::five_tasks());
    ctl.mount(None).await;
    ctl.select(1, true);
    ctl.select(2, true);
    *ctl.backend().fail_list.lock() = true;

    let outcome = ctl
        .run_bulk(BulkAction::SetStatus(TaskStatus::InProgress))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        BulkOutcome {
            succeeded: 2,
            failed: 0,
            skipped: 0
        }
    );
    let notice = ctl.take_notice().unwrap();
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert_eq!(
        notice.text,
        "Updated 2 of 2; list not refreshed: request failed: connection refused"
    );
    assert!(ctl.selection().is_empty());

    let outcome = ctl.import_csv("title,address\nLeak,Nevsky 9\n").await.unwrap();
    assert_eq!(outcome.succeeded, 1);
    let notice = ctl.notice().unwrap();
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert!(notice.text.starts_with("Imported 1; list not refreshed: "));
}

#[tokio::test]
async fn failed_items_do_not_cancel_siblings() {
    let backend = MockBackend::five_tasks();
    backend.fail_ids.lock().insert(2);
    let mut ctl = controller(backend);
    ctl.mount(None).await;

    for id in [1, 2, 5] {
        ctl.select(id, true);
    }
    let outcome = ctl.run_bulk(BulkAction::Delete).await.unwrap();
    assert_eq!(
        outcome,
        BulkOutcome {
            succeeded: 2,
            failed: 1,
            skipped: 0
        }
    );
    let ids: Vec<i64> = ctl.visible().iter().map(|task| task.id).collect();
    assert_eq!(ids, vec![2, 3, 4]);
}

#[tokio::test]
async fn all_failed_batch_keeps_selection_for_retry() {
    let backend = MockBackend::five_tasks();
    backend.fail_ids.lock().extend([1, 2]);
    let mut ctl = controller(backend);
    ctl.mount(None).await;

    ctl.select(1, true);
    ctl.select(2, true);
    let lists_before = ctl.backend().list_calls().len();
    let outcome = ctl
        .run_bulk(BulkAction::SetPriority(TaskPriority::Urgent))
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 0);
    assert_eq!(outcome.failed, 2);
    assert_eq!(ctl.notice().map(|n| n.level), Some(NoticeLevel::Error));
    assert_eq!(ctl.selection(), &BTreeSet::from([1, 2]));
    assert_eq!(ctl.backend().list_calls().len(), lists_before);
}

#[tokio::test]
async fn empty_selection_is_rejected_before_any_request() {
    let mut ctl = controller(MockBackend::five_tasks());
    ctl.mount(None).await;
    let calls_before = ctl.backend().calls.lock().len();

    assert!(ctl.run_bulk(BulkAction::Delete).await.is_err());
    assert_eq!(ctl.backend().calls.lock().len(), calls_before);
    assert_eq!(ctl.notice().map(|n| n.level), Some(NoticeLevel::Warning));
}

#[tokio::test]
async fn import_skips_rows_without_address() {
    let mut ctl = controller(MockBackend::with_tasks(vec![]));
    ctl.mount(None).await;

    let text = "Название;Адрес;Приоритет\nТечь;Невский 1;срочная\nБез адреса;;1\nЛампа;Лиговский 2;\n";
    let outcome = ctl.import_csv(text).await.unwrap();
    assert_eq!(
        outcome,
        ImportOutcome {
            succeeded: 2,
            failed: 0,
            skipped: 1
        }
    );
    assert_eq!(
        ctl.notice().map(|n| n.text.as_str()),
        Some("Imported 2, not imported 1 (0 failed, 1 skipped)")
    );
    let titles: Vec<String> = ctl.visible().into_iter().map(|task| task.title).collect();
    assert_eq!(titles, vec!["Течь".to_string(), "Лампа".to_string()]);
    assert_eq!(ctl.visible()[0].priority, TaskPriority::Urgent);
}

#[tokio::test]
async fn export_of_selection_reimports_cleanly() {
    let backend = MockBackend::with_tasks(vec![
        dto(1, "NEW", "Replace \"main\" valve, now", "СПб, Невский пр., 1"),
        dto(2, "NEW", "Not exported", "Nowhere"),
        dto(3, "DONE", "Two\nlines", "Лиговский 50; кв. 3"),
    ]);
    let mut ctl = controller(backend);
    ctl.mount(None).await;
    ctl.select(1, true);
    ctl.select(3, true);

    let exported = ctl.export_selected(&chrono_tz::Europe::Moscow);
    let plan = plan_import(&exported).unwrap();
    let pairs: Vec<(String, String)> = plan
        .payloads
        .into_iter()
        .map(|(_, payload)| (payload.title, payload.address))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (
                "Replace \"main\" valve, now".to_string(),
                "СПб, Невский пр., 1".to_string()
            ),
            ("Two\nlines".to_string(), "Лиговский 50; кв. 3".to_string()),
        ]
    );
}

#[tokio::test]
async fn selection_clears_on_filter_search_and_page_changes() {
    let mut ctl = controller(MockBackend::five_tasks());
    ctl.mount(None).await;

    ctl.select(1, true);
    ctl.apply(FilterChange::Status(Some(TaskStatus::New))).await;
    assert!(ctl.selection().is_empty());
    assert_eq!(ctl.visible().len(), 2);

    ctl.select(2, true);
    ctl.apply(FilterChange::Page(2)).await;
    assert!(ctl.selection().is_empty());
    assert_eq!(ctl.filters().page, 2);

    ctl.select(2, true);
    ctl.type_search("Leak");
    ctl.commit_search().await;
    assert!(ctl.selection().is_empty());
    assert_eq!(ctl.filters().page, 1);
    assert_eq!(ctl.filters().search, "Leak");

    ctl.select(1, true);
    ctl.apply(FilterChange::Search("Leak".to_string())).await;
    assert_eq!(ctl.selection(), &BTreeSet::from([1]));
}

#[tokio::test]
async fn search_waits_for_debounce_window() {
    let start = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let mut ctl = TaskListController::new(
        MockBackend::five_tasks(),
        MemoryStorage::new(),
        20,
        Duration::milliseconds(700),
        clock.clone(),
    );
    ctl.mount(None).await;
    let lists_after_mount = ctl.backend().list_calls().len();

    ctl.type_search("Li");
    clock.advance(Duration::milliseconds(300));
    ctl.type_search("Lift");
    clock.advance(Duration::milliseconds(600));
    assert!(ctl.tick().await.is_none());
    assert_eq!(ctl.backend().list_calls().len(), lists_after_mount);

    clock.advance(Duration::milliseconds(100));
    let state = ctl.tick().await.unwrap();
    assert_eq!(state.page().map(|page| page.items.len()), Some(1));
    assert_eq!(
        ctl.backend().list_calls().last().map(String::as_str),
        Some("list?search=Lift&page=1&size=20")
    );
    assert!(ctl.tick().await.is_none());
}

#[tokio::test]
async fn superseded_response_for_same_key_is_dropped() {
    let backend = MockBackend::default();
    backend
        .list_script
        .lock()
        .extend([(5, vec![dto(1, "NEW", "old", "a")]), (0, vec![dto(2, "NEW", "new", "b")])]);
    let executor = TaskQueryExecutor::new();
    let filters = TaskFilters::default();

    let (slow, fast) = futures::join!(
        executor.fetch(&backend, &filters),
        executor.fetch(&backend, &filters)
    );
    assert_eq!(slow.page().map(|p| p.items[0].id), Some(1));
    assert_eq!(fast.page().map(|p| p.items[0].id), Some(2));

    let shown = executor.state_for(&filters).unwrap();
    assert_eq!(shown.page().map(|p| p.items[0].id), Some(2));
}

#[tokio::test]
async fn late_response_for_old_filters_does_not_replace_current_view() {
    let backend = MockBackend::default();
    backend
        .list_script
        .lock()
        .extend([(5, vec![dto(1, "NEW", "old", "a")]), (0, vec![dto(2, "DONE", "new", "b")])]);
    let executor = TaskQueryExecutor::new();
    let old = TaskFilters::default().reduce(FilterChange::Status(Some(TaskStatus::New)));
    let current = TaskFilters::default().reduce(FilterChange::Status(Some(TaskStatus::Done)));

    futures::join!(executor.fetch(&backend, &old), executor.fetch(&backend, &current));

    let shown = executor.state_for(&current).unwrap();
    assert_eq!(shown.page().map(|p| p.items[0].id), Some(2));
    assert!(matches!(executor.state_for(&old), Some(QueryState::Ready(_))));
}

#[tokio::test]
async fn invalidation_discards_responses_already_in_flight() {
    let backend = MockBackend::default();
    backend
        .list_script
        .lock()
        .push_back((5, vec![dto(1, "NEW", "before delete", "a")]));
    let executor = TaskQueryExecutor::new();
    let filters = TaskFilters::default();

    let (returned, ()) = futures::join!(executor.fetch(&backend, &filters), async {
        executor.invalidate()
    });
    assert!(matches!(returned, QueryState::Ready(_)));
    assert_eq!(executor.state_for(&filters), None);

    let fresh = executor.fetch(&backend, &filters).await;
    assert_eq!(fresh.page().map(|p| p.total), Some(0));
    assert_eq!(executor.state_for(&filters), Some(fresh));
}

#[tokio::test]
async fn failed_query_offers_retry() {
    let backend = MockBackend::five_tasks();
    *backend.fail_list.lock() = true;
    let mut ctl = controller(backend);

    assert!(ctl.mount(None).await.is_failed());
    assert!(ctl.visible().is_empty());
    assert_eq!(ctl.notice().map(|n| n.level), Some(NoticeLevel::Error));

    *ctl.backend().fail_list.lock() = false;
    let state = ctl.retry().await;
    assert_eq!(state.page().map(|p| p.total), Some(5));
    assert!(ctl.notice().is_none());
}

#[tokio::test]
async fn location_is_persisted_and_restored() {
    let mut ctl = controller(MockBackend::five_tasks());
    ctl.mount(None).await;
    ctl.apply(FilterChange::Status(Some(TaskStatus::Done))).await;
    ctl.apply(FilterChange::Page(2)).await;
    assert_eq!(ctl.location(), Some("status=DONE&page=2"));

    // Our own write coming back is not a navigation.
    assert!(ctl.on_location_change("status=DONE&page=2").await.is_none());

    let persisted = {
        let mut other = controller(MockBackend::five_tasks());
        other.mount(Some("?status=DONE&page=2")).await;
        other.filters().clone()
    };
    assert_eq!(persisted.status, Some(TaskStatus::Done));
    assert_eq!(persisted.page, 2);

    let state = ctl.on_location_change("status=NEW").await.unwrap();
    assert_eq!(state.page().map(|p| p.items.len()), Some(2));
    assert_eq!(ctl.filters().status, Some(TaskStatus::New));
    assert_eq!(ctl.filters().page, 1);
}

#[tokio::test]
async fn stored_location_survives_restart() {
    let dir = tempdir().unwrap();
    {
        let mut ctl = TaskListController::new(
            MockBackend::five_tasks(),
            FileStorage::open(dir.path()).unwrap(),
            20,
            Duration::milliseconds(700),
            Arc::new(SystemClock),
        );
        ctl.mount(None).await;
        ctl.apply(FilterChange::Priority(Some(TaskPriority::Current))).await;
    }

    let storage = FileStorage::open(dir.path()).unwrap();
    assert_eq!(
        storage.get_item(LOCATION_KEY).unwrap().as_deref(),
        Some("priority=CURRENT")
    );
    let mut ctl = TaskListController::new(
        MockBackend::five_tasks(),
        storage,
        20,
        Duration::milliseconds(700),
        Arc::new(SystemClock),
    );
    ctl.mount(None).await;
    assert_eq!(ctl.filters().priority, Some(TaskPriority::Current));
    assert_eq!(ctl.visible().len(), 5);
}

#[tokio::test]
async fn startup_filters_are_folded_into_one_fetch() {
    let dir = tempdir().unwrap();
    let mut ctl = TaskListController::new(
        MockBackend::five_tasks(),
        FileStorage::open(dir.path()).unwrap(),
        20,
        Duration::milliseconds(700),
        Arc::new(SystemClock),
    );
    let state = ctl
        .mount_with(
            Some("status=DONE&page=3"),
            vec![
                FilterChange::Search("Le".to_string()),
                FilterChange::Status(Some(TaskStatus::New)),
            ],
        )
        .await;

    assert_eq!(ctl.backend().list_calls().len(), 1);
    assert_eq!(state.page().map(|p| p.items.len()), Some(1));
    assert_eq!(ctl.search_draft(), "Le");
    assert_eq!(ctl.filters().page, 1);
    assert_eq!(ctl.location(), Some("search=Le&status=NEW"));

    let storage = FileStorage::open(dir.path()).unwrap();
    assert_eq!(
        storage.get_item(LOCATION_KEY).unwrap().as_deref(),
        Some("search=Le&status=NEW")
    );
}

#[tokio::test]
async fn external_location_is_stored_in_canonical_form() {
    let dir = tempdir().unwrap();
    let mut ctl = TaskListController::new(
        MockBackend::five_tasks(),
        FileStorage::open(dir.path()).unwrap(),
        20,
        Duration::milliseconds(700),
        Arc::new(SystemClock),
    );
    ctl.mount(None).await;

    assert!(ctl.on_location_change("?page=1&status=NEW").await.is_some());
    let storage = FileStorage::open(dir.path()).unwrap();
    assert_eq!(
        storage.get_item(LOCATION_KEY).unwrap().as_deref(),
        Some("status=NEW")
    );
    assert!(ctl.on_location_change("status=NEW").await.is_none());
}

#[tokio::test]
async fn column_widths_persist_when_resizing_is_enabled() {
    let dir = tempdir().unwrap();
    let open = |backend: MockBackend| {
        TaskListController::new(
            backend,
            FileStorage::open(dir.path()).unwrap(),
            20,
            Duration::milliseconds(700),
            Arc::new(SystemClock),
        )
    };

    let mut ctl = open(MockBackend::five_tasks());
    ctl.load_layout().await;
    assert_eq!(ctl.resize_column("title", 10), Some(120));
    assert_eq!(ctl.resize_column("address", 300), Some(300));

    let mut reopened = open(MockBackend::five_tasks());
    reopened.load_layout().await;
    assert_eq!(reopened.column_widths().get("title"), Some(120));
    assert_eq!(reopened.column_widths().get("address"), Some(300));

    let locked = MockBackend::five_tasks();
    *locked.settings.lock() = None;
    let mut locked = open(locked);
    locked.load_layout().await;
    assert!(!locked.settings().resizable_columns);
    assert_eq!(locked.resize_column("title", 500), None);
    assert_eq!(locked.column_widths().get("title"), Some(120));
}

#[tokio::test]
async fn grouping_collapse_resets_with_new_key() {
    let mut ctl = controller(MockBackend::five_tasks());
    ctl.mount(None).await;

    ctl.set_group_by(GroupBy::Status);
    let keys: Vec<String> = ctl.groups().into_iter().map(|g| g.key).collect();
    assert_eq!(keys, vec!["status:NEW", "status:IN_PROGRESS", "status:DONE"]);

    ctl.toggle_group("status:DONE");
    assert!(ctl.is_group_collapsed("status:DONE"));
    ctl.set_group_by(GroupBy::Priority);
    assert!(!ctl.is_group_collapsed("status:DONE"));
    assert_eq!(ctl.groups().len(), 1);
}
