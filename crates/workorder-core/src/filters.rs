use chrono::{
  DateTime,
  Duration,
  Utc
};
use parking_lot::Mutex;
use tracing::trace;
use workorder_shared::TasksListArgs;

use crate::task::{
  TaskPriority,
  TaskStatus
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const DEFAULT_SEARCH_DEBOUNCE_MS:
  i64 = 700;

#[derive(
  Debug, Clone, PartialEq, Eq, Hash,
)]
pub struct AddressFilter {
  pub id:    i64,
  /// Display title; travels in the
  /// location only, never to the
  /// backend.
  pub title: Option<String>
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilters {
  pub page:        u32,
  pub page_size:   u32,
  pub search:      String,
  pub status:      Option<TaskStatus>,
  pub priority:    Option<TaskPriority>,
  pub assignee_id: Option<i64>,
  pub address:     Option<AddressFilter>
}

impl Default for TaskFilters {
  fn default() -> Self {
    Self::new(DEFAULT_PAGE_SIZE)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterChange {
  Search(String),
  Status(Option<TaskStatus>),
  Priority(Option<TaskPriority>),
  Assignee(Option<i64>),
  Address(Option<AddressFilter>),
  Page(u32),
  Clear
}

impl TaskFilters {
  pub fn new(page_size: u32) -> Self {
    Self {
      page:        1,
      page_size:   page_size.max(1),
      search:      String::new(),
      status:      None,
      priority:    None,
      assignee_id: None,
      address:     None
    }
  }

  /// Pure transition. Any change other
  /// than a page change lands on page 1.
  pub fn reduce(
    &self,
    change: FilterChange
  ) -> TaskFilters {
    let mut next = self.clone();
    match change {
      | FilterChange::Page(page) => {
        next.page = page.max(1);
        return next;
      }
      | FilterChange::Search(text) => {
        next.search =
          text.trim().to_string();
      }
      | FilterChange::Status(status) => {
        next.status = status
          .filter(TaskStatus::is_known);
      }
      | FilterChange::Priority(
        priority
      ) => {
        next.priority = priority.filter(
          TaskPriority::is_known
        );
      }
      | FilterChange::Assignee(id) => {
        next.assignee_id = id;
      }
      | FilterChange::Address(address) => {
        next.address = address;
      }
      | FilterChange::Clear => {
        next =
          TaskFilters::new(self.page_size);
      }
    }
    next.page = 1;
    trace!(?next, "reduced filters");
    next
  }

  pub fn to_list_args(
    &self
  ) -> TasksListArgs {
    TasksListArgs {
      search:      (!self
        .search
        .is_empty())
      .then(|| self.search.clone()),
      status:      self
        .status
        .as_ref()
        .map(|s| s.key().to_string()),
      priority:    self
        .priority
        .as_ref()
        .map(|p| p.key().to_string()),
      assignee_id: self.assignee_id,
      address_id:  self
        .address
        .as_ref()
        .map(|a| a.id),
      page:        self.page,
      size:        self.page_size
    }
  }
}

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to;
/// lets debounce timing be replayed.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>
}

impl ManualClock {
  pub fn new(
    start: DateTime<Utc>
  ) -> Self {
    Self {
      now: Mutex::new(start)
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock();
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock()
  }
}

/// Search box state. Typing only moves
/// the draft; the committed value is
/// what queries see.
#[derive(Debug, Clone)]
pub struct SearchInput {
  draft:     String,
  committed: String,
  edited_at: Option<DateTime<Utc>>,
  debounce:  Duration
}

impl SearchInput {
  pub fn new(debounce: Duration) -> Self {
    Self {
      draft: String::new(),
      committed: String::new(),
      edited_at: None,
      debounce
    }
  }

  pub fn draft(&self) -> &str {
    &self.draft
  }

  pub fn committed(&self) -> &str {
    &self.committed
  }

  pub fn edit(
    &mut self,
    text: &str,
    now: DateTime<Utc>
  ) {
    self.draft = text.to_string();
    self.edited_at = Some(now);
  }

  pub fn deadline(
    &self
  ) -> Option<DateTime<Utc>> {
    self
      .edited_at
      .map(|at| at + self.debounce)
  }

  /// Commits once the debounce window
  /// since the last keystroke elapsed.
  pub fn poll(
    &mut self,
    now: DateTime<Utc>
  ) -> Option<String> {
    let deadline = self.deadline()?;
    if now < deadline {
      return None;
    }
    self.commit()
  }

  /// Explicit commit (Enter). Returns the
  /// new committed value only when it
  /// differs from the previous one.
  pub fn commit(
    &mut self
  ) -> Option<String> {
    self.edited_at = None;
    let next =
      self.draft.trim().to_string();
    if next == self.committed {
      return None;
    }
    self.committed = next.clone();
    Some(next)
  }

  /// Adopts a value that came from
  /// outside (location restore) without
  /// reporting it as a new commit.
  pub fn reset_to(&mut self, value: &str) {
    self.draft = value.to_string();
    self.committed =
      value.trim().to_string();
    self.edited_at = None;
  }
}

impl Default for SearchInput {
  fn default() -> Self {
    Self::new(Duration::milliseconds(
      DEFAULT_SEARCH_DEBOUNCE_MS
    ))
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone,
    Utc
  };

  use super::*;

  fn filtered_page_three()
  -> TaskFilters {
    TaskFilters::default()
      .reduce(FilterChange::Status(Some(
        TaskStatus::New
      )))
      .reduce(FilterChange::Page(3))
  }

  #[test]
  fn non_page_changes_reset_page() {
    let changes = vec![
      FilterChange::Search(
        "nevsky".to_string()
      ),
      FilterChange::Status(Some(
        TaskStatus::Done
      )),
      FilterChange::Priority(Some(
        TaskPriority::Urgent
      )),
      FilterChange::Assignee(Some(4)),
      FilterChange::Address(Some(
        AddressFilter {
          id:    9,
          title: None
        }
      )),
      FilterChange::Clear,
    ];

    for change in changes {
      let start = filtered_page_three();
      assert_eq!(start.page, 3);
      let next =
        start.reduce(change.clone());
      assert_eq!(
        next.page, 1,
        "{change:?} kept page"
      );
    }
  }

  #[test]
  fn page_change_keeps_other_filters() {
    let start = filtered_page_three();
    let next =
      start.reduce(FilterChange::Page(5));
    assert_eq!(next.page, 5);
    assert_eq!(
      next.status,
      Some(TaskStatus::New)
    );
    assert_eq!(
      start
        .reduce(FilterChange::Page(0))
        .page,
      1
    );
  }

  #[test]
  fn unrecognized_status_is_not_a_filter()
  {
    let next = TaskFilters::default()
      .reduce(FilterChange::Status(Some(
        TaskStatus::Unrecognized(
          "X".to_string()
        )
      )));
    assert_eq!(next.status, None);
  }

  #[test]
  fn list_args_use_canonical_keys() {
    let filters = TaskFilters::new(50)
      .reduce(FilterChange::Priority(
        Some(TaskPriority::Emergency)
      ))
      .reduce(FilterChange::Search(
        "  leak ".to_string()
      ));
    let args = filters.to_list_args();
    assert_eq!(
      args.priority.as_deref(),
      Some("EMERGENCY")
    );
    assert_eq!(
      args.search.as_deref(),
      Some("leak")
    );
    assert_eq!(args.size, 50);
  }

  #[test]
  fn search_commits_after_debounce() {
    let start = Utc
      .with_ymd_and_hms(
        2026, 1, 10, 9, 0, 0
      )
      .unwrap();
    let mut input = SearchInput::default();

    input.edit("lig", start);
    input.edit(
      "ligovsky",
      start + Duration::milliseconds(300)
    );
    assert_eq!(
      input.poll(
        start
          + Duration::milliseconds(900)
      ),
      None
    );
    assert_eq!(input.committed(), "");

    assert_eq!(
      input.poll(
        start
          + Duration::milliseconds(1000)
      ),
      Some("ligovsky".to_string())
    );
    assert_eq!(
      input.poll(
        start
          + Duration::milliseconds(5000)
      ),
      None
    );
  }

  #[test]
  fn enter_commits_immediately_once() {
    let now = Utc::now();
    let mut input = SearchInput::default();
    input.edit("pump ", now);
    assert_eq!(
      input.commit(),
      Some("pump".to_string())
    );
    assert_eq!(input.commit(), None);
    assert_eq!(input.deadline(), None);
  }
}
