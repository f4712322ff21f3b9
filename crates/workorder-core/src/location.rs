use percent_encoding::{
  AsciiSet,
  NON_ALPHANUMERIC,
  percent_decode_str,
  utf8_percent_encode
};
use tracing::{
  debug,
  trace
};

use crate::filters::{
  AddressFilter,
  TaskFilters
};
use crate::task::{
  TaskPriority,
  TaskStatus
};

const QUERY_VALUE: &AsciiSet =
  &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn encode_component(
  value: &str
) -> String {
  utf8_percent_encode(value, QUERY_VALUE)
    .to_string()
}

fn decode_component(raw: &str) -> String {
  let spaced = raw.replace('+', " ");
  percent_decode_str(&spaced)
    .decode_utf8_lossy()
    .into_owned()
}

/// Location query for a filter set.
/// Defaults are left out and page 1 is
/// implied, so an unfiltered list has an
/// empty query.
pub fn serialize_location(
  filters: &TaskFilters
) -> String {
  let mut pairs: Vec<(&str, String)> =
    Vec::new();

  if !filters.search.is_empty() {
    pairs.push((
      "search",
      filters.search.clone()
    ));
  }
  if let Some(status) =
    filters.status.as_ref()
  {
    pairs.push((
      "status",
      status.key().to_string()
    ));
  }
  if let Some(priority) =
    filters.priority.as_ref()
  {
    pairs.push((
      "priority",
      priority.key().to_string()
    ));
  }
  if let Some(assignee) =
    filters.assignee_id
  {
    pairs.push((
      "assignee",
      assignee.to_string()
    ));
  }
  if let Some(address) =
    filters.address.as_ref()
  {
    pairs.push((
      "address_id",
      address.id.to_string()
    ));
    if let Some(title) =
      address.title.as_ref()
      && !title.is_empty()
    {
      pairs.push((
        "address_title",
        title.clone()
      ));
    }
  }
  if filters.page > 1 {
    pairs.push((
      "page",
      filters.page.to_string()
    ));
  }

  pairs
    .into_iter()
    .map(|(key, value)| {
      format!(
        "{key}={}",
        encode_component(&value)
      )
    })
    .collect::<Vec<_>>()
    .join("&")
}

/// Inverse of [`serialize_location`].
/// Values that do not parse are dropped
/// back to their defaults.
pub fn parse_location(
  query: &str,
  page_size: u32
) -> TaskFilters {
  let mut filters =
    TaskFilters::new(page_size);
  let mut address_id = None;
  let mut address_title = None;

  let query =
    query.trim().trim_start_matches('?');
  for part in query.split('&') {
    if part.is_empty() {
      continue;
    }
    let (key, raw) = part
      .split_once('=')
      .unwrap_or((part, ""));
    let value = decode_component(raw);

    match key {
      | "search" => {
        filters.search =
          value.trim().to_string();
      }
      | "status" => {
        filters.status =
          Some(TaskStatus::normalize(
            &value
          ))
          .filter(TaskStatus::is_known);
      }
      | "priority" => {
        filters.priority =
          Some(TaskPriority::normalize(
            &value
          ))
          .filter(TaskPriority::is_known);
      }
      | "assignee" => {
        filters.assignee_id =
          value.trim().parse().ok();
      }
      | "address_id" => {
        address_id =
          value.trim().parse::<i64>().ok();
      }
      | "address_title" => {
        address_title = Some(value)
          .filter(|t| !t.is_empty());
      }
      | "page" => {
        filters.page = value
          .trim()
          .parse::<u32>()
          .ok()
          .filter(|p| *p >= 1)
          .unwrap_or(1);
      }
      | other => {
        trace!(
          key = other,
          "ignoring unknown location key"
        );
      }
    }
  }

  filters.address =
    address_id.map(|id| AddressFilter {
      id,
      title: address_title
    });
  filters
}

/// Keeps the filter state and the
/// location in step without echoing our
/// own writes back as external changes.
#[derive(Debug, Default, Clone)]
pub struct LocationSync {
  last_written: Option<String>
}

impl LocationSync {
  pub fn current(&self) -> Option<&str> {
    self.last_written.as_deref()
  }

  /// Returns the query to write, or
  /// `None` when the location already
  /// matches.
  pub fn write(
    &mut self,
    filters: &TaskFilters
  ) -> Option<String> {
    let query =
      serialize_location(filters);
    if self.last_written.as_deref()
      == Some(query.as_str())
    {
      return None;
    }
    debug!(query = %query, "location updated");
    self.last_written = Some(query.clone());
    Some(query)
  }

  /// Handles a location change made
  /// outside the controller (back or
  /// forward). Returns the filters to
  /// adopt, or `None` for our own echo.
  pub fn observe(
    &mut self,
    query: &str,
    page_size: u32
  ) -> Option<TaskFilters> {
    let filters =
      parse_location(query, page_size);
    let canonical =
      serialize_location(&filters);
    if self.last_written.as_deref()
      == Some(canonical.as_str())
    {
      trace!("location echo ignored");
      return None;
    }
    self.last_written = Some(canonical);
    Some(filters)
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::filters::FilterChange;

  fn samples() -> Vec<TaskFilters> {
    let base = TaskFilters::new(20);
    vec![
      base.clone(),
      base.reduce(FilterChange::Search(
        "Лиговский пр. 50 & co=+%".to_string()
      )),
      base
        .reduce(FilterChange::Status(Some(
          TaskStatus::InProgress
        )))
        .reduce(FilterChange::Priority(
          Some(TaskPriority::Emergency)
        ))
        .reduce(FilterChange::Assignee(
          Some(12)
        ))
        .reduce(FilterChange::Page(4)),
      base.reduce(FilterChange::Address(
        Some(AddressFilter {
          id:    77,
          title: Some(
            "СПб, Невский 1".to_string()
          )
        })
      )),
    ]
  }

  #[test]
  fn round_trip_is_identity() {
    for filters in samples() {
      let query =
        serialize_location(&filters);
      let parsed =
        parse_location(&query, 20);
      assert_eq!(parsed, filters);
      assert_eq!(
        serialize_location(&parsed),
        query
      );
    }
  }

  #[test]
  fn defaults_and_first_page_are_omitted()
  {
    let filters = TaskFilters::new(20);
    assert_eq!(
      serialize_location(&filters),
      ""
    );
    let paged = filters
      .reduce(FilterChange::Status(Some(
        TaskStatus::New
      )))
      .reduce(FilterChange::Page(2));
    assert_eq!(
      serialize_location(&paged),
      "status=NEW&page=2"
    );
  }

  #[test]
  fn garbage_values_fall_back() {
    let filters = parse_location(
      "?status=SLEEPING&priority=3&page=0&assignee=x&address_title=orphan",
      20
    );
    assert_eq!(filters.status, None);
    assert_eq!(
      filters.priority,
      Some(TaskPriority::Urgent)
    );
    assert_eq!(filters.page, 1);
    assert_eq!(filters.assignee_id, None);
    assert_eq!(filters.address, None);
  }

  #[test]
  fn own_writes_are_not_echoed() {
    let mut sync = LocationSync::default();
    let filters = TaskFilters::new(20)
      .reduce(FilterChange::Status(Some(
        TaskStatus::Done
      )));

    let written = sync.write(&filters);
    assert_eq!(
      written.as_deref(),
      Some("status=DONE")
    );
    assert_eq!(sync.write(&filters), None);
    assert_eq!(
      sync.observe("status=DONE", 20),
      None
    );

    let back =
      sync.observe("?page=2", 20).unwrap();
    assert_eq!(back.page, 2);
    assert_eq!(back.status, None);
  }
}
