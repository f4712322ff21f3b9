use serde::{
  Deserialize,
  Serialize
};

/// A status or priority exactly as the
/// backend sent it. Older rows carry the
/// numeric priority code, newer ones the
/// enum name, and some exports a label.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(untagged)]
pub enum WireValue {
  Int(i64),
  Text(String)
}

impl WireValue {
  pub fn as_text(&self) -> String {
    match self {
      | WireValue::Int(value) => {
        value.to_string()
      }
      | WireValue::Text(value) => {
        value.clone()
      }
    }
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct TaskDto {
  pub id:                 i64,
  #[serde(default)]
  pub task_number:        Option<String>,
  #[serde(default)]
  pub title:              String,
  #[serde(default)]
  pub raw_address:        String,
  #[serde(default)]
  pub description:        String,
  #[serde(default)]
  pub customer_name:      Option<String>,
  #[serde(default)]
  pub customer_phone:     Option<String>,
  #[serde(default)]
  pub lat:                Option<f64>,
  #[serde(default)]
  pub lon:                Option<f64>,
  pub status:             WireValue,
  pub priority:           WireValue,
  pub created_at:         String,
  pub updated_at:         String,
  #[serde(default)]
  pub planned_date:       Option<String>,
  #[serde(default)]
  pub completed_at:       Option<String>,
  #[serde(default)]
  pub assigned_user_id:   Option<i64>,
  #[serde(default)]
  pub assigned_user_name: Option<String>,
  #[serde(default)]
  pub comments_count:     u32
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct PaginatedResponse<T> {
  pub items: Vec<T>,
  pub total: u64,
  pub page:  u32,
  pub size:  u32,
  pub pages: u32
}

/// Query parameters of the task
/// collection endpoint.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
pub struct TasksListArgs {
  pub search:      Option<String>,
  pub status:      Option<String>,
  pub priority:    Option<String>,
  pub assignee_id: Option<i64>,
  pub address_id:  Option<i64>,
  pub page:        u32,
  pub size:        u32
}

impl TasksListArgs {
  /// Pairs in the order the backend
  /// documents them; unset filters are
  /// left out entirely.
  pub fn query_pairs(
    &self
  ) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if let Some(search) =
      self.search.as_ref()
    {
      pairs
        .push(("search", search.clone()));
    }
    if let Some(status) =
      self.status.as_ref()
    {
      pairs
        .push(("status", status.clone()));
    }
    if let Some(priority) =
      self.priority.as_ref()
    {
      pairs.push((
        "priority",
        priority.clone()
      ));
    }
    if let Some(assignee) =
      self.assignee_id
    {
      pairs.push((
        "assignee_id",
        assignee.to_string()
      ));
    }
    if let Some(address) =
      self.address_id
    {
      pairs.push((
        "address_id",
        address.to_string()
      ));
    }
    pairs.push((
      "page",
      self.page.to_string()
    ));
    pairs.push((
      "size",
      self.size.to_string()
    ));
    pairs
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Default,
)]
pub struct TaskCreate {
  pub title:          String,
  pub address:        String,
  #[serde(default)]
  pub description:    String,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub customer_name:  Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub customer_phone: Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub priority:       Option<u8>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub planned_date:   Option<String>
}

/// Partial update; only the fields that
/// are set go over the wire.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Default,
)]
pub struct TaskPatch {
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub title:          Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub address:        Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub description:    Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub customer_name:  Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub customer_phone: Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub priority:       Option<u8>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskStatusUpdate {
  pub status:  String,
  #[serde(default)]
  pub comment: String
}

/// `None` unassigns the task, so the
/// field is always serialized.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskAssignRequest {
  pub assigned_user_id: Option<i64>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct PlannedDateUpdate {
  pub planned_date: Option<String>
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
pub struct InterfaceSettings {
  #[serde(default)]
  pub resizable_columns: bool,
  #[serde(default)]
  pub compact_view:      bool
}
