use chrono::{
  DateTime,
  NaiveDate,
  NaiveDateTime,
  Utc
};
use workorder_shared::{
  TaskDto,
  WireValue
};

use crate::api::ApiError;

#[derive(
  Debug, Clone, PartialEq, Eq, Hash,
)]
pub enum TaskStatus {
  New,
  InProgress,
  Done,
  Cancelled,
  /// Carried verbatim so a status the
  /// console does not know is still
  /// shown instead of blanked.
  Unrecognized(String)
}

impl TaskStatus {
  /// Display order.
  pub const KNOWN: [TaskStatus; 4] = [
    TaskStatus::New,
    TaskStatus::InProgress,
    TaskStatus::Done,
    TaskStatus::Cancelled
  ];

  pub fn normalize(raw: &str) -> Self {
    match fold(raw).as_str() {
      | "new" | "новая" => {
        TaskStatus::New
      }
      | "in_progress" | "в_работе" => {
        TaskStatus::InProgress
      }
      | "done" | "выполнена" => {
        TaskStatus::Done
      }
      | "cancelled" | "canceled"
      | "отменена" => {
        TaskStatus::Cancelled
      }
      | _ => {
        TaskStatus::Unrecognized(
          raw.to_string()
        )
      }
    }
  }

  pub fn from_wire(
    value: &WireValue
  ) -> Self {
    match value {
      | WireValue::Text(text) => {
        Self::normalize(text)
      }
      | WireValue::Int(_) => {
        TaskStatus::Unrecognized(
          value.as_text()
        )
      }
    }
  }

  pub fn key(&self) -> &str {
    match self {
      | TaskStatus::New => "NEW",
      | TaskStatus::InProgress => {
        "IN_PROGRESS"
      }
      | TaskStatus::Done => "DONE",
      | TaskStatus::Cancelled => {
        "CANCELLED"
      }
      | TaskStatus::Unrecognized(
        raw
      ) => raw.as_str()
    }
  }

  pub fn label(&self) -> &str {
    match self {
      | TaskStatus::New => "Новая",
      | TaskStatus::InProgress => {
        "В работе"
      }
      | TaskStatus::Done => "Выполнена",
      | TaskStatus::Cancelled => {
        "Отменена"
      }
      | TaskStatus::Unrecognized(
        raw
      ) => raw.as_str()
    }
  }

  pub fn rank(&self) -> usize {
    match self {
      | TaskStatus::New => 0,
      | TaskStatus::InProgress => 1,
      | TaskStatus::Done => 2,
      | TaskStatus::Cancelled => 3,
      | TaskStatus::Unrecognized(_) => 4
    }
  }

  pub fn is_known(&self) -> bool {
    !matches!(
      self,
      TaskStatus::Unrecognized(_)
    )
  }
}

#[derive(
  Debug, Clone, PartialEq, Eq, Hash,
)]
pub enum TaskPriority {
  Planned,
  Current,
  Urgent,
  Emergency,
  Unrecognized(String)
}

impl TaskPriority {
  /// Display order, most urgent first.
  pub const KNOWN: [TaskPriority; 4] = [
    TaskPriority::Emergency,
    TaskPriority::Urgent,
    TaskPriority::Current,
    TaskPriority::Planned
  ];

  pub fn normalize(raw: &str) -> Self {
    match fold(raw).as_str() {
      | "1" | "planned" | "плановая" => {
        TaskPriority::Planned
      }
      | "2" | "current" | "текущая" => {
        TaskPriority::Current
      }
      | "3" | "urgent" | "срочная" => {
        TaskPriority::Urgent
      }
      | "4" | "emergency"
      | "аварийная" => {
        TaskPriority::Emergency
      }
      | _ => {
        TaskPriority::Unrecognized(
          raw.to_string()
        )
      }
    }
  }

  pub fn from_code(code: i64) -> Self {
    match code {
      | 1 => TaskPriority::Planned,
      | 2 => TaskPriority::Current,
      | 3 => TaskPriority::Urgent,
      | 4 => TaskPriority::Emergency,
      | other => {
        TaskPriority::Unrecognized(
          other.to_string()
        )
      }
    }
  }

  pub fn from_wire(
    value: &WireValue
  ) -> Self {
    match value {
      | WireValue::Int(code) => {
        Self::from_code(*code)
      }
      | WireValue::Text(text) => {
        Self::normalize(text)
      }
    }
  }

  /// Numeric code the backend stores.
  pub fn code(&self) -> Option<u8> {
    match self {
      | TaskPriority::Planned => Some(1),
      | TaskPriority::Current => Some(2),
      | TaskPriority::Urgent => Some(3),
      | TaskPriority::Emergency => {
        Some(4)
      }
      | TaskPriority::Unrecognized(_) => {
        None
      }
    }
  }

  pub fn key(&self) -> &str {
    match self {
      | TaskPriority::Planned => {
        "PLANNED"
      }
      | TaskPriority::Current => {
        "CURRENT"
      }
      | TaskPriority::Urgent => "URGENT",
      | TaskPriority::Emergency => {
        "EMERGENCY"
      }
      | TaskPriority::Unrecognized(
        raw
      ) => raw.as_str()
    }
  }

  pub fn label(&self) -> &str {
    match self {
      | TaskPriority::Planned => {
        "Плановая"
      }
      | TaskPriority::Current => {
        "Текущая"
      }
      | TaskPriority::Urgent => {
        "Срочная"
      }
      | TaskPriority::Emergency => {
        "Аварийная"
      }
      | TaskPriority::Unrecognized(
        raw
      ) => raw.as_str()
    }
  }

  pub fn rank(&self) -> usize {
    match self {
      | TaskPriority::Emergency => 0,
      | TaskPriority::Urgent => 1,
      | TaskPriority::Current => 2,
      | TaskPriority::Planned => 3,
      | TaskPriority::Unrecognized(_) => {
        4
      }
    }
  }

  pub fn is_known(&self) -> bool {
    self.code().is_some()
  }
}

fn fold(raw: &str) -> String {
  raw
    .trim()
    .to_lowercase()
    .replace([' ', '-'], "_")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
  pub lat: f64,
  pub lon: f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
  pub id:             i64,
  pub number:         Option<String>,
  pub title:          String,
  pub description:    String,
  pub address:        String,
  pub location:       Option<GeoPoint>,
  pub status:         TaskStatus,
  pub priority:       TaskPriority,
  pub assignee_id:    Option<i64>,
  pub assignee_name:  Option<String>,
  pub planned_date:   Option<DateTime<Utc>>,
  pub completed_at:   Option<DateTime<Utc>>,
  pub created_at:     DateTime<Utc>,
  pub updated_at:     DateTime<Utc>,
  pub customer_name:  Option<String>,
  pub customer_phone: Option<String>,
  pub comments_count: u32
}

impl Task {
  pub fn new(
    id: i64,
    title: &str,
    address: &str,
    now: DateTime<Utc>
  ) -> Self {
    Self {
      id,
      number: None,
      title: title.to_string(),
      description: String::new(),
      address: address.to_string(),
      location: None,
      status: TaskStatus::New,
      priority: TaskPriority::Planned,
      assignee_id: None,
      assignee_name: None,
      planned_date: None,
      completed_at: None,
      created_at: now,
      updated_at: now,
      customer_name: None,
      customer_phone: None,
      comments_count: 0
    }
  }

  /// The single point where wire
  /// representations are normalized.
  pub fn from_dto(
    dto: TaskDto
  ) -> Result<Self, ApiError> {
    let created_at =
      parse_timestamp(&dto.created_at)
        .ok_or_else(|| {
          ApiError::Decode(format!(
            "task {}: bad created_at \
             {:?}",
            dto.id, dto.created_at
          ))
        })?;
    let updated_at =
      parse_timestamp(&dto.updated_at)
        .unwrap_or(created_at);

    let location = match (dto.lat, dto.lon)
    {
      | (Some(lat), Some(lon)) => {
        Some(GeoPoint {
          lat,
          lon
        })
      }
      | _ => None
    };

    Ok(Self {
      id: dto.id,
      number: dto.task_number,
      title: dto.title,
      description: dto.description,
      address: dto.raw_address,
      location,
      status: TaskStatus::from_wire(
        &dto.status
      ),
      priority: TaskPriority::from_wire(
        &dto.priority
      ),
      assignee_id: dto.assigned_user_id,
      assignee_name: dto
        .assigned_user_name,
      planned_date: dto
        .planned_date
        .as_deref()
        .and_then(parse_timestamp),
      completed_at: dto
        .completed_at
        .as_deref()
        .and_then(parse_timestamp),
      created_at,
      updated_at,
      customer_name: dto.customer_name,
      customer_phone: dto
        .customer_phone,
      comments_count: dto.comments_count
    })
  }
}

/// Accepts RFC 3339, the naive ISO
/// datetimes the backend emits (UTC), and
/// bare dates.
pub fn parse_timestamp(
  raw: &str
) -> Option<DateTime<Utc>> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(trimmed)
  {
    return Some(dt.with_timezone(&Utc));
  }

  if let Ok(naive) =
    NaiveDateTime::parse_from_str(
      trimmed,
      "%Y-%m-%dT%H:%M:%S%.f"
    )
  {
    return Some(naive.and_utc());
  }

  NaiveDate::parse_from_str(
    trimmed, "%Y-%m-%d"
  )
  .ok()
  .and_then(|date| {
    date.and_hms_opt(0, 0, 0)
  })
  .map(|naive| naive.and_utc())
}
