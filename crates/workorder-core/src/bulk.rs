use std::collections::BTreeSet;

use chrono::NaiveDate;
use futures::future::join_all;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;
use workorder_shared::{PlannedDateUpdate, TaskAssignRequest, TaskPatch, TaskStatusUpdate};

use crate::api::{ApiError, TaskBackend};
use crate::task::{Task, TaskPriority, TaskStatus};
use crate::transitions::{allowed_targets, is_transition_allowed};

/// Problems caught before any request is made.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no tasks selected")]
    EmptySelection,
    #[error("choose a status to apply")]
    StatusRequired,
    #[error("unknown status: {0}")]
    UnknownStatus(String),
    #[error("unknown priority: {0}")]
    UnknownPriority(String),
    #[error("invalid planned date: {0} (expected YYYY-MM-DD)")]
    InvalidDate(String),
    #[error("the import file has no data rows")]
    EmptyImport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    SetStatus(TaskStatus),
    SetAssignee(Option<i64>),
    SetPriority(TaskPriority),
    SetPlannedDate(Option<NaiveDate>),
    Delete,
}

impl BulkAction {
    pub fn describe(&self) -> String {
        match self {
            BulkAction::SetStatus(status) => format!("status → {}", status.label()),
            BulkAction::SetAssignee(Some(id)) => format!("assignee → #{id}"),
            BulkAction::SetAssignee(None) => "assignee → none".to_string(),
            BulkAction::SetPriority(priority) => format!("priority → {}", priority.label()),
            BulkAction::SetPlannedDate(Some(date)) => format!("planned date → {date}"),
            BulkAction::SetPlannedDate(None) => "planned date → none".to_string(),
            BulkAction::Delete => "delete".to_string(),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            BulkAction::SetStatus(TaskStatus::Unrecognized(raw)) if raw.trim().is_empty() => {
                Err(ValidationError::StatusRequired)
            }
            BulkAction::SetStatus(TaskStatus::Unrecognized(raw)) => {
                Err(ValidationError::UnknownStatus(raw.clone()))
            }
            BulkAction::SetPriority(TaskPriority::Unrecognized(raw)) => {
                Err(ValidationError::UnknownPriority(raw.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// `YYYY-MM-DD` or `DD.MM.YYYY`.
pub fn parse_planned_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%d.%m.%Y"))
        .map_err(|_| ValidationError::InvalidDate(raw.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BulkOutcome {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Which ids will be sent and which are skipped up front.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkPlan {
    pub attempted: Vec<i64>,
    pub skipped: Vec<i64>,
}

/// Splits a selection into attempted and skipped ids. Status changes
/// consult the transition table against the loaded snapshot; an id that
/// is not in the snapshot cannot be checked and is skipped.
pub fn plan_bulk(
    snapshot: &[Task],
    ids: &BTreeSet<i64>,
    action: &BulkAction,
) -> Result<BulkPlan, ValidationError> {
    if ids.is_empty() {
        return Err(ValidationError::EmptySelection);
    }
    action.validate()?;

    let mut plan = BulkPlan::default();
    for id in ids {
        let eligible = match action {
            BulkAction::SetStatus(target) => match snapshot.iter().find(|task| task.id == *id) {
                Some(task) if is_transition_allowed(&task.status, target) => true,
                Some(task) => {
                    debug!(
                        id,
                        from = task.status.key(),
                        allowed = ?allowed_targets(&task.status),
                        "transition not allowed"
                    );
                    false
                }
                None => {
                    debug!(id, "task not on the loaded page; status unknown");
                    false
                }
            },
            _ => true,
        };
        if eligible {
            plan.attempted.push(*id);
        } else {
            plan.skipped.push(*id);
        }
    }
    Ok(plan)
}

async fn apply_one<B: TaskBackend>(backend: &B, id: i64, action: &BulkAction) -> Result<(), ApiError> {
    match action {
        BulkAction::SetStatus(status) => {
            let body = TaskStatusUpdate {
                status: status.key().to_string(),
                comment: String::new(),
            };
            backend.update_status(id, &body).await
        }
        BulkAction::SetAssignee(assignee) => {
            let body = TaskAssignRequest {
                assigned_user_id: *assignee,
            };
            backend.assign_task(id, &body).await
        }
        BulkAction::SetPriority(priority) => {
            let patch = TaskPatch {
                priority: priority.code(),
                ..TaskPatch::default()
            };
            backend.patch_task(id, &patch).await
        }
        BulkAction::SetPlannedDate(date) => {
            let body = PlannedDateUpdate {
                planned_date: date.map(|d| d.format("%Y-%m-%d").to_string()),
            };
            backend.update_planned_date(id, &body).await
        }
        BulkAction::Delete => backend.delete_task(id).await,
    }
}

/// Runs one request per eligible id, all in flight together. Every
/// request settles; a failure is counted and never cancels its siblings.
pub async fn execute_bulk<B: TaskBackend>(
    backend: &B,
    snapshot: &[Task],
    ids: &BTreeSet<i64>,
    action: &BulkAction,
) -> Result<BulkOutcome, ValidationError> {
    let plan = plan_bulk(snapshot, ids, action)?;
    let batch_id = Uuid::new_v4();
    let span = info_span!(
        "bulk",
        %batch_id,
        action = %action.describe(),
        attempted = plan.attempted.len(),
        skipped = plan.skipped.len()
    );

    async {
        if !plan.skipped.is_empty() {
            info!(ids = ?plan.skipped, "skipping tasks that cannot take this change");
        }

        let results = join_all(plan.attempted.iter().map(|id| async move {
            (*id, apply_one(backend, *id, action).await)
        }))
        .await;

        let mut outcome = BulkOutcome {
            skipped: plan.skipped.len(),
            ..BulkOutcome::default()
        };
        for (id, result) in results {
            match result {
                Ok(()) => outcome.succeeded += 1,
                Err(err) => {
                    warn!(id, error = %err, "bulk item failed");
                    outcome.failed += 1;
                }
            }
        }

        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "bulk action settled"
        );
        Ok::<_, ValidationError>(outcome)
    }
    .instrument(span)
    .await
}
