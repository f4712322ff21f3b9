use crate::task::TaskStatus;

/// Edges a bulk status change may take.
/// DONE and CANCELLED have no outgoing
/// edges here; reopening is a per-task
/// action handled by the backend.
pub fn is_transition_allowed(
  from: &TaskStatus,
  to: &TaskStatus
) -> bool {
  matches!(
    (from, to),
    (
      TaskStatus::New,
      TaskStatus::InProgress
        | TaskStatus::Cancelled
    ) | (
      TaskStatus::InProgress,
      TaskStatus::Done
        | TaskStatus::Cancelled
    )
  )
}

/// Permitted next statuses in display
/// order.
pub fn allowed_targets(
  from: &TaskStatus
) -> Vec<TaskStatus> {
  TaskStatus::KNOWN
    .iter()
    .filter(|to| {
      is_transition_allowed(from, to)
    })
    .cloned()
    .collect()
}
