use std::collections::BTreeSet;

use crate::task::Task;

const UNASSIGNED_KEY: &str =
  "assignee:none";
const UNASSIGNED_LABEL: &str =
  "Не назначен";

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum GroupBy {
  #[default]
  None,
  Status,
  Priority,
  Assignee
}

impl GroupBy {
  pub fn as_str(self) -> &'static str {
    match self {
      | GroupBy::None => "none",
      | GroupBy::Status => "status",
      | GroupBy::Priority => "priority",
      | GroupBy::Assignee => "assignee"
    }
  }
}

impl std::str::FromStr for GroupBy {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str()
    {
      | "" | "none" => Ok(GroupBy::None),
      | "status" => Ok(GroupBy::Status),
      | "priority" => {
        Ok(GroupBy::Priority)
      }
      | "assignee" => {
        Ok(GroupBy::Assignee)
      }
      | other => Err(anyhow::anyhow!(
        "unknown grouping: {other} \
         (expected none, status, \
         priority or assignee)"
      ))
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
  pub key:   String,
  /// Empty for the single group of an
  /// ungrouped list.
  pub label: String,
  pub tasks: Vec<Task>
}

/// Partitions an already fetched page.
/// Members keep their page order inside
/// each group.
pub fn group_tasks(
  tasks: &[Task],
  by: GroupBy
) -> Vec<Group> {
  match by {
    | GroupBy::None => {
      vec![Group {
        key:   "all".to_string(),
        label: String::new(),
        tasks: tasks.to_vec()
      }]
    }
    | GroupBy::Status => {
      ranked_groups(
        tasks,
        |task| {
          (
            task.status.rank(),
            format!(
              "status:{}",
              task.status.key()
            ),
            task.status.label().to_string()
          )
        }
      )
    }
    | GroupBy::Priority => {
      ranked_groups(
        tasks,
        |task| {
          (
            task.priority.rank(),
            format!(
              "priority:{}",
              task.priority.key()
            ),
            task
              .priority
              .label()
              .to_string()
          )
        }
      )
    }
    | GroupBy::Assignee => {
      group_by_assignee(tasks)
    }
  }
}

/// Groups by a (rank, key, label)
/// triple. Ties in rank (unrecognized
/// values) keep first-seen order.
fn ranked_groups<F>(
  tasks: &[Task],
  classify: F
) -> Vec<Group>
where
  F: Fn(&Task) -> (usize, String, String)
{
  let mut groups: Vec<(usize, Group)> =
    Vec::new();

  for task in tasks {
    let (rank, key, label) =
      classify(task);
    if let Some((_, group)) = groups
      .iter_mut()
      .find(|(_, group)| group.key == key)
    {
      group.tasks.push(task.clone());
      continue;
    }
    groups.push((
      rank,
      Group {
        key,
        label,
        tasks: vec![task.clone()]
      }
    ));
  }

  groups.sort_by_key(|(rank, _)| *rank);
  groups
    .into_iter()
    .map(|(_, group)| group)
    .collect()
}

fn group_by_assignee(
  tasks: &[Task]
) -> Vec<Group> {
  let mut named: Vec<Group> = Vec::new();
  let mut unassigned: Vec<Task> =
    Vec::new();

  for task in tasks {
    let Some(id) = task.assignee_id else {
      unassigned.push(task.clone());
      continue;
    };
    let key = format!("assignee:{id}");
    if let Some(group) = named
      .iter_mut()
      .find(|group| group.key == key)
    {
      group.tasks.push(task.clone());
      continue;
    }
    let label = task
      .assignee_name
      .clone()
      .filter(|name| !name.is_empty())
      .unwrap_or_else(|| format!("#{id}"));
    named.push(Group {
      key,
      label,
      tasks: vec![task.clone()]
    });
  }

  named.sort_by(|a, b| {
    a.label
      .to_lowercase()
      .cmp(&b.label.to_lowercase())
  });
  if !unassigned.is_empty() {
    named.push(Group {
      key:   UNASSIGNED_KEY.to_string(),
      label: UNASSIGNED_LABEL.to_string(),
      tasks: unassigned
    });
  }
  named
}

/// Per-group collapsed flags. Switching
/// the grouping key expands everything.
#[derive(Debug, Clone, Default)]
pub struct GroupingState {
  by:        GroupBy,
  collapsed: BTreeSet<String>
}

impl GroupingState {
  pub fn group_by(&self) -> GroupBy {
    self.by
  }

  pub fn set_group_by(
    &mut self,
    by: GroupBy
  ) {
    if self.by != by {
      self.by = by;
      self.collapsed.clear();
    }
  }

  pub fn toggle(&mut self, key: &str) {
    if !self.collapsed.remove(key) {
      self
        .collapsed
        .insert(key.to_string());
    }
  }

  pub fn is_collapsed(
    &self,
    key: &str
  ) -> bool {
    self.collapsed.contains(key)
  }

  pub fn apply(
    &self,
    tasks: &[Task]
  ) -> Vec<Group> {
    group_tasks(tasks, self.by)
  }
}
