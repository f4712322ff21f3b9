use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::storage::KeyValueStorage;

pub const COLUMN_WIDTHS_KEY: &str = "tasks.column_widths";

/// `(key, default width, minimum width)` in display order.
pub const COLUMNS: [(&str, u32, u32); 9] = [
    ("id", 70, 50),
    ("number", 110, 70),
    ("title", 260, 120),
    ("status", 130, 90),
    ("priority", 120, 90),
    ("assignee", 160, 100),
    ("address", 240, 120),
    ("planned_date", 120, 90),
    ("created_at", 140, 100),
];

fn column(key: &str) -> Option<(u32, u32)> {
    COLUMNS
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|(_, default, min)| (*default, *min))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnWidths(BTreeMap<String, u32>);

impl Default for ColumnWidths {
    fn default() -> Self {
        Self(
            COLUMNS
                .iter()
                .map(|(key, default, _)| (key.to_string(), *default))
                .collect(),
        )
    }
}

impl ColumnWidths {
    pub fn get(&self, key: &str) -> Option<u32> {
        self.0.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        COLUMNS
            .iter()
            .filter_map(|(key, _, _)| self.0.get(*key).map(|width| (*key, *width)))
    }

    /// Stored values win over defaults when they name a known column and
    /// are at least that column's minimum.
    fn merge_stored(&mut self, stored: BTreeMap<String, serde_json::Value>) {
        for (key, value) in stored {
            let Some((_, min)) = column(&key) else {
                debug!(column = %key, "ignoring stored width for unknown column");
                continue;
            };
            match value.as_u64() {
                Some(width) if width >= u64::from(min) && width <= u64::from(u32::MAX) => {
                    self.0.insert(key, width as u32);
                }
                _ => debug!(column = %key, %value, "ignoring invalid stored width"),
            }
        }
    }
}

/// Loads, resizes and saves column widths. Storage failures are logged and
/// never surface to the caller.
#[derive(Debug)]
pub struct ColumnLayoutStore<S> {
    storage: S,
    widths: ColumnWidths,
}

impl<S: KeyValueStorage> ColumnLayoutStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            widths: ColumnWidths::default(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn widths(&self) -> &ColumnWidths {
        &self.widths
    }

    pub fn load(&mut self) -> &ColumnWidths {
        let mut widths = ColumnWidths::default();
        match self.storage.get_item(COLUMN_WIDTHS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&raw) {
                Ok(stored) => widths.merge_stored(stored),
                Err(err) => warn!(error = %err, "stored column widths are not a JSON object; using defaults"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = %err, "could not read column widths; using defaults"),
        }
        self.widths = widths;
        &self.widths
    }

    /// Clamps to the column minimum. Returns the width actually applied,
    /// or `None` when the change was ignored.
    pub fn resize(&mut self, key: &str, width: u32, resizable: bool) -> Option<u32> {
        if !resizable {
            debug!(column = key, "column resizing is disabled");
            return None;
        }
        let Some((_, min)) = column(key) else {
            warn!(column = key, "unknown column");
            return None;
        };
        let width = width.max(min);
        self.widths.0.insert(key.to_string(), width);
        self.persist();
        Some(width)
    }

    pub fn reset(&mut self) {
        self.save(ColumnWidths::default());
    }

    pub fn save(&mut self, widths: ColumnWidths) {
        self.widths = widths;
        self.persist();
    }

    fn persist(&self) {
        let encoded = match serde_json::to_string(&self.widths.0) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "could not encode column widths");
                return;
            }
        };
        if let Err(err) = self.storage.set_item(COLUMN_WIDTHS_KEY, &encoded) {
            warn!(error = %err, "could not persist column widths");
        }
    }
}
