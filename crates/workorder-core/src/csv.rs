//! Delimited-text import and export for the task list.
//!
//! Import accepts whatever a spreadsheet produced: `,` or `;` separated,
//! optional byte-order mark, quoted fields with doubled quotes and line
//! breaks inside them, English or Russian column names. Export always
//! writes comma-separated, fully quoted fields behind a UTF-8 BOM so the
//! file opens with the right encoding in spreadsheet tools.

use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use uuid::Uuid;
use workorder_shared::TaskCreate;

use crate::api::TaskBackend;
use crate::bulk::ValidationError;
use crate::task::{Task, TaskPriority};

const BOM: char = '\u{feff}';

pub const EXPORT_COLUMNS: [&str; 10] = [
    "ID", "Number", "Title", "Customer", "Phone", "Status", "Priority", "Assignee", "Address",
    "Created",
];

pub const TEMPLATE_COLUMNS: [&str; 7] = [
    "title",
    "description",
    "address",
    "priority",
    "planned_date",
    "customer_name",
    "customer_phone",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportField {
    Title,
    Description,
    Address,
    Priority,
    PlannedDate,
    CustomerName,
    CustomerPhone,
}

impl ImportField {
    /// Maps a header cell to a field. Case, underscores and dashes do not
    /// matter.
    pub fn from_header(raw: &str) -> Option<Self> {
        let folded = raw
            .trim()
            .trim_start_matches(BOM)
            .to_lowercase()
            .replace(['_', '-'], " ");
        let normalized = folded.split_whitespace().collect::<Vec<_>>().join(" ");

        let field = match normalized.as_str() {
            "title" | "name" | "название" | "заголовок" | "тема" => ImportField::Title,
            "description" | "описание" | "комментарий" => ImportField::Description,
            "address" | "адрес" => ImportField::Address,
            "priority" | "приоритет" => ImportField::Priority,
            "planned date" | "date" | "плановая дата" | "дата" | "срок" => {
                ImportField::PlannedDate
            }
            "customer name" | "customer" | "клиент" | "имя клиента" | "заказчик" => {
                ImportField::CustomerName
            }
            "customer phone" | "phone" | "телефон" | "телефон клиента" => {
                ImportField::CustomerPhone
            }
            _ => return None,
        };
        Some(field)
    }
}

/// Picks `;` when the header line has more semicolons than commas outside
/// quotes.
pub fn detect_delimiter(text: &str) -> char {
    let mut in_quotes = false;
    let (mut commas, mut semicolons) = (0usize, 0usize);
    for ch in text.trim_start_matches(BOM).chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => commas += 1,
            ';' if !in_quotes => semicolons += 1,
            '\n' if !in_quotes => break,
            _ => {}
        }
    }
    if semicolons > commas { ';' } else { ',' }
}

/// Splits text into records of fields. Empty lines are dropped; a line of
/// blank cells is kept so the importer can count it.
pub fn parse_records(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;

    let mut chars = text.trim_start_matches(BOM).chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }

        match ch {
            '"' if !field_started => {
                in_quotes = true;
                field_started = true;
            }
            c if c == delimiter => {
                record.push(std::mem::take(&mut field));
                field_started = false;
            }
            '\r' | '\n' => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                record.push(std::mem::take(&mut field));
                field_started = false;
                push_record(&mut records, std::mem::take(&mut record));
            }
            other => {
                field.push(other);
                field_started = true;
            }
        }
    }

    if field_started || !field.is_empty() || !record.is_empty() {
        record.push(field);
        push_record(&mut records, record);
    }
    records
}

fn push_record(records: &mut Vec<Vec<String>>, record: Vec<String>) {
    if record.len() == 1 && record[0].is_empty() {
        return;
    }
    records.push(record);
}

/// Create payloads for the rows that carry the required fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportPlan {
    /// `(row number, payload)`; row 1 is the first data row.
    pub payloads: Vec<(usize, TaskCreate)>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ImportOutcome {
    pub fn not_imported(&self) -> usize {
        self.failed + self.skipped
    }
}

#[instrument(skip(text), fields(bytes = text.len()))]
pub fn plan_import(text: &str) -> Result<ImportPlan, ValidationError> {
    let delimiter = detect_delimiter(text);
    let mut records = parse_records(text, delimiter).into_iter();
    let Some(header) = records.next() else {
        return Err(ValidationError::EmptyImport);
    };

    let columns: Vec<Option<ImportField>> =
        header.iter().map(|cell| ImportField::from_header(cell)).collect();
    debug!(delimiter = %delimiter, ?columns, "mapped import header");

    let mut plan = ImportPlan::default();
    let mut rows = 0usize;
    for (idx, record) in records.enumerate() {
        rows += 1;
        let row = idx + 1;
        match row_to_payload(&columns, &record, row) {
            Some(payload) => plan.payloads.push((row, payload)),
            None => {
                debug!(row, "row lacks title or address; skipped");
                plan.skipped += 1;
            }
        }
    }

    if rows == 0 {
        return Err(ValidationError::EmptyImport);
    }
    Ok(plan)
}

fn row_to_payload(columns: &[Option<ImportField>], record: &[String], row: usize) -> Option<TaskCreate> {
    // Cells are kept verbatim; blank ones count as missing.
    let value = |field: ImportField| -> Option<String> {
        columns
            .iter()
            .position(|column| *column == Some(field))
            .and_then(|idx| record.get(idx))
            .filter(|raw| !raw.trim().is_empty())
            .cloned()
    };

    let title = value(ImportField::Title)?;
    let address = value(ImportField::Address)?;

    let priority = value(ImportField::Priority).and_then(|raw| {
        let priority = TaskPriority::normalize(&raw);
        if priority.code().is_none() {
            warn!(row, value = %raw, "unrecognized priority; backend default applies");
        }
        priority.code()
    });

    let planned_date = value(ImportField::PlannedDate).and_then(|raw| {
        let parsed = normalize_planned_date(&raw);
        if parsed.is_none() {
            warn!(row, value = %raw, "unparseable planned date; left empty");
        }
        parsed
    });

    Some(TaskCreate {
        title,
        address,
        description: value(ImportField::Description).unwrap_or_default(),
        customer_name: value(ImportField::CustomerName),
        customer_phone: value(ImportField::CustomerPhone).map(|phone| phone.trim().to_string()),
        priority,
        planned_date,
    })
}

/// `YYYY-MM-DD`, `DD.MM.YYYY`, or an ISO datetime which is passed
/// through as-is.
pub fn normalize_planned_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%d.%m.%Y") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || chrono::DateTime::parse_from_rfc3339(raw).is_ok()
    {
        return Some(raw.to_string());
    }
    None
}

/// Submits payloads one at a time; a failed row is counted and the next
/// row still goes out.
pub async fn import_tasks<B: TaskBackend>(backend: &B, plan: &ImportPlan) -> ImportOutcome {
    let batch_id = Uuid::new_v4();
    let span = info_span!("import", %batch_id, rows = plan.payloads.len(), skipped = plan.skipped);

    async {
        let mut outcome = ImportOutcome {
            skipped: plan.skipped,
            ..ImportOutcome::default()
        };
        for (row, payload) in &plan.payloads {
            match backend.create_task(payload).await {
                Ok(()) => outcome.succeeded += 1,
                Err(err) => {
                    warn!(row, error = %err, "import row failed");
                    outcome.failed += 1;
                }
            }
        }
        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "import finished"
        );
        outcome
    }
    .instrument(span)
    .await
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Serializes tasks in the fixed export column order.
pub fn export_tasks(tasks: &[Task], tz: &Tz) -> String {
    let mut out = String::new();
    out.push(BOM);
    out.push_str(
        &EXPORT_COLUMNS
            .iter()
            .map(|column| quote(column))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push_str("\r\n");

    for task in tasks {
        let created = task
            .created_at
            .with_timezone(tz)
            .format("%d.%m.%Y %H:%M")
            .to_string();
        let cells = [
            task.id.to_string(),
            task.number.clone().unwrap_or_default(),
            task.title.clone(),
            task.customer_name.clone().unwrap_or_default(),
            task.customer_phone.clone().unwrap_or_default(),
            task.status.label().to_string(),
            task.priority.label().to_string(),
            task.assignee_name.clone().unwrap_or_default(),
            task.address.clone(),
            created,
        ];
        out.push_str(&cells.iter().map(|cell| quote(cell)).collect::<Vec<_>>().join(","));
        out.push_str("\r\n");
    }
    out
}

/// Header plus one example row for users preparing an import file.
pub fn import_template() -> String {
    let mut out = String::new();
    out.push(BOM);
    out.push_str(&TEMPLATE_COLUMNS.join(","));
    out.push_str("\r\n");
    out.push_str(
        "\"Протечка стояка\",\"Течёт в подвале\",\"СПб, Невский пр., 1\",3,2025-12-31,\"Иван Иванов\",+79991234567\r\n",
    );
    out
}
