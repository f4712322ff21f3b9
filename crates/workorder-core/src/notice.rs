use std::fmt;

use crate::api::ApiError;
use crate::bulk::{BulkOutcome, ValidationError};
use crate::csv::ImportOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// One line of user feedback after an action settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    fn new(level: NoticeLevel, text: String) -> Self {
        Self { level, text }
    }

    pub fn for_bulk(outcome: &BulkOutcome) -> Self {
        let level = if outcome.succeeded == 0 {
            NoticeLevel::Error
        } else if outcome.failed > 0 || outcome.skipped > 0 {
            NoticeLevel::Warning
        } else {
            NoticeLevel::Success
        };
        let mut text = format!("Updated {} of {}", outcome.succeeded, outcome.attempted() + outcome.skipped);
        if outcome.failed > 0 {
            text.push_str(&format!(", {} failed", outcome.failed));
        }
        if outcome.skipped > 0 {
            text.push_str(&format!(", {} skipped", outcome.skipped));
        }
        Self::new(level, text)
    }

    pub fn for_import(outcome: &ImportOutcome) -> Self {
        let level = if outcome.succeeded == 0 {
            NoticeLevel::Error
        } else if outcome.not_imported() > 0 {
            NoticeLevel::Warning
        } else {
            NoticeLevel::Success
        };
        let mut text = format!("Imported {}", outcome.succeeded);
        if outcome.not_imported() > 0 {
            text.push_str(&format!(
                ", not imported {} ({} failed, {} skipped)",
                outcome.not_imported(),
                outcome.failed,
                outcome.skipped
            ));
        }
        Self::new(level, text)
    }

    pub fn for_validation(err: &ValidationError) -> Self {
        Self::new(NoticeLevel::Warning, err.to_string())
    }

    /// Keeps the batch counts and notes that the list could not be
    /// reloaded afterwards. The changes went through, so this is never
    /// raised above a warning.
    pub fn with_reload_failure(mut self, err: &ApiError) -> Self {
        if self.level == NoticeLevel::Success {
            self.level = NoticeLevel::Warning;
        }
        self.text.push_str(&format!("; list not refreshed: {err}"));
        self
    }

    pub fn for_query_failure(err: &ApiError) -> Self {
        let hint = if err.is_retryable() { "; retry to try again" } else { "" };
        Self::new(NoticeLevel::Error, format!("Could not load tasks: {err}{hint}"))
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
