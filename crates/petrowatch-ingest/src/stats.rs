use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the bounded error summary sent downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Where it happened, e.g. `municipio 09/002`.
    pub context: String,
    pub category: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Mutable accumulator for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    pub regions_processed: u64,
    pub subregions_processed: u64,
    pub stations_seen: u64,
    pub price_changes: u64,
    pub new_stations: u64,
    pub skipped_rows: u64,
    pub error_count: u64,
    errors: Vec<ErrorDetail>,
    max_errors: usize,
}

impl RunStatistics {
    /// `max_errors` caps the retained details; [`Self::error_count`] keeps
    /// counting past it.
    #[must_use]
    pub fn new(max_errors: usize) -> Self {
        Self {
            max_errors,
            ..Self::default()
        }
    }

    pub fn record_error(
        &mut self,
        context: impl Into<String>,
        category: &str,
        message: impl Into<String>,
    ) {
        self.error_count += 1;
        if self.errors.len() < self.max_errors {
            self.errors.push(ErrorDetail {
                context: context.into(),
                category: category.to_owned(),
                message: message.into(),
                occurred_at: Utc::now(),
            });
        }
    }

    #[must_use]
    pub fn errors(&self) -> &[ErrorDetail] {
        &self.errors
    }

    /// Number of errors counted but not retained.
    #[must_use]
    pub fn dropped_errors(&self) -> u64 {
        self.error_count.saturating_sub(self.errors.len() as u64)
    }
}
