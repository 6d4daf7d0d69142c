use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// One CSV data row keyed by header name
pub type CsvRow = BTreeMap<String, String>;

/// Bulk operation applied to every row of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Activation,
    #[default]
    Deactivation,
}

impl Operation {
    /// Action name understood by the Litmos endpoint
    pub fn verb(self) -> &'static str {
        match self {
            Operation::Activation => "activate",
            Operation::Deactivation => "deactivate",
        }
    }

    /// Value of the user's `Active` flag once the operation succeeds
    pub fn target_active(self) -> bool {
        matches!(self, Operation::Activation)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Activation => f.write_str("activation"),
            Operation::Deactivation => f.write_str("deactivation"),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown operation type: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "activation" | "activate" => Ok(Operation::Activation),
            "deactivation" | "deactivate" => Ok(Operation::Deactivation),
            _ => Err(UnknownOperation(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }
}

/// A row that could not be processed, or a job-level failure when `row_index` is absent
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RowError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub row: Option<CsvRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RowError {
    pub fn for_row(row_index: usize, error: impl Into<String>, row: CsvRow) -> Self {
        Self {
            row_index: Some(row_index),
            error: error.into(),
            row: Some(row),
            detail: None,
        }
    }

    pub fn skipped(row_index: usize, error: impl Into<String>) -> Self {
        Self {
            row_index: Some(row_index),
            error: error.into(),
            row: None,
            detail: None,
        }
    }

    pub fn background(detail: impl Into<String>) -> Self {
        Self {
            row_index: None,
            error: "background failure".to_string(),
            row: None,
            detail: Some(detail.into()),
        }
    }
}

/// A row the upstream API accepted
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RowResult {
    pub row_index: usize,
    pub identifier: String,
    pub status_code: u16,
}

/// Point-in-time view of a job, as returned to pollers
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub operation: Operation,
    pub status: JobStatus,
    pub total: usize,
    pub done: usize,
    pub succeeded: usize,
    pub errors: Vec<RowError>,
    pub results: Vec<RowResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of a single-user activate/deactivate request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserActionResult {
    pub username: String,
    pub success: bool,
    pub message: String,
}

impl UserActionResult {
    pub fn ok(username: &str, message: impl Into<String>) -> Self {
        Self {
            username: username.to_string(),
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(username: &str, message: impl Into<String>) -> Self {
        Self {
            username: username.to_string(),
            success: false,
            message: message.into(),
        }
    }
}

/// A Litmos user record together with its detail lookup
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserLookupResponse {
    pub username: String,
    #[schema(value_type = Object)]
    pub user: Value,
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}
