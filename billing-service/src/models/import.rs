//! Import batch models and the tabular row type fed to the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// One tabular row: column name → raw string value.
///
/// File parsing and encoding are the upload collaborator's job; the
/// reconciler only sees these maps.
pub type ImportRow = HashMap<String, String>;

/// Fetch a trimmed, non-empty field from a row.
pub fn row_field<'a>(row: &'a ImportRow, key: &str) -> Option<&'a str> {
    row.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Import kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Rooms,
    Leases,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Rooms => "rooms",
            ImportKind::Leases => "leases",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "leases" => ImportKind::Leases,
            _ => ImportKind::Rooms,
        }
    }
}

/// Batch status, polled by the caller while the worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportBatchStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl ImportBatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportBatchStatus::Pending => "pending",
            ImportBatchStatus::Processing => "processing",
            ImportBatchStatus::Done => "done",
            ImportBatchStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "processing" => ImportBatchStatus::Processing,
            "done" => ImportBatchStatus::Done,
            "failed" => ImportBatchStatus::Failed,
            _ => ImportBatchStatus::Pending,
        }
    }
}

/// Status record for an asynchronous import job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImportBatch {
    pub batch_id: Uuid,
    pub filename: String,
    pub kind: String,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub started_utc: Option<DateTime<Utc>>,
    pub finished_utc: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub errors: Option<String>,
}

/// Net entity changes of a reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub created: u32,
    pub updated: u32,
}
