//! Core data types shared by the store, the HTTP surface and the pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A persisted gazette: one uploaded document and the day it was published.
///
/// Records are immutable once created; `public_url` is unique across the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GazetteRecord {
    pub id: i64,
    pub publication_date: NaiveDate,
    pub public_url: String,
}

/// Body of `POST /api/gazettes/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGazette {
    pub publication_date: NaiveDate,
    pub public_url: String,
}

/// Result of an idempotent create: the stored record, and whether this call inserted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOutcome {
    #[serde(flatten)]
    pub record: GazetteRecord,
    pub created: bool,
}

/// Paging for the unfiltered listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub skip: i64,
    pub limit: Option<i64>,
}
