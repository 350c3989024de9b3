//! Seams between the pipeline and its collaborators.
//!
//! Every external capability the orchestrator touches sits behind one of
//! these traits, so the portal, the file host and the persistence back-end
//! can each be swapped (or faked in tests) without touching orchestration.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ DocumentSource │──▶│  BlobSink  │──▶│  GazetteApi  │──▶│ GazetteStore │
//! │  (portal)      │   │  (upload)  │   │ (HTTP client)│   │  (SQLite)    │
//! └────────────────┘   └────────────┘   └──────────────┘   └──────────────┘
//!         Pipeline::run drives the first three; the
//!         Query Service is the only caller of the store.
//! ```

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::{DiscoveryError, FetchError, PersistError, StoreError, UploadError};
use crate::models::{CreateOutcome, GazetteRecord, NewGazette, Page};
use crate::period::YearMonth;
use crate::source::LocalDocument;

/// Lazy, single-pass sequence of documents produced by a [`DocumentSource`].
///
/// Each item is either a staged local file or the reason that one listed
/// document could not be fetched.
pub type DocumentStream = BoxStream<'static, Result<LocalDocument, FetchError>>;

// ═══════════════════════════════════════════════════════════════════════
// Document source
// ═══════════════════════════════════════════════════════════════════════

/// Discovers and downloads the gazettes published in one month.
///
/// Discovery happens inside [`fetch_month`](DocumentSource::fetch_month);
/// downloads happen as the returned stream is polled. A month with no
/// publications yields an empty stream, not an error.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_month(&self, period: YearMonth) -> Result<DocumentStream, DiscoveryError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Blob sink
// ═══════════════════════════════════════════════════════════════════════

/// Uploads one local file and returns its public URL.
///
/// Implementations do not retry; the orchestrator bounds concurrency instead.
#[async_trait]
pub trait BlobSink: Send + Sync {
    async fn upload(&self, document: &LocalDocument) -> Result<String, UploadError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Record store
// ═══════════════════════════════════════════════════════════════════════

/// Owner of every [`GazetteRecord`].
///
/// `create` is the idempotence boundary of the whole system: concurrent or
/// repeated calls with the same `public_url` must leave exactly one row and
/// report `created = true` to exactly one caller.
#[async_trait]
pub trait GazetteStore: Send + Sync {
    async fn create(&self, new: &NewGazette) -> Result<CreateOutcome, StoreError>;

    /// Records ordered by `(publication_date, id)`. A filter restricts to one
    /// month; paging only applies to the unfiltered listing.
    async fn list(
        &self,
        filter: Option<YearMonth>,
        page: Page,
    ) -> Result<Vec<GazetteRecord>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<GazetteRecord>, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Query service client
// ═══════════════════════════════════════════════════════════════════════

/// The request/response contract of the Query Service, as seen by clients.
///
/// The pipeline persists only through this trait so validation and
/// idempotence are enforced in one place for every caller.
/// [`PersistError::Unavailable`] from `create` ends a harvest run;
/// [`PersistError::Rejected`] fails only that document.
#[async_trait]
pub trait GazetteApi: Send + Sync {
    async fn create(&self, new: &NewGazette) -> Result<CreateOutcome, PersistError>;

    async fn list(&self, filter: Option<YearMonth>) -> Result<Vec<GazetteRecord>, PersistError>;
}
