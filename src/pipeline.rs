//! Harvest orchestration.
//!
//! One invocation covers one month:
//!
//! ```text
//! DocumentSource ──(sequential download)──▶ worker pool (N) ──▶ BlobSink.upload
//!                                                              └──▶ GazetteApi.create
//! ```
//!
//! Each document moves `Discovered → Uploaded → Persisted`, or to `Failed`
//! at whichever step broke. Per-document failures are counted, never
//! propagated. Two things end a run: a failed discovery, and a create call
//! that finds the Query Service unavailable. In the second case no new
//! documents are dispatched, workers already running are drained, and the
//! partial summary travels in [`HarvestError::StoreUnavailable`]. There are
//! no retries inside a run; running again is safe because create is
//! idempotent.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use futures::StreamExt;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::api_client::HttpGazetteApi;
use crate::blob::HttpBlobSink;
use crate::config::Config;
use crate::errors::{FetchError, HarvestError, PersistError};
use crate::models::NewGazette;
use crate::period::YearMonth;
use crate::source::{LocalDocument, PortalSource};
use crate::traits::{BlobSink, DocumentSource, GazetteApi};

/// Aggregate counts for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub discovered: usize,
    pub uploaded: usize,
    pub created: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn persisted(&self) -> usize {
        self.created + self.duplicates
    }

    fn record(&mut self, outcome: &DocumentOutcome) {
        match outcome {
            DocumentOutcome::Persisted { created } => {
                self.uploaded += 1;
                if *created {
                    self.created += 1;
                } else {
                    self.duplicates += 1;
                }
            }
            DocumentOutcome::Failed { stage, .. } => {
                if *stage == Stage::Persist {
                    self.uploaded += 1;
                }
                self.failed += 1;
            }
            DocumentOutcome::StoreUnavailable { .. } => {
                self.uploaded += 1;
                self.failed += 1;
            }
            // Unknown how far it got, so it only counts as failed.
            DocumentOutcome::Panicked { .. } => {
                self.failed += 1;
            }
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  discovered: {}", self.discovered)?;
        writeln!(f, "  uploaded: {}", self.uploaded)?;
        writeln!(f, "  persisted (new): {}", self.created)?;
        writeln!(f, "  persisted (duplicate): {}", self.duplicates)?;
        write!(f, "  failed: {}", self.failed)
    }
}

/// Step at which a document failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Upload,
    Persist,
}

/// Terminal state of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Persisted { created: bool },
    Failed { stage: Stage, reason: String },
    /// Uploaded, but the create call could not reach the store. Fails the
    /// document and stops the run.
    StoreUnavailable { reason: String },
    /// The worker task panicked.
    Panicked { reason: String },
}

/// The wired-up pipeline. Collaborators are trait objects so tests and
/// alternative back-ends can stand in for the portal, host and API.
pub struct Pipeline {
    source: Arc<dyn DocumentSource>,
    sink: Arc<dyn BlobSink>,
    api: Arc<dyn GazetteApi>,
    workers: usize,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        sink: Arc<dyn BlobSink>,
        api: Arc<dyn GazetteApi>,
        workers: usize,
    ) -> Self {
        Self {
            source,
            sink,
            api,
            workers: workers.max(1),
        }
    }

    /// Build the production pipeline from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = PortalSource::new(config.portal.clone());
        let sink = HttpBlobSink::new(config.upload.clone()).context("building upload client")?;
        let api = HttpGazetteApi::from_config(&config.pipeline)
            .context("building query service client")?;
        Ok(Self::new(
            Arc::new(source),
            Arc::new(sink),
            Arc::new(api),
            config.pipeline.workers,
        ))
    }

    /// Harvest `period`.
    pub async fn run(&self, period: YearMonth) -> Result<BatchSummary, HarvestError> {
        tracing::info!(%period, workers = self.workers, "starting harvest");

        let mut documents = self.source.fetch_month(period).await?;
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let halted = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let mut summary = BatchSummary::default();

        loop {
            // Hold a slot before pulling the next document so at most
            // `workers` files are staged and in flight at once.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            // Workers raise the flag before giving their slot back.
            if halted.load(Ordering::SeqCst) {
                tracing::warn!(%period, "query service unavailable, dispatch stopped");
                break;
            }
            let Some(item) = documents.next().await else {
                break;
            };
            summary.discovered += 1;

            let sink = self.sink.clone();
            let api = self.api.clone();
            let halted = halted.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = process_document(item, sink.as_ref(), api.as_ref()).await;
                if matches!(outcome, DocumentOutcome::StoreUnavailable { .. }) {
                    halted.store(true, Ordering::SeqCst);
                }
                outcome
            });
        }
        // Release the source (and its session) before draining.
        drop(documents);

        let mut unavailable: Option<String> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                tracing::error!(error = %e, "worker panicked");
                DocumentOutcome::Panicked {
                    reason: e.to_string(),
                }
            });
            if let DocumentOutcome::StoreUnavailable { reason } = &outcome {
                unavailable.get_or_insert_with(|| reason.clone());
            }
            summary.record(&outcome);
        }

        tracing::info!(
            %period,
            discovered = summary.discovered,
            uploaded = summary.uploaded,
            created = summary.created,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "harvest finished"
        );

        match unavailable {
            Some(reason) => Err(HarvestError::StoreUnavailable { reason, summary }),
            None => Ok(summary),
        }
    }
}

/// Drive one document to a terminal state. The staged file is dropped (and
/// deleted) when this returns.
async fn process_document(
    item: Result<LocalDocument, FetchError>,
    sink: &dyn BlobSink,
    api: &dyn GazetteApi,
) -> DocumentOutcome {
    let document = match item {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(error = %e, "document fetch failed");
            return DocumentOutcome::Failed {
                stage: Stage::Fetch,
                reason: e.to_string(),
            };
        }
    };

    let public_url = match sink.upload(&document).await {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(file = %document.file_name(), error = %e, "upload failed");
            return DocumentOutcome::Failed {
                stage: Stage::Upload,
                reason: e.to_string(),
            };
        }
    };

    let new = NewGazette {
        publication_date: document.publication_date,
        public_url,
    };
    match api.create(&new).await {
        Ok(outcome) => {
            tracing::info!(
                id = outcome.record.id,
                date = %new.publication_date,
                created = outcome.created,
                "gazette persisted"
            );
            DocumentOutcome::Persisted {
                created: outcome.created,
            }
        }
        Err(e) => {
            tracing::warn!(url = %new.public_url, error = %e, "persist failed");
            let reason = e.to_string();
            match e {
                PersistError::Unavailable(_) => DocumentOutcome::StoreUnavailable { reason },
                PersistError::Rejected { .. } => DocumentOutcome::Failed {
                    stage: Stage::Persist,
                    reason,
                },
            }
        }
    }
}

/// The month a run started on `today` should harvest.
pub fn target_period(today: NaiveDate) -> Option<YearMonth> {
    YearMonth::previous_of(today)
}

/// CLI entry point: run for `period` (or last month) and print the summary.
pub async fn run_harvest(config: &Config, period: Option<YearMonth>) -> Result<BatchSummary> {
    let period = match period {
        Some(period) => period,
        None => {
            let today = chrono::Local::now().date_naive();
            target_period(today).with_context(|| format!("no month to harvest before {}", today))?
        }
    };
    let pipeline = Pipeline::from_config(config)?;

    report(period, pipeline.run(period).await)
}

/// Print the outcome of a run. A run cut short by the store still prints
/// what it got through, but fails so the process exits non-zero.
fn report(period: YearMonth, result: Result<BatchSummary, HarvestError>) -> Result<BatchSummary> {
    match result {
        Ok(summary) => {
            println!("harvest {}", period);
            println!("{}", summary);
            println!("ok");
            Ok(summary)
        }
        Err(HarvestError::StoreUnavailable { reason, summary }) => {
            println!("harvest {}", period);
            println!("{}", summary);
            bail!("harvest of {} aborted, query service unavailable: {}", period, reason)
        }
        Err(HarvestError::Discovery(e)) => {
            Err(anyhow::Error::new(e).context(format!("discovery failed for {}", period)))
        }
    }
}
