//! Error taxonomy for the harvesting pipeline and the record store.
//!
//! Batch-level failures ([`HarvestError`]) abort a run: discovery failure,
//! or the Query Service becoming unavailable. Per-document failures
//! ([`FetchError`], [`UploadError`], [`PersistError::Rejected`]) are counted
//! in the batch summary and never stop the remaining documents.

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::BatchSummary;

/// Why a harvest run stopped early.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Dispatch stopped after a create call could not reach the store.
    /// `summary` covers the documents handled up to that point.
    #[error("run aborted, query service unavailable: {reason}")]
    StoreUnavailable {
        reason: String,
        summary: BatchSummary,
    },
}

/// The portal could not be queried or its listing could not be read.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("portal request failed: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("portal returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid portal url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("could not prepare staging directory {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One listed document could not be turned into a local file.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no publication date found for {link}")]
    MissingDate { link: String },

    #[error("download of {link} failed: {source}")]
    Download {
        link: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {link} returned HTTP {status}")]
    Status { link: String, status: u16 },

    #[error("could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The blob host rejected the file or could not be reached.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to upload empty file {0}")]
    EmptyFile(PathBuf),

    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upload rate-limited by host")]
    RateLimited,

    #[error("upload rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("upload host returned an empty URL")]
    EmptyUrl,
}

/// Record store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("record store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// Client-side failure of the create contract on the Query Service.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("query service rejected the record (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("query service unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for PersistError {
    fn from(err: reqwest::Error) -> Self {
        PersistError::Unavailable(err.to_string())
    }
}
