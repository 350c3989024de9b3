//! Municipal portal document source.
//!
//! Queries the gazette portal for one month, reads the result table, and
//! downloads each listed document into a per-run staging directory.
//!
//! # Session lifetime
//!
//! A [`PortalSession`] owns the HTTP client and the staging directory for
//! one `fetch_month` call. It is created before the search and released
//! when it is dropped:
//!
//! - if discovery fails, the session is dropped on the early return;
//! - otherwise the returned stream and every [`LocalDocument`] hold a share
//!   of it, and the staging directory is removed once all of them are gone.
//!
//! Each [`LocalDocument`] also removes its own file on drop, so a processed
//! document never lingers on disk.
//!
//! # Portal contract
//!
//! ```text
//! GET {portal.url}?{month_param}=MM&{year_param}=YYYY
//!   → HTML with a results <table>; each row links one PDF, labelled DD/MM/YYYY
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Url;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::PortalConfig;
use crate::errors::{DiscoveryError, FetchError};
use crate::period::YearMonth;
use crate::traits::{DocumentSource, DocumentStream};

static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b.*?</table>").expect("valid table regex"));
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .expect("valid anchor regex")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static LABEL_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})/(\d{2})/(\d{4})").expect("valid label date regex"));
static FILE_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{8})").expect("valid file date regex"));

// ═══════════════════════════════════════════════════════════════════════
// Local documents
// ═══════════════════════════════════════════════════════════════════════

/// A downloaded gazette on local disk. The file is deleted when this is dropped.
#[derive(Debug)]
pub struct LocalDocument {
    pub path: PathBuf,
    pub publication_date: NaiveDate,
    /// Where the file came from (the portal link).
    pub origin: String,
    _staging: Option<Arc<StagingDir>>,
}

impl LocalDocument {
    /// Wrap an existing file. Ownership of the file passes to the handle.
    pub fn new(path: PathBuf, publication_date: NaiveDate, origin: impl Into<String>) -> Self {
        Self {
            path,
            publication_date,
            origin: origin.into(),
            _staging: None,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string())
    }
}

impl Drop for LocalDocument {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed staged file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "could not remove staged file"),
        }
    }
}

/// Per-run directory under `download_dir`, removed on drop.
#[derive(Debug)]
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    fn create(root: &Path) -> Result<Self, DiscoveryError> {
        let path = root.join(format!("run-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(|source| DiscoveryError::Staging {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path })
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "could not remove staging directory");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Portal session
// ═══════════════════════════════════════════════════════════════════════

/// One link found in the results table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedDocument {
    pub url: Url,
    pub label: String,
    pub publication_date: Option<NaiveDate>,
}

/// Scoped portal resources: released when the last owner drops it.
struct PortalSession {
    client: reqwest::Client,
    staging: Arc<StagingDir>,
}

impl PortalSession {
    fn open(config: &PortalConfig) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let staging = Arc::new(StagingDir::create(&config.download_dir)?);
        tracing::debug!(staging = %staging.path.display(), "portal session opened");
        Ok(Self { client, staging })
    }

    async fn search(&self, url: &Url) -> Result<String, DiscoveryError> {
        let resp = self.client.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(DiscoveryError::Status {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.text().await?)
    }

    async fn download(&self, index: usize, listed: ListedDocument) -> Result<LocalDocument, FetchError> {
        let link = listed.url.to_string();
        let publication_date = listed
            .publication_date
            .ok_or_else(|| FetchError::MissingDate { link: link.clone() })?;

        let mut resp = self
            .client
            .get(listed.url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Download {
                link: link.clone(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                link,
                status: resp.status().as_u16(),
            });
        }

        let path = self
            .staging
            .path
            .join(format!("{:03}-{}", index, file_name_for(&listed.url)));
        let io_err = |source: std::io::Error| FetchError::Io {
            path: path.clone(),
            source,
        };

        let mut file = tokio::fs::File::create(&path).await.map_err(io_err)?;
        // From here on a failure drops the handle and deletes the partial file.
        let document = LocalDocument {
            path: path.clone(),
            publication_date,
            origin: link.clone(),
            _staging: Some(self.staging.clone()),
        };

        while let Some(chunk) = resp.chunk().await.map_err(|source| FetchError::Download {
            link: link.clone(),
            source,
        })? {
            file.write_all(&chunk).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;

        tracing::debug!(link = %link, path = %path.display(), "downloaded gazette");
        Ok(document)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// DocumentSource implementation
// ═══════════════════════════════════════════════════════════════════════

pub struct PortalSource {
    config: PortalConfig,
}

impl PortalSource {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }

    fn listing_url(&self, period: YearMonth) -> Result<Url, DiscoveryError> {
        let mut url = Url::parse(&self.config.url).map_err(|e| DiscoveryError::InvalidUrl {
            url: self.config.url.clone(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair(&self.config.month_param, &format!("{:02}", period.month()))
            .append_pair(&self.config.year_param, &format!("{:04}", period.year()));
        Ok(url)
    }
}

#[async_trait]
impl DocumentSource for PortalSource {
    async fn fetch_month(&self, period: YearMonth) -> Result<DocumentStream, DiscoveryError> {
        let listing_url = self.listing_url(period)?;
        let session = PortalSession::open(&self.config)?;

        tracing::info!(%period, url = %listing_url, "searching portal");
        let html = session.search(&listing_url).await?;
        let listed = discover_links(&html, &listing_url, period);
        tracing::info!(%period, count = listed.len(), "found gazette links");

        let session = Arc::new(session);
        let documents = stream::iter(listed.into_iter().enumerate())
            .then(move |(index, doc)| {
                let session = session.clone();
                async move { session.download(index, doc).await }
            })
            .boxed();

        Ok(documents)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// HTML helpers
// ═══════════════════════════════════════════════════════════════════════

/// Extract document links for `period` from a portal results page.
///
/// Only anchors inside `<table>` elements count. Links are resolved against
/// `base`, de-duplicated, and dropped when their date is known to fall in
/// another month. Links with no derivable date are kept so the fetch can
/// report them.
pub fn discover_links(html: &str, base: &Url, period: YearMonth) -> Vec<ListedDocument> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for table in TABLE_RE.find_iter(html) {
        for cap in ANCHOR_RE.captures_iter(table.as_str()) {
            let href = cap[1].trim().replace("&amp;", "&");
            let Ok(url) = base.join(&href) else {
                tracing::debug!(href = %href, "skipping unresolvable link");
                continue;
            };
            if !matches!(url.scheme(), "http" | "https") || !seen.insert(url.to_string()) {
                continue;
            }

            let label = clean_label(&cap[2]);
            let publication_date = date_from_label(&label).or_else(|| date_from_url(&url));

            if let Some(date) = publication_date {
                if !period.contains(date) {
                    tracing::debug!(url = %url, %date, "skipping link outside target month");
                    continue;
                }
            }

            out.push(ListedDocument {
                url,
                label,
                publication_date,
            });
        }
    }

    out
}

fn clean_label(raw: &str) -> String {
    TAG_RE
        .replace_all(raw, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `DD/MM/YYYY` anywhere in the anchor label.
pub fn date_from_label(label: &str) -> Option<NaiveDate> {
    let cap = LABEL_DATE_RE.captures(label)?;
    let day = cap[1].parse().ok()?;
    let month = cap[2].parse().ok()?;
    let year = cap[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `YYYYMMDD` in the last path segment, as the portal names its files.
pub fn date_from_url(url: &Url) -> Option<NaiveDate> {
    let name = url.path_segments()?.next_back()?;
    FILE_DATE_RE
        .captures_iter(name)
        .find_map(|cap| NaiveDate::parse_from_str(&cap[1], "%Y%m%d").ok())
}

/// Filesystem-safe name derived from the URL's last path segment.
fn file_name_for(url: &Url) -> String {
    let name = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("document.pdf");
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
