//! End-to-end pipeline tests.
//!
//! The portal and file host are replaced by in-process fakes; persistence
//! goes through the real Query Service over HTTP, exactly as in production.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use gazette_harvest::api_client::HttpGazetteApi;
use gazette_harvest::config::Config;
use gazette_harvest::errors::{DiscoveryError, FetchError, HarvestError, PersistError, UploadError};
use gazette_harvest::migrate;
use gazette_harvest::models::{CreateOutcome, GazetteRecord, NewGazette};
use gazette_harvest::period::YearMonth;
use gazette_harvest::pipeline::{BatchSummary, Pipeline};
use gazette_harvest::server::run_server;
use gazette_harvest::source::LocalDocument;
use gazette_harvest::traits::{BlobSink, DocumentSource, DocumentStream, GazetteApi};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ─── Fakes ──────────────────────────────────────────────────────────

/// Serves a fixed set of documents, written to disk when the stream is polled.
struct FakeSource {
    dir: PathBuf,
    /// (file name, day of month); `None` day simulates a failed fetch.
    entries: Vec<(String, Option<u32>)>,
    unreachable: bool,
}

impl FakeSource {
    fn new(dir: PathBuf, entries: Vec<(&str, Option<u32>)>) -> Self {
        Self {
            dir,
            entries: entries
                .into_iter()
                .map(|(n, d)| (n.to_string(), d))
                .collect(),
            unreachable: false,
        }
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn fetch_month(&self, period: YearMonth) -> Result<DocumentStream, DiscoveryError> {
        if self.unreachable {
            return Err(DiscoveryError::Status {
                status: 502,
                url: "http://portal.test/diario".to_string(),
            });
        }

        let dir = self.dir.clone();
        let entries = self.entries.clone();
        let documents = stream::iter(entries)
            .map(move |(name, day)| {
                let Some(day) = day else {
                    return Err(FetchError::MissingDate { link: name });
                };
                let path = dir.join(&name);
                std::fs::write(&path, format!("%PDF-1.4 {}", name)).unwrap();
                let date = NaiveDate::from_ymd_opt(period.year(), period.month(), day).unwrap();
                Ok(LocalDocument::new(path, date, format!("http://portal.test/{}", name)))
            })
            .boxed();
        Ok(documents)
    }
}

/// Returns `https://files.test/<file name>`; fails for names listed in `reject`.
/// Tracks the peak number of concurrent uploads.
struct FakeSink {
    reject: Vec<String>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl FakeSink {
    fn new(reject: &[&str]) -> Self {
        Self {
            reject: reject.iter().map(|s| s.to_string()).collect(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BlobSink for FakeSink {
    async fn upload(&self, document: &LocalDocument) -> Result<String, UploadError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        assert!(document.path.exists(), "staged file must exist during upload");
        let name = document.file_name();
        self.seen.lock().unwrap().push(name.clone());

        if self.reject.contains(&name) {
            return Err(UploadError::RateLimited);
        }
        Ok(format!("https://files.test/{}", name))
    }
}

/// Delegates to the real service except for one URL, which fails the way
/// the service would when it rejects a record or loses its database.
struct FlakyApi {
    inner: Arc<HttpGazetteApi>,
    fail_on: &'static str,
    unavailable: bool,
}

#[async_trait]
impl GazetteApi for FlakyApi {
    async fn create(&self, new: &NewGazette) -> Result<CreateOutcome, PersistError> {
        if new.public_url.ends_with(self.fail_on) {
            return Err(if self.unavailable {
                PersistError::Unavailable("HTTP 503: database is locked".to_string())
            } else {
                PersistError::Rejected {
                    status: 400,
                    message: "public_url must not be empty".to_string(),
                }
            });
        }
        self.inner.create(new).await
    }

    async fn list(&self, filter: Option<YearMonth>) -> Result<Vec<GazetteRecord>, PersistError> {
        self.inner.list(filter).await
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn test_config(tmp: &TempDir, port: u16) -> Config {
    let config_content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:{}"

[portal]
url = "http://127.0.0.1:1/diario"

[upload]
url = "http://127.0.0.1:1/upload"

[pipeline]
workers = 2
api_base_url = "http://127.0.0.1:{}/api"
"#,
        tmp.path().join("gazettes.sqlite").display(),
        port,
        port
    );
    toml::from_str(&config_content).unwrap()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start the Query Service and return a client for it.
async fn start_service(tmp: &TempDir) -> (Config, Arc<HttpGazetteApi>) {
    let port = find_free_port();
    let cfg = test_config(tmp, port);
    migrate::run_migrations(&cfg).await.unwrap();

    let server_cfg = cfg.clone();
    tokio::spawn(async move {
        run_server(&server_cfg).await.unwrap();
    });
    wait_for_server(port).await;

    let api = Arc::new(HttpGazetteApi::from_config(&cfg.pipeline).unwrap());
    (cfg, api)
}

fn staging(tmp: &TempDir) -> PathBuf {
    let dir = tmp.path().join("downloads");
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn august() -> YearMonth {
    YearMonth::new(2025, 8).unwrap()
}

fn five_documents() -> Vec<(&'static str, Option<u32>)> {
    vec![
        ("20250801.pdf", Some(1)),
        ("20250805.pdf", Some(5)),
        ("20250812.pdf", Some(12)),
        ("20250819.pdf", Some(19)),
        ("20250826.pdf", Some(26)),
    ]
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_failure_is_isolated() {
    let tmp = TempDir::new().unwrap();
    let (cfg, api) = start_service(&tmp).await;
    let dir = staging(&tmp);

    let sink = Arc::new(FakeSink::new(&["20250812.pdf"]));
    let pipeline = Pipeline::new(
        Arc::new(FakeSource::new(dir.clone(), five_documents())),
        sink.clone(),
        api.clone(),
        cfg.pipeline.workers,
    );

    let summary = pipeline.run(august()).await.unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            discovered: 5,
            uploaded: 4,
            created: 4,
            duplicates: 0,
            failed: 1,
        }
    );
    assert_eq!(summary.persisted(), 4);

    let stored = api.list(Some(august())).await.unwrap();
    assert_eq!(stored.len(), 4);
    assert!(stored
        .iter()
        .all(|r| r.public_url != "https://files.test/20250812.pdf"));
    assert_eq!(sink.seen.lock().unwrap().len(), 5);

    // Every staged file is cleaned up once processed.
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_empty_period_yields_empty_summary() {
    let tmp = TempDir::new().unwrap();
    let (_cfg, api) = start_service(&tmp).await;

    let pipeline = Pipeline::new(
        Arc::new(FakeSource::new(staging(&tmp), vec![])),
        Arc::new(FakeSink::new(&[])),
        api.clone(),
        3,
    );

    let summary = pipeline.run(august()).await.unwrap();
    assert_eq!(summary, BatchSummary::default());
    assert!(api.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rerun_reports_duplicates_without_new_rows() {
    let tmp = TempDir::new().unwrap();
    let (_cfg, api) = start_service(&tmp).await;
    let dir = staging(&tmp);

    let pipeline = Pipeline::new(
        Arc::new(FakeSource::new(dir, five_documents())),
        Arc::new(FakeSink::new(&[])),
        api.clone(),
        4,
    );

    let first = pipeline.run(august()).await.unwrap();
    assert_eq!(first.created, 5);

    let second = pipeline.run(august()).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.duplicates, 5);
    assert_eq!(second.failed, 0);

    assert_eq!(api.list(None).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_fetch_failure_counts_as_failed_document() {
    let tmp = TempDir::new().unwrap();
    let (_cfg, api) = start_service(&tmp).await;

    let pipeline = Pipeline::new(
        Arc::new(FakeSource::new(
            staging(&tmp),
            vec![("20250801.pdf", Some(1)), ("suplemento.pdf", None)],
        )),
        Arc::new(FakeSink::new(&[])),
        api.clone(),
        2,
    );

    let summary = pipeline.run(august()).await.unwrap();
    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_discovery_failure_aborts_run() {
    let tmp = TempDir::new().unwrap();
    let (_cfg, api) = start_service(&tmp).await;

    let mut source = FakeSource::new(staging(&tmp), five_documents());
    source.unreachable = true;
    let sink = Arc::new(FakeSink::new(&[]));
    let pipeline = Pipeline::new(Arc::new(source), sink.clone(), api, 2);

    let result = pipeline.run(august()).await;
    assert!(matches!(
        result,
        Err(HarvestError::Discovery(DiscoveryError::Status { status: 502, .. }))
    ));
    assert!(sink.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_worker_pool_is_bounded() {
    let tmp = TempDir::new().unwrap();
    let (_cfg, api) = start_service(&tmp).await;

    let names: Vec<String> = (1..=20).map(|d| format!("202508{:02}.pdf", d)).collect();
    let entries: Vec<(&str, Option<u32>)> = names
        .iter()
        .zip(1..)
        .map(|(n, d)| (n.as_str(), Some(d)))
        .collect();

    let sink = Arc::new(FakeSink::new(&[]));
    let pipeline = Pipeline::new(
        Arc::new(FakeSource::new(staging(&tmp), entries)),
        sink.clone(),
        api,
        3,
    );

    let summary = pipeline.run(august()).await.unwrap();
    assert_eq!(summary.created, 20);
    let peak = sink.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {} exceeded pool size", peak);
    assert!(peak >= 2, "uploads never overlapped (peak {})", peak);
}

#[tokio::test]
async fn test_service_down_aborts_before_next_upload() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let api = Arc::new(HttpGazetteApi::new(&format!("http://127.0.0.1:{}/api", port), 5).unwrap());
    let dir = staging(&tmp);

    let sink = Arc::new(FakeSink::new(&[]));
    let pipeline = Pipeline::new(
        Arc::new(FakeSource::new(dir.clone(), five_documents())),
        sink.clone(),
        api,
        1,
    );

    match pipeline.run(august()).await {
        Err(HarvestError::StoreUnavailable { summary, .. }) => {
            assert_eq!(
                summary,
                BatchSummary {
                    discovered: 1,
                    uploaded: 1,
                    created: 0,
                    duplicates: 0,
                    failed: 1,
                }
            );
        }
        other => panic!("expected StoreUnavailable, got {:?}", other),
    }

    // Nothing was uploaded after the first unreachable create.
    assert_eq!(*sink.seen.lock().unwrap(), vec!["20250801.pdf".to_string()]);
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_store_unavailable_mid_run_keeps_earlier_records() {
    let tmp = TempDir::new().unwrap();
    let (_cfg, api) = start_service(&tmp).await;

    let sink = Arc::new(FakeSink::new(&[]));
    let flaky = Arc::new(FlakyApi {
        inner: api.clone(),
        fail_on: "20250812.pdf",
        unavailable: true,
    });
    let pipeline = Pipeline::new(
        Arc::new(FakeSource::new(staging(&tmp), five_documents())),
        sink.clone(),
        flaky,
        1,
    );

    let (reason, summary) = match pipeline.run(august()).await {
        Err(HarvestError::StoreUnavailable { reason, summary }) => (reason, summary),
        other => panic!("expected StoreUnavailable, got {:?}", other),
    };
    assert!(reason.contains("503"), "{}", reason);
    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.uploaded, 3);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.failed, 1);

    assert_eq!(sink.seen.lock().unwrap().len(), 3);
    assert_eq!(api.list(Some(august())).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rejected_record_fails_only_that_document() {
    let tmp = TempDir::new().unwrap();
    let (_cfg, api) = start_service(&tmp).await;

    let flaky = Arc::new(FlakyApi {
        inner: api.clone(),
        fail_on: "20250812.pdf",
        unavailable: false,
    });
    let pipeline = Pipeline::new(
        Arc::new(FakeSource::new(staging(&tmp), five_documents())),
        Arc::new(FakeSink::new(&[])),
        flaky,
        2,
    );

    let summary = pipeline.run(august()).await.unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            discovered: 5,
            uploaded: 5,
            created: 4,
            duplicates: 0,
            failed: 1,
        }
    );
    assert_eq!(api.list(None).await.unwrap().len(), 4);
}
