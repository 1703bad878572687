//! Insider trade sync: job configuration, merge engine and run orchestration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use insider_adapters::{Collector, FixtureCollector, OpenInsiderCollector, DEFAULT_SCREENER_URL};
use insider_storage::{
    BackoffPolicy, FileSheetStore, GoogleSheetsConfig, GoogleSheetsStore, HttpClientConfig,
    HttpFetcher, PageArchive, ServiceAccountKey, SheetStore, ValueInputOption,
};
use tracing::info;

pub mod job;
pub mod merge;
pub mod notify;

pub use job::{write_run_report, JobError, JobFailure, JobState, SyncJob, SyncRunSummary};
pub use merge::{existing_keys, merge_new_trades, MergeOutcome};
pub use notify::{notify_best_effort, NoopNotifier, NotificationError, Notifier, WebhookNotifier};

pub const CRATE_NAME: &str = "insider-sync";

pub const DEFAULT_SAMPLE_ROWS: usize = 500;

/// Largest sample a 10M-cell spreadsheet can hold at one trade per row.
pub const MAX_SAMPLE_ROWS: usize = 10_000_000 / insider_core::COLUMN_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sheets,
    File,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub store_backend: StoreBackend,
    pub store_path: PathBuf,
    pub spreadsheet_id: Option<String>,
    pub credentials_path: Option<PathBuf>,
    pub sheet_name: String,
    pub sheet_gid: i64,
    pub value_input: ValueInputOption,
    /// Dedup window; keep it above the rows one run can add plus a margin.
    pub sample_rows: usize,
    pub source_url: String,
    pub fixture_html: Option<PathBuf>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub artifacts_dir: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub notify_webhook_url: Option<String>,
}

impl JobConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let store_backend = match var("INSIDER_STORE").as_deref().map(str::trim) {
            None | Some("sheets") => StoreBackend::Sheets,
            Some("file") => StoreBackend::File,
            Some(other) => bail!("INSIDER_STORE must be `sheets` or `file`, got {other:?}"),
        };

        let sample_rows = match var("INSIDER_SAMPLE_ROWS") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .with_context(|| format!("parsing INSIDER_SAMPLE_ROWS={v:?}"))?,
            None => DEFAULT_SAMPLE_ROWS,
        };
        if sample_rows == 0 {
            bail!("INSIDER_SAMPLE_ROWS must be at least 1");
        }
        if sample_rows > MAX_SAMPLE_ROWS {
            bail!("INSIDER_SAMPLE_ROWS must be at most {MAX_SAMPLE_ROWS}, got {sample_rows}");
        }

        let http_timeout_secs = match var("INSIDER_HTTP_TIMEOUT_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("parsing INSIDER_HTTP_TIMEOUT_SECS={v:?}"))?,
            None => 20,
        };
        if http_timeout_secs == 0 {
            bail!("INSIDER_HTTP_TIMEOUT_SECS must be at least 1");
        }

        let http_max_retries = match var("INSIDER_HTTP_MAX_RETRIES") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .with_context(|| format!("parsing INSIDER_HTTP_MAX_RETRIES={v:?}"))?,
            None => 0,
        };

        let value_input = match var("INSIDER_VALUE_INPUT") {
            Some(v) => v
                .parse::<ValueInputOption>()
                .map_err(anyhow::Error::msg)
                .context("parsing INSIDER_VALUE_INPUT")?,
            None => ValueInputOption::default(),
        };

        let sheet_gid = match var("INSIDER_SHEET_GID") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("parsing INSIDER_SHEET_GID={v:?}"))?,
            None => 0,
        };

        Ok(Self {
            store_backend,
            store_path: var("INSIDER_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./insider_trades.json")),
            spreadsheet_id: var("SPREADSHEET_ID"),
            credentials_path: var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            sheet_name: var("INSIDER_SHEET_NAME").unwrap_or_else(|| "Sheet1".to_string()),
            sheet_gid,
            value_input,
            sample_rows,
            source_url: var("INSIDER_SOURCE_URL").unwrap_or_else(|| DEFAULT_SCREENER_URL.to_string()),
            fixture_html: var("INSIDER_FIXTURE_HTML").map(PathBuf::from),
            user_agent: var("INSIDER_USER_AGENT")
                .unwrap_or_else(|| "Mozilla/5.0 (compatible; insider-ledger/0.1)".to_string()),
            http_timeout_secs,
            http_max_retries,
            artifacts_dir: var("INSIDER_ARTIFACTS_DIR").map(PathBuf::from),
            reports_dir: var("INSIDER_REPORTS_DIR").map(PathBuf::from),
            notify_webhook_url: var("INSIDER_NOTIFY_WEBHOOK_URL"),
        })
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.http_max_retries,
                ..Default::default()
            },
        }
    }

    pub fn build_collector(&self) -> Result<Box<dyn Collector>> {
        if let Some(path) = &self.fixture_html {
            info!(path = %path.display(), "collecting from saved screener page");
            return Ok(Box::new(FixtureCollector::new(path.clone())));
        }
        let http = HttpFetcher::new(self.http_config())?;
        let mut collector = OpenInsiderCollector::new(http, self.source_url.clone());
        if let Some(dir) = &self.artifacts_dir {
            collector = collector.with_archive(PageArchive::new(dir.clone()));
        }
        Ok(Box::new(collector))
    }

    pub async fn build_store(&self) -> Result<Box<dyn SheetStore>> {
        match self.store_backend {
            StoreBackend::File => Ok(Box::new(FileSheetStore::new(self.store_path.clone()))),
            StoreBackend::Sheets => {
                let spreadsheet_id = self
                    .spreadsheet_id
                    .clone()
                    .context("SPREADSHEET_ID is required for the sheets store")?;
                let credentials = self
                    .credentials_path
                    .as_ref()
                    .context("GOOGLE_APPLICATION_CREDENTIALS is required for the sheets store")?;
                let key = ServiceAccountKey::from_file(credentials)
                    .await
                    .with_context(|| format!("loading service account key {}", credentials.display()))?;
                let config = GoogleSheetsConfig {
                    sheet_name: self.sheet_name.clone(),
                    sheet_gid: self.sheet_gid,
                    value_input: self.value_input,
                    ..GoogleSheetsConfig::new(spreadsheet_id)
                };
                Ok(Box::new(GoogleSheetsStore::new(&self.http_config(), config, key)?))
            }
        }
    }

    pub fn build_notifier(&self) -> Result<Box<dyn Notifier>> {
        match &self.notify_webhook_url {
            Some(url) => {
                let client = self.http_config().build_client()?;
                Ok(Box::new(WebhookNotifier::new(client, url.clone())))
            }
            None => Ok(Box::<NoopNotifier>::default()),
        }
    }

    pub async fn build_job(&self) -> Result<SyncJob> {
        let job = SyncJob::new(self.build_collector()?, self.build_store().await?, self.sample_rows)
            .with_notifier(self.build_notifier()?)
            .with_reports_dir(self.reports_dir.clone());
        Ok(job)
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = JobConfig::from_env()?;
    let job = config.build_job().await?;
    Ok(job.run_once().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<JobConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        JobConfig::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn defaults_target_sheets_with_500_row_sample() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Sheets);
        assert_eq!(config.sample_rows, DEFAULT_SAMPLE_ROWS);
        assert_eq!(config.sheet_name, "Sheet1");
        assert_eq!(config.sheet_gid, 0);
        assert_eq!(config.value_input, ValueInputOption::UserEntered);
        assert_eq!(config.source_url, DEFAULT_SCREENER_URL);
        assert_eq!(config.http_max_retries, 0);
        assert!(config.notify_webhook_url.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("INSIDER_STORE", "file"),
            ("INSIDER_STORE_PATH", "/tmp/ledger.json"),
            ("INSIDER_SAMPLE_ROWS", "1000"),
            ("INSIDER_VALUE_INPUT", "raw"),
            ("INSIDER_SHEET_GID", "12345"),
            ("INSIDER_NOTIFY_WEBHOOK_URL", "https://hooks.example.com/x"),
            ("INSIDER_REPORTS_DIR", ""),
        ])
        .unwrap();
        assert_eq!(config.store_backend, StoreBackend::File);
        assert_eq!(config.store_path, PathBuf::from("/tmp/ledger.json"));
        assert_eq!(config.sample_rows, 1000);
        assert_eq!(config.value_input, ValueInputOption::Raw);
        assert_eq!(config.sheet_gid, 12345);
        assert!(config.reports_dir.is_none());
    }

    #[test]
    fn rejects_zero_sample_and_unknown_store() {
        assert!(config_from(&[("INSIDER_SAMPLE_ROWS", "0")]).is_err());
        assert!(config_from(&[("INSIDER_SAMPLE_ROWS", "many")]).is_err());
        assert!(config_from(&[("INSIDER_STORE", "postgres")]).is_err());
    }

    #[test]
    fn rejects_sample_larger_than_a_spreadsheet() {
        let at_limit = MAX_SAMPLE_ROWS.to_string();
        let config = config_from(&[("INSIDER_SAMPLE_ROWS", &at_limit)]).unwrap();
        assert_eq!(config.sample_rows, MAX_SAMPLE_ROWS);

        let over = (MAX_SAMPLE_ROWS + 1).to_string();
        let err = config_from(&[("INSIDER_SAMPLE_ROWS", &over)]).unwrap_err();
        assert!(err.to_string().contains("at most"));

        let huge = usize::MAX.to_string();
        assert!(config_from(&[("INSIDER_SAMPLE_ROWS", &huge)]).is_err());
    }

    #[test]
    fn rejects_zero_or_garbled_http_settings() {
        let err = config_from(&[("INSIDER_HTTP_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("INSIDER_HTTP_TIMEOUT_SECS"));
        assert!(config_from(&[("INSIDER_HTTP_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config_from(&[("INSIDER_HTTP_MAX_RETRIES", "-1")]).is_err());

        let config = config_from(&[
            ("INSIDER_HTTP_TIMEOUT_SECS", "5"),
            ("INSIDER_HTTP_MAX_RETRIES", "2"),
        ])
        .unwrap();
        assert_eq!(config.http_config().timeout, Duration::from_secs(5));
        assert_eq!(config.http_config().backoff.max_retries, 2);
    }

    #[tokio::test]
    async fn sheets_store_requires_spreadsheet_id() {
        let config = config_from(&[]).unwrap();
        let Err(err) = config.build_store().await else {
            panic!("sheets store built without a spreadsheet id");
        };
        assert!(err.to_string().contains("SPREADSHEET_ID"));
    }

    #[tokio::test]
    async fn fixture_config_builds_a_runnable_job() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/openinsider/screener.html");
        let store_path = dir.path().join("ledger.json");
        let config = config_from(&[
            ("INSIDER_STORE", "file"),
            ("INSIDER_STORE_PATH", store_path.to_str().unwrap()),
            ("INSIDER_FIXTURE_HTML", fixture.to_str().unwrap()),
        ])
        .unwrap();

        let summary = config.build_job().await.unwrap().run_once().await.unwrap();
        assert_eq!(summary.inserted, 4);
        assert_eq!(summary.final_state(), JobState::Done);
    }
}
