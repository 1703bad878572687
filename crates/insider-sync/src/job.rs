//! One sync run: headers, collect, sample, merge, persist.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use insider_adapters::{CollectContext, CollectError, Collector};
use insider_core::InsiderTrade;
use insider_storage::{SheetStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::merge::merge_new_trades;
use crate::notify::{notify_best_effort, NoopNotifier, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Init,
    HeadersEnsured,
    Collected,
    SampleRead,
    Merged,
    Persisted,
    Done,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::HeadersEnsured => "headers_ensured",
            Self::Collected => "collected",
            Self::SampleRead => "sample_read",
            Self::Merged => "merged",
            Self::Persisted => "persisted",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("ensuring header row: {0}")]
    Headers(#[source] StoreError),
    #[error("collecting trades: {0}")]
    Collect(#[from] CollectError),
    #[error("inserting {count} rows: {source}")]
    Persist {
        count: usize,
        #[source]
        source: StoreError,
    },
}

impl JobError {
    /// Last state reached before the failing transition.
    pub fn failed_in(&self) -> JobState {
        match self {
            Self::Headers(_) => JobState::Init,
            Self::Collect(_) => JobState::HeadersEnsured,
            Self::Persist { .. } => JobState::Merged,
        }
    }
}

/// A failed run: the error plus the summary, whose states end in `Failed`.
#[derive(Debug, Error)]
#[error("sync run {} failed in {}: {error}", .summary.run_id, .error.failed_in())]
pub struct JobFailure {
    pub summary: SyncRunSummary,
    #[source]
    pub error: JobError,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub store: String,
    pub scraped: usize,
    pub sampled: usize,
    pub new_trades: usize,
    pub duplicates: usize,
    pub inserted: usize,
    /// The store sample could not be read and was treated as empty.
    pub sample_read_failed: bool,
    pub states: Vec<JobState>,
}

impl SyncRunSummary {
    fn new(run_id: Uuid, store: String) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            store,
            scraped: 0,
            sampled: 0,
            new_trades: 0,
            duplicates: 0,
            inserted: 0,
            sample_read_failed: false,
            states: vec![JobState::Init],
        }
    }

    fn advance(&mut self, state: JobState) {
        self.states.push(state);
    }

    pub fn final_state(&self) -> JobState {
        self.states.last().copied().unwrap_or(JobState::Init)
    }
}

pub struct SyncJob {
    collector: Box<dyn Collector>,
    store: Box<dyn SheetStore>,
    notifier: Box<dyn Notifier>,
    sample_rows: usize,
    reports_dir: Option<PathBuf>,
}

impl SyncJob {
    /// `sample_rows` must exceed the most rows a single run can add, plus margin,
    /// or older recorded trades fall out of the dedup window.
    pub fn new(collector: Box<dyn Collector>, store: Box<dyn SheetStore>, sample_rows: usize) -> Self {
        Self {
            collector,
            store,
            notifier: Box::<NoopNotifier>::default(),
            sample_rows,
            reports_dir: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_reports_dir(mut self, reports_dir: Option<PathBuf>) -> Self {
        self.reports_dir = reports_dir;
        self
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary, JobFailure> {
        let run_id = Uuid::new_v4();
        let store = self.store.describe();
        let span = info_span!("sync_run", %run_id, store = %store, source = self.collector.source_id());

        async move {
            let mut summary = SyncRunSummary::new(run_id, store);
            info!("starting insider trade sync");
            notify_best_effort(self.notifier.as_ref(), "Insider trade sync started").await;

            match self.drive(&mut summary).await {
                Ok(inserted) => {
                    summary.finished_at = Utc::now();
                    let message = if inserted.is_empty() {
                        "Insider trade sync finished: no new rows".to_string()
                    } else {
                        format!("Insider trade sync finished: added {} rows", inserted.len())
                    };
                    info!(inserted = summary.inserted, "{message}");
                    notify_best_effort(self.notifier.as_ref(), &message).await;

                    self.write_report(&summary, &inserted).await;
                    Ok(summary)
                }
                Err(error) => {
                    summary.finished_at = Utc::now();
                    summary.advance(JobState::Failed);
                    error!(state = %error.failed_in(), error = %error, "insider trade sync failed");
                    notify_best_effort(
                        self.notifier.as_ref(),
                        &format!("Insider trade sync failed: {error}"),
                    )
                    .await;
                    self.write_report(&summary, &[]).await;
                    Err(JobFailure { summary, error })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn write_report(&self, summary: &SyncRunSummary, inserted: &[InsiderTrade]) {
        let Some(dir) = &self.reports_dir else {
            return;
        };
        if let Err(err) = write_run_report(dir, summary, inserted).await {
            warn!(error = %err, "writing run report failed");
        }
    }

    async fn drive(&self, summary: &mut SyncRunSummary) -> Result<Vec<InsiderTrade>, JobError> {
        self.store.ensure_headers().await.map_err(JobError::Headers)?;
        summary.advance(JobState::HeadersEnsured);

        let ctx = CollectContext::new(summary.run_id);
        let scraped = self.collector.collect(&ctx).await?;
        summary.scraped = scraped.len();
        summary.advance(JobState::Collected);

        if scraped.is_empty() {
            info!("no trades scraped");
            summary.advance(JobState::Done);
            return Ok(Vec::new());
        }
        if scraped.len() > self.sample_rows {
            warn!(
                scraped = scraped.len(),
                sample_rows = self.sample_rows,
                "scrape is larger than the dedup sample; older recorded trades may be re-added"
            );
        }

        let sample = match self.store.read_top_rows(self.sample_rows).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "reading recorded rows failed; treating store as empty");
                summary.sample_read_failed = true;
                Vec::new()
            }
        };
        summary.sampled = sample.len();
        summary.advance(JobState::SampleRead);

        let outcome = merge_new_trades(&scraped, &sample);
        summary.new_trades = outcome.new_trades.len();
        summary.duplicates = outcome.duplicates;
        summary.advance(JobState::Merged);
        info!(
            new = outcome.new_trades.len(),
            duplicates = outcome.duplicates,
            "found {} new rows",
            outcome.new_trades.len()
        );

        if outcome.new_trades.is_empty() {
            info!("no new data to add");
            summary.advance(JobState::Done);
            return Ok(Vec::new());
        }

        self.store
            .insert_at_top(&outcome.new_trades)
            .await
            .map_err(|source| JobError::Persist {
                count: outcome.new_trades.len(),
                source,
            })?;
        summary.inserted = outcome.new_trades.len();
        summary.advance(JobState::Persisted);
        summary.advance(JobState::Done);
        Ok(outcome.new_trades)
    }
}

/// `<dir>/<run_id>/run_summary.json` plus the inserted trades.
pub async fn write_run_report(
    dir: &Path,
    summary: &SyncRunSummary,
    inserted: &[InsiderTrade],
) -> anyhow::Result<PathBuf> {
    let run_dir = dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let summary_json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(run_dir.join("run_summary.json"), summary_json)
        .await
        .context("writing run_summary.json")?;

    let trades_json = serde_json::to_vec_pretty(inserted).context("serializing new trades")?;
    fs::write(run_dir.join("new_trades.json"), trades_json)
        .await
        .context("writing new_trades.json")?;

    Ok(run_dir)
}
