//! Collector contract and the OpenInsider screener collector.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use insider_core::InsiderTrade;
use insider_storage::{FetchError, HttpFetcher, PageArchive};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "insider-adapters";

pub const SOURCE_ID: &str = "openinsider";

/// Filings from the last 180 days, purchases and sales, price >= $5, value >= $25k,
/// 100 rows sorted by filing date descending.
pub const DEFAULT_SCREENER_URL: &str = "http://openinsider.com/screener?s=&o=&pl=&ph=5&ll=&lh=&fd=180&fdr=&td=0&tdr=&fdlyl=&fdlyh=&daysago=&xp=1&xs=1&vl=25&vh=&ocl=&och=&sic1=-1&sicl=100&sich=9999&grp=0&nfl=&nfh=&nil=&nih=&nol=&noh=&v2l=&v2h=&oc2l=&oc2h=&sortcol=1&cnt=100&page=1";

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("parsing screener page: {0}")]
    Parse(String),
    #[error("reading saved page {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl CollectContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
        }
    }
}

/// Produces trades newest-first. An empty result is a valid "nothing listed" answer.
#[async_trait]
pub trait Collector: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<InsiderTrade>, CollectError>;
}

/// Live screener page over HTTP.
#[derive(Debug)]
pub struct OpenInsiderCollector {
    http: HttpFetcher,
    url: String,
    archive: Option<PageArchive>,
}

impl OpenInsiderCollector {
    pub fn new(http: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: PageArchive) -> Self {
        self.archive = Some(archive);
        self
    }
}

#[async_trait]
impl Collector for OpenInsiderCollector {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<InsiderTrade>, CollectError> {
        info!(url = %self.url, "fetching screener");
        let page = self
            .http
            .fetch_bytes(ctx.run_id, &self.url)
            .await
            .map_err(|source| CollectError::Fetch {
                url: self.url.clone(),
                source,
            })?;
        if page.final_url != self.url {
            info!(final_url = %page.final_url, "screener request was redirected");
        }
        debug!(status = page.status.as_u16(), bytes = page.body.len(), "screener page received");

        if let Some(archive) = &self.archive {
            match archive.archive(ctx.started_at, SOURCE_ID, &page.body).await {
                Ok(stored) => info!(path = %stored.relative_path.display(), deduplicated = stored.deduplicated, "archived screener page"),
                Err(err) => warn!(error = %err, "archiving screener page failed"),
            }
        }

        let html = String::from_utf8_lossy(&page.body);
        let trades = parse_screener_html(&html)?;
        info!(rows = trades.len(), "scraped screener rows");
        Ok(trades)
    }
}

/// A previously saved screener page, parsed exactly like a live one.
#[derive(Debug, Clone)]
pub struct FixtureCollector {
    path: PathBuf,
}

impl FixtureCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Collector for FixtureCollector {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    async fn collect(&self, _ctx: &CollectContext) -> Result<Vec<InsiderTrade>, CollectError> {
        let html = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| CollectError::Io {
                path: self.path.clone(),
                source,
            })?;
        let trades = parse_screener_html(&html)?;
        info!(path = %self.path.display(), rows = trades.len(), "parsed saved screener page");
        Ok(trades)
    }
}

fn selector(css: &str) -> Result<Selector, CollectError> {
    Selector::parse(css).map_err(|e| CollectError::Parse(format!("selector {css:?}: {e}")))
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn strip_chars(value: &str, unwanted: &[char]) -> String {
    value.chars().filter(|c| !unwanted.contains(c)).collect()
}

/// Column layout of the screener table; column 0 holds filing flags and is skipped.
fn trade_from_cells(cells: &[String]) -> InsiderTrade {
    let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or_default();
    InsiderTrade {
        filing_date: cell(1).to_string(),
        trade_date: cell(2).to_string(),
        ticker: cell(3).to_string(),
        company_name: cell(4).to_string(),
        insider_name: cell(5).to_string(),
        title: cell(6).to_string(),
        trade_type: cell(7).to_string(),
        price: strip_chars(cell(8), &['$', ',']),
        qty: strip_chars(cell(9), &['+', ',']),
        owned: strip_chars(cell(10), &['+', ',']),
        delta_own: cell(11).to_string(),
        value: strip_chars(cell(12), &['+', '$', ',']),
    }
}

/// Parse the `table.tinytable` screener listing, keeping page order.
///
/// A page without the table is a parse error. Rows lacking a ticker or a
/// filing date (spacers, ads) are skipped.
pub fn parse_screener_html(html: &str) -> Result<Vec<InsiderTrade>, CollectError> {
    let document = Html::parse_document(html);
    let table_sel = selector("table.tinytable")?;
    let row_sel = selector("tbody tr")?;
    let cell_sel = selector("td")?;

    let table = document
        .select(&table_sel)
        .next()
        .ok_or_else(|| CollectError::Parse("table.tinytable not found".to_string()))?;

    let mut trades = Vec::new();
    for row in table.select(&row_sel) {
        let cells: Vec<String> = row.select(&cell_sel).map(|c| cell_text(&c)).collect();
        if cells.is_empty() {
            continue;
        }
        let trade = trade_from_cells(&cells);
        if trade.ticker.is_empty() || trade.filing_date.is_empty() {
            continue;
        }
        trades.push(trade);
    }
    Ok(trades)
}
