use std::path::PathBuf;

use async_trait::async_trait;
use insider_core::{header_row, InsiderTrade, StoredRow};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::{write_atomic, SheetStore, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SheetFile {
    header: Option<StoredRow>,
    #[serde(default)]
    rows: Vec<StoredRow>,
}

/// Whole-table JSON file. Each mutation rewrites the file atomically, so an
/// interrupted insert leaves either the old table or the new one.
#[derive(Debug)]
pub struct FileSheetStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSheetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<SheetFile, StoreError> {
        let exists = fs::try_exists(&self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        if !exists {
            return Ok(SheetFile::default());
        }
        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        if text.trim().is_empty() {
            return Ok(SheetFile::default());
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn save(&self, sheet: &SheetFile) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(sheet)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|e| StoreError::io(&self.path, e))
    }
}

#[async_trait]
impl SheetStore for FileSheetStore {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn ensure_headers(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut sheet = self.load().await?;
        if sheet.header.as_ref().is_some_and(|h| !h.is_blank()) {
            return Ok(());
        }
        info!(path = %self.path.display(), "headers missing, writing them");
        sheet.header = Some(header_row());
        self.save(&sheet).await
    }

    async fn read_top_rows(&self, limit: usize) -> Result<Vec<StoredRow>, StoreError> {
        let sheet = self.load().await?;
        Ok(sheet.rows.into_iter().take(limit).collect())
    }

    async fn insert_at_top(&self, trades: &[InsiderTrade]) -> Result<(), StoreError> {
        if trades.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut sheet = self.load().await?;
        let existing = std::mem::take(&mut sheet.rows);
        sheet.rows = trades.iter().map(InsiderTrade::to_row).chain(existing).collect();
        self.save(&sheet).await?;
        info!(path = %self.path.display(), inserted = trades.len(), "prepended rows");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insider_core::HEADERS;
    use tempfile::tempdir;

    fn trade(ticker: &str) -> InsiderTrade {
        InsiderTrade {
            filing_date: "2026-10-15 08:00:00".into(),
            ticker: ticker.into(),
            insider_name: "Someone".into(),
            trade_type: "P - Purchase".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn ensure_headers_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let store = FileSheetStore::new(dir.path().join("sheet.json"));

        store.ensure_headers().await.expect("first");
        store.ensure_headers().await.expect("second");

        let sheet = store.load().await.expect("load");
        let header = sheet.header.expect("header written");
        assert_eq!(header.cells().len(), HEADERS.len());
        assert_eq!(header.cell(0), "Filing Date");
        assert!(sheet.rows.is_empty());
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty_table() {
        let dir = tempdir().expect("tempdir");
        let store = FileSheetStore::new(dir.path().join("absent.json"));
        assert!(store.read_top_rows(500).await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn insert_at_top_keeps_batch_order_above_existing_rows() {
        let dir = tempdir().expect("tempdir");
        let store = FileSheetStore::new(dir.path().join("sheet.json"));
        store.ensure_headers().await.unwrap();

        store.insert_at_top(&[trade("DDD"), trade("EEE")]).await.unwrap();
        store
            .insert_at_top(&[trade("AAA"), trade("BBB"), trade("CCC")])
            .await
            .unwrap();

        let tickers: Vec<String> = store
            .read_top_rows(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.cell(2).to_string())
            .collect();
        assert_eq!(tickers, vec!["AAA", "BBB", "CCC", "DDD", "EEE"]);
    }

    #[tokio::test]
    async fn read_top_rows_respects_limit() {
        let dir = tempdir().expect("tempdir");
        let store = FileSheetStore::new(dir.path().join("sheet.json"));
        store
            .insert_at_top(&[trade("AAA"), trade("BBB"), trade("CCC")])
            .await
            .unwrap();

        let rows = store.read_top_rows(2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].cell(2), "BBB");
        assert!(store.read_top_rows(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("sheet.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileSheetStore::new(&path);
        assert!(matches!(
            store.read_top_rows(5).await,
            Err(StoreError::Json(_))
        ));
    }
}
