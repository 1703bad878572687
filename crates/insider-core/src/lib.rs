//! Core record model and identity keys for insider-trade observations.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "insider-core";

/// Persisted header row, in column order.
pub const HEADERS: [&str; COLUMN_COUNT] = [
    "Filing Date",
    "Trade Date",
    "Ticker",
    "Company Name",
    "Insider Name",
    "Title",
    "Trade Type",
    "Price",
    "Qty",
    "Owned",
    "Delta Own",
    "Value",
];

pub const COLUMN_COUNT: usize = 12;

const KEY_DELIMITER: char = '|';

/// One positional row of cell values as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredRow(pub Vec<String>);

impl StoredRow {
    pub fn new(cells: Vec<String>) -> Self {
        Self(cells)
    }

    /// Cell at `index`, or `""` when the row is shorter.
    pub fn cell(&self, index: usize) -> &str {
        self.0.get(index).map(String::as_str).unwrap_or_default()
    }

    pub fn cells(&self) -> &[String] {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|c| c.is_empty())
    }
}

impl From<Vec<String>> for StoredRow {
    fn from(cells: Vec<String>) -> Self {
        Self(cells)
    }
}

/// One normalized insider trade. Fields are kept as the collector produced them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InsiderTrade {
    pub filing_date: String,
    pub trade_date: String,
    pub ticker: String,
    pub company_name: String,
    pub insider_name: String,
    pub title: String,
    pub trade_type: String,
    pub price: String,
    pub qty: String,
    pub owned: String,
    pub delta_own: String,
    pub value: String,
}

impl InsiderTrade {
    /// Rebuild a trade from a stored row. Missing trailing cells read as empty,
    /// extra cells are ignored.
    pub fn from_stored_row(row: &StoredRow) -> Self {
        Self {
            filing_date: row.cell(0).to_string(),
            trade_date: row.cell(1).to_string(),
            ticker: row.cell(2).to_string(),
            company_name: row.cell(3).to_string(),
            insider_name: row.cell(4).to_string(),
            title: row.cell(5).to_string(),
            trade_type: row.cell(6).to_string(),
            price: row.cell(7).to_string(),
            qty: row.cell(8).to_string(),
            owned: row.cell(9).to_string(),
            delta_own: row.cell(10).to_string(),
            value: row.cell(11).to_string(),
        }
    }

    /// Flatten into header column order.
    pub fn to_row(&self) -> StoredRow {
        StoredRow(
            [
                &self.filing_date,
                &self.trade_date,
                &self.ticker,
                &self.company_name,
                &self.insider_name,
                &self.title,
                &self.trade_type,
                &self.price,
                &self.qty,
                &self.owned,
                &self.delta_own,
                &self.value,
            ]
            .into_iter()
            .cloned()
            .collect(),
        )
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::from_parts(
            &self.filing_date,
            &self.ticker,
            &self.insider_name,
            &self.trade_type,
        )
    }
}

/// Deduplication key: `filing_date|ticker|insider_name|trade_type`.
///
/// Numeric columns are left out on purpose: they are reformatted between the
/// scraped page and the spreadsheet's rendered values. No trimming or case
/// folding is applied, so both sides must come from the same normalization.
/// Records whose four components are all empty share the key `|||`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn from_parts(filing_date: &str, ticker: &str, insider_name: &str, trade_type: &str) -> Self {
        let mut key = String::with_capacity(
            filing_date.len() + ticker.len() + insider_name.len() + trade_type.len() + 3,
        );
        key.push_str(filing_date);
        key.push(KEY_DELIMITER);
        key.push_str(ticker);
        key.push(KEY_DELIMITER);
        key.push_str(insider_name);
        key.push(KEY_DELIMITER);
        key.push_str(trade_type);
        Self(key)
    }

    pub fn from_row(row: &StoredRow) -> Self {
        InsiderTrade::from_stored_row(row).identity_key()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Header row as owned cells.
pub fn header_row() -> StoredRow {
    StoredRow(HEADERS.iter().map(|h| h.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trade() -> InsiderTrade {
        InsiderTrade {
            filing_date: "2026-10-15 17:42:10".into(),
            trade_date: "2026-10-14".into(),
            ticker: "ACME".into(),
            company_name: "Acme Corp".into(),
            insider_name: "Doe Jane".into(),
            title: "CEO".into(),
            trade_type: "P - Purchase".into(),
            price: "12.50".into(),
            qty: "10000".into(),
            owned: "250000".into(),
            delta_own: "+4%".into(),
            value: "125000".into(),
        }
    }

    #[test]
    fn structured_and_stored_forms_share_identity_key() {
        let trade = sample_trade();
        let row = trade.to_row();
        assert_eq!(trade.identity_key(), IdentityKey::from_row(&row));
        assert_eq!(
            trade.identity_key().as_str(),
            "2026-10-15 17:42:10|ACME|Doe Jane|P - Purchase"
        );
    }

    #[test]
    fn identity_key_ignores_reformatted_numeric_columns() {
        let trade = sample_trade();
        let mut stored = trade.to_row();
        stored.0[7] = "$12.50".into();
        stored.0[8] = "+10,000".into();
        stored.0[11] = "$125,000".into();
        assert_eq!(IdentityKey::from_row(&stored), trade.identity_key());
    }

    #[test]
    fn short_rows_are_padded_with_empty_cells() {
        let row = StoredRow::new(vec!["2026-10-15".into(), "2026-10-14".into(), "ACME".into()]);
        let trade = InsiderTrade::from_stored_row(&row);
        assert_eq!(trade.ticker, "ACME");
        assert_eq!(trade.insider_name, "");
        assert_eq!(trade.value, "");
        assert_eq!(IdentityKey::from_row(&row).as_str(), "2026-10-15|ACME||");
    }

    #[test]
    fn all_empty_components_collide() {
        let a = InsiderTrade {
            price: "1".into(),
            ..Default::default()
        };
        let b = InsiderTrade::from_stored_row(&StoredRow::default());
        assert_eq!(a.identity_key(), b.identity_key());
        assert_eq!(a.identity_key().as_str(), "|||");
    }

    #[test]
    fn to_row_follows_header_order() {
        let row = sample_trade().to_row();
        assert_eq!(row.cells().len(), HEADERS.len());
        assert_eq!(row.cell(0), "2026-10-15 17:42:10");
        assert_eq!(row.cell(2), "ACME");
        assert_eq!(row.cell(4), "Doe Jane");
        assert_eq!(row.cell(6), "P - Purchase");
        assert_eq!(row.cell(11), "125000");
        assert_eq!(InsiderTrade::from_stored_row(&row), sample_trade());
    }

    #[test]
    fn stored_row_serializes_as_plain_array() {
        let row = StoredRow::new(vec!["a".into(), "b".into()]);
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"["a","b"]"#);
        assert_eq!(header_row().cell(11), "Value");
    }
}
