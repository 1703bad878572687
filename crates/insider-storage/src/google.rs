//! Google Sheets v4 backend authenticated with a service-account key.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use insider_core::{header_row, InsiderTrade, StoredRow, COLUMN_COUNT};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{HttpClientConfig, SheetStore, StoreError};

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Fields of a service-account JSON key that the token exchange needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_json(text: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(text)?)
    }

    pub async fn from_file(path: &Path) -> Result<Self, StoreError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        Self::from_json(&text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueInputOption {
    Raw,
    #[default]
    UserEntered,
}

impl ValueInputOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::UserEntered => "USER_ENTERED",
        }
    }
}

impl FromStr for ValueInputOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RAW" => Ok(Self::Raw),
            "USER_ENTERED" => Ok(Self::UserEntered),
            other => Err(format!("unknown value input option {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoogleSheetsConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// Numeric grid id of the tab (`gid=` in the sheet URL); needed for row inserts.
    pub sheet_gid: i64,
    pub value_input: ValueInputOption,
    pub api_base: String,
}

impl GoogleSheetsConfig {
    pub fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: "Sheet1".to_string(),
            sheet_gid: 0,
            value_input: ValueInputOption::default(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<JsonValue>>,
}

pub struct GoogleSheetsStore {
    client: reqwest::Client,
    config: GoogleSheetsConfig,
    key: ServiceAccountKey,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for GoogleSheetsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleSheetsStore")
            .field("config", &self.config)
            .field("client_email", &self.key.client_email)
            .finish_non_exhaustive()
    }
}

impl GoogleSheetsStore {
    pub fn new(
        http: &HttpClientConfig,
        config: GoogleSheetsConfig,
        key: ServiceAccountKey,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: http.build_client()?,
            config,
            key,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, StoreError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at > now + ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS) {
                return Ok(token.value.clone());
            }
        }

        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + TOKEN_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| StoreError::Auth(format!("invalid service account private key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| StoreError::Auth(format!("signing token assertion: {e}")))?;

        let resp = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token exchange returned {status}: {body}")));
        }
        let token: TokenResponse = resp.json().await?;
        let lifetime = token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS);
        debug!(lifetime_secs = lifetime, "obtained sheets access token");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + ChronoDuration::seconds(lifetime),
        });
        Ok(token.access_token)
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| StoreError::Malformed(format!("sheets api base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Malformed("sheets api base cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets"])
            .extend(segments);
        Ok(url)
    }

    fn values_url(&self, range: &str) -> Result<Url, StoreError> {
        self.api_url(&[self.config.spreadsheet_id.as_str(), "values", range])
    }

    async fn get_values(&self, range: &str) -> Result<Vec<StoredRow>, StoreError> {
        let token = self.access_token().await?;
        let mut url = self.values_url(range)?;
        url.query_pairs_mut().append_pair("majorDimension", "ROWS");

        let resp = self.client.get(url).bearer_auth(token).send().await?;
        let range: ValueRange = check_status(resp).await?.json().await?;
        Ok(range
            .values
            .iter()
            .map(|row| StoredRow::new(row.iter().map(cell_to_string).collect()))
            .collect())
    }

    async fn put_values(&self, range: &str, rows: &[StoredRow]) -> Result<(), StoreError> {
        let token = self.access_token().await?;
        let mut url = self.values_url(range)?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", self.config.value_input.as_str());

        let resp = self
            .client
            .put(url)
            .bearer_auth(token)
            .json(&value_range_body(range, rows))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn insert_blank_rows(&self, count: usize) -> Result<(), StoreError> {
        let token = self.access_token().await?;
        let batch_segment = format!("{}:batchUpdate", self.config.spreadsheet_id);
        let url = self.api_url(&[batch_segment.as_str()])?;

        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&insert_rows_request(self.config.sheet_gid, count))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl SheetStore for GoogleSheetsStore {
    fn describe(&self) -> String {
        format!(
            "sheets:{}/{}",
            self.config.spreadsheet_id, self.config.sheet_name
        )
    }

    async fn ensure_headers(&self) -> Result<(), StoreError> {
        let range = a1_range(&self.config.sheet_name, 1, Some(1));
        let existing = self.get_values(&range).await?;
        if existing.first().is_some_and(|row| !row.is_blank()) {
            return Ok(());
        }
        info!(sheet = %self.config.sheet_name, "headers missing, writing them");
        self.put_values(&a1_cell(&self.config.sheet_name, 1), &[header_row()])
            .await
    }

    async fn read_top_rows(&self, limit: usize) -> Result<Vec<StoredRow>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let range = a1_range(&self.config.sheet_name, 2, Some(limit.saturating_add(1)));
        let mut rows = self.get_values(&range).await?;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert_at_top(&self, trades: &[InsiderTrade]) -> Result<(), StoreError> {
        if trades.is_empty() {
            return Ok(());
        }
        // Two calls: a failure after the insert leaves blank rows under the header.
        self.insert_blank_rows(trades.len()).await?;
        let rows: Vec<StoredRow> = trades.iter().map(InsiderTrade::to_row).collect();
        self.put_values(&a1_cell(&self.config.sheet_name, 2), &rows)
            .await?;
        info!(inserted = trades.len(), "prepended rows to sheet");
        Ok(())
    }
}

async fn check_status(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Api {
        status: status.as_u16(),
        body,
    })
}

fn cell_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn column_letter(index: usize) -> char {
    (b'A' + (index.saturating_sub(1) as u8)) as char
}

fn quote_sheet_name(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// `'Sheet'!A{first}:L{last}` spanning every persisted column; open-ended when `last` is `None`.
pub(crate) fn a1_range(sheet: &str, first_row: usize, last_row: Option<usize>) -> String {
    let last_col = column_letter(COLUMN_COUNT);
    match last_row {
        Some(last) => format!("{}!A{first_row}:{last_col}{last}", quote_sheet_name(sheet)),
        None => format!("{}!A{first_row}:{last_col}", quote_sheet_name(sheet)),
    }
}

pub(crate) fn a1_cell(sheet: &str, row: usize) -> String {
    format!("{}!A{row}", quote_sheet_name(sheet))
}

pub(crate) fn insert_rows_request(sheet_gid: i64, count: usize) -> JsonValue {
    json!({
        "requests": [{
            "insertDimension": {
                "range": {
                    "sheetId": sheet_gid,
                    "dimension": "ROWS",
                    "startIndex": 1,
                    "endIndex": 1 + count,
                },
                "inheritFromBefore": false,
            }
        }]
    })
}

pub(crate) fn value_range_body(range: &str, rows: &[StoredRow]) -> JsonValue {
    json!({
        "range": range,
        "majorDimension": "ROWS",
        "values": rows,
    })
}
