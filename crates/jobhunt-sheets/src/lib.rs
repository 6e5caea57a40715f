//! Spreadsheet backend adapter: whole-tab reads, single-cell writes, the
//! row-record materializer, the update writer and a time-boxed row cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use jobhunt_core::JobRecord;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "jobhunt-sheets";

/// Offset from a 0-based in-memory row index to the backend's 1-based
/// physical row, accounting for the header row. Derived once here; write
/// paths must not recompute it ad hoc.
pub const HEADER_ROW_OFFSET: usize = 2;

pub fn physical_row(row_index: usize) -> u32 {
    (row_index + HEADER_ROW_OFFSET) as u32
}

// Conventional header names of the tracking sheet.
pub const COL_DATE: &str = "תאריך";
pub const COL_TITLE: &str = "שם המשרה";
pub const COL_COMPANY: &str = "שם החברה";
pub const COL_INDUSTRY: &str = "סוג החברה";
pub const COL_LOCATION: &str = "מיקום המשרה";
pub const COL_POSTED: &str = "תאריך פרסום המשרה";
pub const COL_STATUS: &str = "שלחתי קורות חיים?";
pub const COL_CV_VERSION: &str = "גרסת קו\"ח מתאימה";
pub const COL_INTRO_EMAIL: &str = "טיוטת introduction למייל";
pub const COL_RATING: &str = "ציון התאמה (1–5)";
pub const COL_LISTING_URL: &str = "לינק למשרה";
pub const COL_DESCRIPTION_SHORT: &str = "תקציר משרה";
pub const COL_DESCRIPTION_FULL: &str = "תיאור משרה";
pub const COL_SUMMARY: &str = "תקציר משרה בעיבוד GPT";

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("spreadsheet credentials rejected: {0}")]
    Auth(String),
    #[error("spreadsheet request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("spreadsheet API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid column layout: {0}")]
    Config(String),
}

/// Which spreadsheet and tab a user's rows live in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SheetTarget {
    pub spreadsheet: String,
    pub tab: String,
}

impl SheetTarget {
    pub fn new(spreadsheet: impl Into<String>, tab: impl Into<String>) -> Self {
        Self {
            spreadsheet: spreadsheet.into(),
            tab: tab.into(),
        }
    }
}

/// Raw tab contents: one header row plus possibly-ragged data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    /// String-keyed records per data row: short rows are padded with empty
    /// strings and columns whose every data cell is empty are dropped.
    pub fn records(&self) -> Vec<BTreeMap<String, String>> {
        let keep: Vec<usize> = (0..self.headers.len())
            .filter(|&col| {
                self.rows
                    .iter()
                    .any(|row| row.get(col).map(|v| !v.is_empty()).unwrap_or(false))
            })
            .collect();

        self.rows
            .iter()
            .map(|row| {
                keep.iter()
                    .map(|&col| {
                        let value = row.get(col).cloned().unwrap_or_default();
                        (self.headers[col].clone(), value)
                    })
                    .collect()
            })
            .collect()
    }
}

fn parse_sheet_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    None
}

fn parse_rating(raw: &str) -> Option<u8> {
    raw.trim()
        .parse::<u8>()
        .ok()
        .filter(|n| (1..=5).contains(n))
}

/// Turn a raw tab into typed records. The record's identity is its 0-based
/// position in the tab at this moment; unparseable dates and ratings coerce
/// to `None` rather than failing the load.
pub fn materialize(table: &SheetTable) -> Vec<JobRecord> {
    table
        .records()
        .into_iter()
        .enumerate()
        .map(|(row_index, record)| {
            let get = |key: &str| record.get(key).cloned().unwrap_or_default();
            let short = get(COL_DESCRIPTION_SHORT);
            let description = if short.is_empty() {
                get(COL_DESCRIPTION_FULL)
            } else {
                short
            };
            JobRecord {
                row_index,
                logged_at: parse_sheet_date(&get(COL_DATE)),
                title: get(COL_TITLE),
                company: get(COL_COMPANY),
                industry: get(COL_INDUSTRY),
                location: get(COL_LOCATION),
                posted_text: get(COL_POSTED),
                status_text: get(COL_STATUS),
                description,
                summary: get(COL_SUMMARY),
                cv_version: get(COL_CV_VERSION),
                intro_email: get(COL_INTRO_EMAIL),
                fit_rating: parse_rating(&get(COL_RATING)),
                listing_url: get(COL_LISTING_URL),
            }
        })
        .collect()
}

/// Logical field name → 1-based column index, as agreed with the sheet's
/// layout. Write paths go through this table only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub cv_version: u32,
    pub intro_email: u32,
    pub status: u32,
    pub rating: u32,
    pub summary: u32,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            cv_version: 11,
            intro_email: 12,
            status: 13,
            rating: 14,
            summary: 17,
        }
    }
}

impl ColumnMap {
    /// Validated once at startup, never per write.
    pub fn validate(&self) -> Result<(), SheetsError> {
        let columns = [
            self.cv_version,
            self.intro_email,
            self.status,
            self.rating,
            self.summary,
        ];
        if columns.iter().any(|&c| c == 0) {
            return Err(SheetsError::Config(
                "column indices are 1-based; 0 is not addressable".to_string(),
            ));
        }
        for (i, a) in columns.iter().enumerate() {
            if columns[i + 1..].contains(a) {
                return Err(SheetsError::Config(format!(
                    "column {a} is mapped to more than one field"
                )));
            }
        }
        Ok(())
    }
}

/// Backend seam: whole-tab read plus single-cell write, both 1-based.
#[async_trait]
pub trait SheetStore: Send + Sync {
    async fn fetch_table(&self, target: &SheetTarget) -> Result<SheetTable, SheetsError>;

    async fn update_cell(
        &self,
        target: &SheetTarget,
        row: u32,
        col: u32,
        value: &str,
    ) -> Result<(), SheetsError>;
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl SheetsConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("SHEETS_API_BASE")
                .unwrap_or_else(|_| "https://sheets.googleapis.com".to_string()),
            token: std::env::var("SHEETS_API_TOKEN").unwrap_or_default(),
            timeout: Duration::from_secs(
                std::env::var("SHEETS_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<JsonValue>>,
}

fn cell_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Sheets REST values-API implementation of [`SheetStore`].
#[derive(Debug)]
pub struct GoogleSheetsStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GoogleSheetsStore {
    pub fn new(config: SheetsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    async fn into_api_error(response: reqwest::Response) -> SheetsError {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            SheetsError::Auth(message)
        } else {
            SheetsError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[async_trait]
impl SheetStore for GoogleSheetsStore {
    async fn fetch_table(&self, target: &SheetTarget) -> Result<SheetTable, SheetsError> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url, target.spreadsheet, target.tab
        );
        debug!(spreadsheet = %target.spreadsheet, tab = %target.tab, "fetching sheet values");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }
        let range: ValueRange = response.json().await?;
        let mut rows = range.values.into_iter().map(|row| {
            row.iter().map(cell_to_string).collect::<Vec<String>>()
        });
        let headers = rows.next().unwrap_or_default();
        Ok(SheetTable {
            headers,
            rows: rows.collect(),
        })
    }

    async fn update_cell(
        &self,
        target: &SheetTarget,
        row: u32,
        col: u32,
        value: &str,
    ) -> Result<(), SheetsError> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}!R{row}C{col}?valueInputOption=RAW",
            self.base_url, target.spreadsheet, target.tab
        );
        debug!(spreadsheet = %target.spreadsheet, tab = %target.tab, row, col, "updating cell");
        let body = serde_json::json!({ "values": [[value]] });
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }
        Ok(())
    }
}

/// One edit-form submission. Empty fields are left untouched in the sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub row_index: usize,
    pub status: String,
    pub cv_version: String,
    pub intro_email: String,
    pub applied_date: String,
    pub rating: String,
}

/// Write the non-empty fields of `update` back to the user's tab, one cell
/// at a time. When `applied_date` is set the status cell is written a second
/// time as `"<status> - <applied_date>"`, so the persisted status always
/// carries the date suffix. The first failed write aborts the rest; earlier
/// writes are not rolled back.
pub async fn apply_update(
    store: &dyn SheetStore,
    target: &SheetTarget,
    columns: &ColumnMap,
    update: &JobUpdate,
) -> Result<(), SheetsError> {
    let row = physical_row(update.row_index);
    info!(row_index = update.row_index, row, "applying job update");

    if !update.cv_version.is_empty() {
        store
            .update_cell(target, row, columns.cv_version, &update.cv_version)
            .await?;
    }
    if !update.intro_email.is_empty() {
        store
            .update_cell(target, row, columns.intro_email, &update.intro_email)
            .await?;
    }
    if !update.status.is_empty() {
        store
            .update_cell(target, row, columns.status, &update.status)
            .await?;
    }
    if !update.rating.is_empty() {
        store
            .update_cell(target, row, columns.rating, &update.rating)
            .await?;
    }
    if !update.applied_date.is_empty() {
        let stamped = format!("{} - {}", update.status, update.applied_date);
        store
            .update_cell(target, row, columns.status, &stamped)
            .await?;
    }
    Ok(())
}

/// Persist an LLM summary into the designated summary column.
pub async fn write_summary(
    store: &dyn SheetStore,
    target: &SheetTarget,
    columns: &ColumnMap,
    row_index: usize,
    summary: &str,
) -> Result<(), SheetsError> {
    store
        .update_cell(target, physical_row(row_index), columns.summary, summary)
        .await
}

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    loaded_at: Instant,
    records: Vec<JobRecord>,
}

/// Time-boxed memoization of the last materialized load per (spreadsheet,
/// tab). Rapid interactions within the TTL reuse the cached rows; writes
/// call [`CachedSheetSource::invalidate`] so the next render sees them.
pub struct CachedSheetSource {
    store: Arc<dyn SheetStore>,
    ttl: Duration,
    cache: Mutex<HashMap<SheetTarget, CacheEntry>>,
}

impl CachedSheetSource {
    pub fn new(store: Arc<dyn SheetStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SheetStore> {
        &self.store
    }

    pub async fn load(&self, target: &SheetTarget) -> Result<Vec<JobRecord>, SheetsError> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(target) {
                if entry.loaded_at.elapsed() < self.ttl {
                    debug!(spreadsheet = %target.spreadsheet, tab = %target.tab, "row cache hit");
                    return Ok(entry.records.clone());
                }
            }
        }
        // Fetch with the map unlocked so a slow backend for one sheet does
        // not stall loads of other sheets. Concurrent misses on the same
        // target may fetch twice; the later insert wins.
        let table = self.store.fetch_table(target).await?;
        let records = materialize(&table);
        self.cache.lock().await.insert(
            target.clone(),
            CacheEntry {
                loaded_at: Instant::now(),
                records: records.clone(),
            },
        );
        Ok(records)
    }

    pub async fn invalidate(&self, target: &SheetTarget) {
        self.cache.lock().await.remove(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq)]
    struct CellWrite {
        row: u32,
        col: u32,
        value: String,
    }

    #[derive(Default)]
    struct MemStore {
        table: SheetTable,
        writes: StdMutex<Vec<CellWrite>>,
        fetches: AtomicUsize,
        fetch_delay: Option<Duration>,
        fail_after_writes: Option<usize>,
    }

    impl MemStore {
        fn with_table(table: SheetTable) -> Self {
            Self {
                table,
                ..Self::default()
            }
        }

        fn writes(&self) -> Vec<CellWrite> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SheetStore for MemStore {
        async fn fetch_table(&self, _target: &SheetTarget) -> Result<SheetTable, SheetsError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.table.clone())
        }

        async fn update_cell(
            &self,
            _target: &SheetTarget,
            row: u32,
            col: u32,
            value: &str,
        ) -> Result<(), SheetsError> {
            let mut writes = self.writes.lock().unwrap();
            if let Some(limit) = self.fail_after_writes {
                if writes.len() >= limit {
                    return Err(SheetsError::Api {
                        status: 500,
                        message: "backend unavailable".to_string(),
                    });
                }
            }
            writes.push(CellWrite {
                row,
                col,
                value: value.to_string(),
            });
            Ok(())
        }
    }

    fn target() -> SheetTarget {
        SheetTarget::new("קובץ משרות", "Sheet1")
    }

    fn sample_table() -> SheetTable {
        SheetTable {
            headers: vec![
                COL_DATE.to_string(),
                COL_TITLE.to_string(),
                COL_COMPANY.to_string(),
                COL_POSTED.to_string(),
                COL_STATUS.to_string(),
                COL_RATING.to_string(),
                "עמודה ריקה".to_string(),
            ],
            rows: vec![
                vec![
                    "2024-01-15".to_string(),
                    "Backend Engineer".to_string(),
                    "Acme".to_string(),
                    "2 days ago".to_string(),
                    "הגשתי".to_string(),
                    "4".to_string(),
                    "".to_string(),
                ],
                // Ragged row: missing trailing cells pad to empty strings.
                vec!["not-a-date".to_string(), "Data Analyst".to_string()],
            ],
        }
    }

    #[test]
    fn records_pad_ragged_rows_and_drop_empty_columns() {
        let records = sample_table().records();
        assert_eq!(records.len(), 2);
        assert!(!records[0].contains_key("עמודה ריקה"));
        assert_eq!(records[1][COL_COMPANY], "");
        assert_eq!(records[1][COL_TITLE], "Data Analyst");
    }

    #[test]
    fn materialize_maps_headers_and_coerces_bad_values() {
        let records = materialize(&sample_table());
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.row_index, 0);
        assert_eq!(first.logged_at, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(first.company, "Acme");
        assert_eq!(first.fit_rating, Some(4));

        let second = &records[1];
        assert_eq!(second.row_index, 1);
        assert_eq!(second.logged_at, None);
        assert_eq!(second.fit_rating, None);
        assert_eq!(second.status_text, "");
    }

    #[test]
    fn materialize_prefers_short_description_over_full() {
        let table = SheetTable {
            headers: vec![
                COL_DESCRIPTION_SHORT.to_string(),
                COL_DESCRIPTION_FULL.to_string(),
            ],
            rows: vec![
                vec!["short".to_string(), "full".to_string()],
                vec!["".to_string(), "full only".to_string()],
            ],
        };
        let records = materialize(&table);
        assert_eq!(records[0].description, "short");
        assert_eq!(records[1].description, "full only");
    }

    #[test]
    fn parse_sheet_date_accepts_known_formats() {
        assert_eq!(
            parse_sheet_date("15/01/2024"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(
            parse_sheet_date("15.01.2024"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_sheet_date("January 15"), None);
    }

    #[test]
    fn rating_outside_range_coerces_to_none() {
        assert_eq!(parse_rating("3"), Some(3));
        assert_eq!(parse_rating(" 5 "), Some(5));
        assert_eq!(parse_rating("0"), None);
        assert_eq!(parse_rating("6"), None);
        assert_eq!(parse_rating("מעולה"), None);
    }

    #[test]
    fn column_map_rejects_duplicates_and_zero() {
        assert!(ColumnMap::default().validate().is_ok());
        let duplicated = ColumnMap {
            intro_email: 13,
            ..ColumnMap::default()
        };
        assert!(duplicated.validate().is_err());
        let zeroed = ColumnMap {
            summary: 0,
            ..ColumnMap::default()
        };
        assert!(zeroed.validate().is_err());
    }

    #[tokio::test]
    async fn update_with_status_and_date_persists_suffixed_status_only() {
        let store = MemStore::default();
        let update = JobUpdate {
            row_index: 5,
            status: "הגשתי".to_string(),
            applied_date: "2024-01-01".to_string(),
            ..JobUpdate::default()
        };
        apply_update(&store, &target(), &ColumnMap::default(), &update)
            .await
            .unwrap();

        let writes = store.writes();
        // Physical row = index 5 + header offset.
        assert!(writes.iter().all(|w| w.row == 7));
        assert!(writes.iter().all(|w| w.col == ColumnMap::default().status));
        assert_eq!(
            writes.last().unwrap().value,
            "הגשתי - 2024-01-01"
        );
    }

    #[tokio::test]
    async fn update_writes_each_supplied_field_in_order() {
        let store = MemStore::default();
        let update = JobUpdate {
            row_index: 0,
            status: "נדחה".to_string(),
            cv_version: "v3".to_string(),
            intro_email: "שלום".to_string(),
            rating: "2".to_string(),
            applied_date: String::new(),
        };
        apply_update(&store, &target(), &ColumnMap::default(), &update)
            .await
            .unwrap();

        let columns: Vec<u32> = store.writes().iter().map(|w| w.col).collect();
        assert_eq!(columns, vec![11, 12, 13, 14]);
        // No applied date, so the status cell stays unsuffixed.
        assert_eq!(store.writes()[2].value, "נדחה");
    }

    #[tokio::test]
    async fn failed_write_aborts_without_rolling_back() {
        let store = MemStore {
            fail_after_writes: Some(2),
            ..MemStore::default()
        };
        let update = JobUpdate {
            row_index: 1,
            status: "הגשתי".to_string(),
            cv_version: "v1".to_string(),
            intro_email: "draft".to_string(),
            rating: "5".to_string(),
            applied_date: "2024-02-02".to_string(),
        };
        let result = apply_update(&store, &target(), &ColumnMap::default(), &update).await;
        assert!(result.is_err());
        // The first two writes landed and stay.
        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].value, "v1");
        assert_eq!(writes[1].value, "draft");
    }

    #[tokio::test]
    async fn summary_lands_in_designated_column() {
        let store = MemStore::default();
        write_summary(&store, &target(), &ColumnMap::default(), 2, "תקציר")
            .await
            .unwrap();
        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].row, 4);
        assert_eq!(writes[0].col, 17);
    }

    #[tokio::test]
    async fn cache_reuses_rows_within_ttl_and_refetches_after_invalidate() {
        let store = Arc::new(MemStore::with_table(sample_table()));
        let source = CachedSheetSource::new(store.clone(), Duration::from_secs(300));

        let first = source.load(&target()).await.unwrap();
        let second = source.load(&target()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);

        source.invalidate(&target()).await;
        source.load(&target()).await.unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_load_for_one_sheet_does_not_block_another() {
        let store = Arc::new(MemStore {
            table: sample_table(),
            fetch_delay: Some(Duration::from_millis(200)),
            ..MemStore::default()
        });
        let source = CachedSheetSource::new(store.clone(), Duration::from_secs(300));

        let a = SheetTarget::new("sheet-a", "Sheet1");
        let b = SheetTarget::new("sheet-b", "Sheet1");
        let started = Instant::now();
        let (ra, rb) = tokio::join!(source.load(&a), source.load(&b));
        ra.unwrap();
        rb.unwrap();
        // Serialized fetches would take at least 400 ms.
        assert!(started.elapsed() < Duration::from_millis(350));
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_with_zero_ttl_always_refetches() {
        let store = Arc::new(MemStore::with_table(sample_table()));
        let source = CachedSheetSource::new(store.clone(), Duration::ZERO);
        source.load(&target()).await.unwrap();
        source.load(&target()).await.unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }
}
