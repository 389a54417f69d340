//! Feed acquisition for PRISM: the `SheetFetcher` seam plus a Google Sheets
//! API client and fixture-backed fetchers for dev and tests.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use prism_core::RawRow;
use serde::Deserialize;
use tracing::info;

pub const CRATE_NAME: &str = "prism-sheets";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("sheet source misconfigured: {0}")]
    Config(String),
    #[error("sheet request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sheet api returned status {status} for {url}")]
    Api { status: u16, url: String },
    #[error("spreadsheet contains no data rows")]
    Empty,
    #[error("reading fixture {path}: {source}")]
    Fixture {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing fixture {path}: {source}")]
    FixtureFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Returns the full raw-row feed for one sync run. An unreachable source,
/// failed auth, or an empty sheet are all hard errors; per-row problems are
/// the normalizer's concern.
#[async_trait]
pub trait SheetFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawRow>, FetchError>;
}

/// Map a sheet's `values` grid (header row first) onto column-keyed rows.
/// Short rows are padded with empty cells; zero data rows is a hard error.
pub fn grid_to_rows(values: Vec<Vec<String>>) -> Result<Vec<RawRow>, FetchError> {
    let mut rows = values.into_iter();
    let headers = rows.next().ok_or(FetchError::Empty)?;
    let data: Vec<RawRow> = rows
        .map(|cells| {
            RawRow::from_pairs(headers.iter().enumerate().map(|(i, header)| {
                (
                    header.clone(),
                    cells.get(i).cloned().unwrap_or_default(),
                )
            }))
        })
        .collect();
    if data.is_empty() {
        return Err(FetchError::Empty);
    }
    Ok(data)
}

#[derive(Debug, Clone)]
pub struct SheetSource {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Read-only Google Sheets v4 client using API-key auth.
#[derive(Debug)]
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    source: SheetSource,
    base_url: String,
}

impl GoogleSheetsClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://sheets.googleapis.com/v4/spreadsheets";

    pub fn new(
        source: SheetSource,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, FetchError> {
        if source.spreadsheet_id.is_empty() {
            return Err(FetchError::Config("spreadsheet id is empty".into()));
        }
        if source.api_key.is_empty() {
            return Err(FetchError::Config("api key is empty".into()));
        }
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self {
            http,
            source,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different endpoint, e.g. a local stub.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn values_url(&self) -> String {
        format!(
            "{}/{}/values/{}",
            self.base_url, self.source.spreadsheet_id, self.source.sheet_name
        )
    }
}

#[async_trait]
impl SheetFetcher for GoogleSheetsClient {
    async fn fetch(&self) -> Result<Vec<RawRow>, FetchError> {
        let url = self.values_url();
        let response = self
            .http
            .get(&url)
            .query(&[("key", self.source.api_key.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Api {
                status: status.as_u16(),
                url,
            });
        }
        let body: ValuesResponse = response.json().await?;
        let rows = grid_to_rows(body.values)?;
        info!(rows = rows.len(), sheet = %self.source.sheet_name, "fetched sheet data");
        Ok(rows)
    }
}

/// Fetcher backed by a JSON fixture file: either an array of column-keyed
/// objects or a `{"values": [[...]]}` grid with a header row.
#[derive(Debug, Clone)]
pub struct FixtureSheetFetcher {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FixtureFile {
    Rows(Vec<RawRow>),
    Grid { values: Vec<Vec<String>> },
}

impl FixtureSheetFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SheetFetcher for FixtureSheetFetcher {
    async fn fetch(&self) -> Result<Vec<RawRow>, FetchError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| FetchError::Fixture {
                path: self.path.display().to_string(),
                source,
            })?;
        let parsed: FixtureFile =
            serde_json::from_str(&text).map_err(|source| FetchError::FixtureFormat {
                path: self.path.display().to_string(),
                source,
            })?;
        let rows = match parsed {
            FixtureFile::Rows(rows) => rows,
            FixtureFile::Grid { values } => grid_to_rows(values)?,
        };
        if rows.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(rows)
    }
}

/// In-memory fetcher for tests; an empty row set reproduces the
/// empty-spreadsheet hard error.
#[derive(Debug, Clone, Default)]
pub struct StaticSheetFetcher {
    rows: Vec<RawRow>,
}

impl StaticSheetFetcher {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl SheetFetcher for StaticSheetFetcher {
    async fn fetch(&self) -> Result<Vec<RawRow>, FetchError> {
        if self.rows.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(self.rows.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(ToString::to_string).collect())
            .collect()
    }

    #[test]
    fn grid_maps_headers_onto_cells() {
        let rows = grid_to_rows(grid(&[
            &["product_id", "product_name", "rating"],
            &["P1", "Cable", "4.2"],
            &["P2", "Speaker"],
        ]))
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].col("product_id"), "P1");
        assert_eq!(rows[0].col("rating"), "4.2");
        // Short rows pad missing trailing cells with empty strings.
        assert_eq!(rows[1].col("rating"), "");
    }

    #[test]
    fn empty_grid_is_a_hard_error() {
        assert!(matches!(grid_to_rows(vec![]), Err(FetchError::Empty)));
        // A header with no data rows is just as unusable.
        let header_only = grid_to_rows(grid(&[&["product_id"]]));
        assert!(matches!(header_only, Err(FetchError::Empty)));
    }

    #[tokio::test]
    async fn static_fetcher_returns_rows_or_empty_error() {
        let fetcher = StaticSheetFetcher::new(vec![RawRow::from_pairs([("product_id", "P1")])]);
        assert_eq!(fetcher.fetch().await.unwrap().len(), 1);

        let empty = StaticSheetFetcher::default();
        assert!(matches!(empty.fetch().await, Err(FetchError::Empty)));
    }

    #[test]
    fn client_rejects_missing_configuration() {
        let err = GoogleSheetsClient::new(
            SheetSource {
                spreadsheet_id: String::new(),
                sheet_name: "Sheet1".into(),
                api_key: "k".into(),
            },
            Duration::from_secs(5),
            "prism-bot/0.1",
        );
        assert!(matches!(err, Err(FetchError::Config(_))));
    }
}
