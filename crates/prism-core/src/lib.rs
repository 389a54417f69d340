//! Core domain model for PRISM: catalog entities, sync-run records, filter
//! types, and the dashboard metrics shape.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "prism-core";

/// One record from the external tabular feed: column name -> cell text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(pub HashMap<String, String>);

impl RawRow {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Trimmed cell text for a column; empty string when the column is absent.
    pub fn col(&self, name: &str) -> &str {
        self.0.get(name).map(|v| v.trim()).unwrap_or_default()
    }
}

/// Formatted currency string as carried by the feed (e.g. `₹1,099`).
///
/// The numeric amount is derived on demand and never stored; every consumer
/// that needs a number goes through [`PriceTag::amount`] so parsing cannot
/// diverge across aggregation paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTag(String);

impl PriceTag {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn zero() -> Self {
        Self("₹0".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strip everything that is not a digit or decimal point, then parse.
    /// Unparsable input yields 0.
    pub fn amount(&self) -> f64 {
        let numeric: String = self
            .0
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        numeric.parse().unwrap_or(0.0)
    }
}

impl std::fmt::Display for PriceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    pub actual_price: PriceTag,
    pub rating: f64,
    pub about_product: String,
    pub product_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub product_id: String,
    pub reviewer_id: String,
    pub title: String,
    pub content: String,
}

/// One unit sold. The store assigns a synthetic id on insert; sale rows are
/// not required to be unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub product_id: String,
    pub date_sold: NaiveDate,
}

/// Normalizer -> loader handoff: deduplicated entity sets in first-occurrence
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBundle {
    pub products: Vec<Product>,
    pub reviewers: Vec<Reviewer>,
    pub reviews: Vec<Review>,
    pub sales: Vec<Sale>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    InProgress,
    Success,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InProgress => "IN_PROGRESS",
            SyncStatus::Success => "SUCCESS",
            SyncStatus::Error => "ERROR",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "IN_PROGRESS" => Some(SyncStatus::InProgress),
            "SUCCESS" => Some(SyncStatus::Success),
            "ERROR" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

/// Append-only audit record of one synchronization attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: Uuid,
    pub status: SyncStatus,
    /// Count of raw input rows, not normalized entity count.
    pub rows_updated: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Error)]
#[error("invalid sale date `{raw}`: expected d/m/yy")]
pub struct ParseDateError {
    pub raw: String,
}

/// Parse the feed's sale-date format: day/month/two-digit-year,
/// e.g. `15/03/24` -> 2024-03-15.
pub fn parse_sheet_date(raw: &str) -> Result<NaiveDate, ParseDateError> {
    let err = || ParseDateError {
        raw: raw.to_string(),
    };
    let mut parts = raw.split('/');
    let day: u32 = parts.next().and_then(|p| p.trim().parse().ok()).ok_or_else(err)?;
    let month: u32 = parts.next().and_then(|p| p.trim().parse().ok()).ok_or_else(err)?;
    let year: i32 = parts.next().and_then(|p| p.trim().parse().ok()).ok_or_else(err)?;
    if parts.next().is_some() || year > 99 {
        return Err(err());
    }
    NaiveDate::from_ymd_opt(2000 + year, month, day).ok_or_else(err)
}

/// Top-level segment of a pipe-delimited category hierarchy; `Other` when the
/// segment is empty.
pub fn top_level_category(category: &str) -> &str {
    match category.split('|').next() {
        Some(head) if !head.is_empty() => head,
        _ => "Other",
    }
}

/// Filter tuple scoping a metrics query; also its cache identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardFilter {
    pub category: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl DashboardFilter {
    /// The part of the filter the store can apply itself. Price bounds are
    /// excluded: prices are formatted strings and must be parsed after fetch.
    pub fn product_query(&self) -> ProductQuery {
        ProductQuery {
            category_contains: self.category.clone(),
            min_rating: self.min_rating,
            max_rating: self.max_rating,
        }
    }

    pub fn sale_window(&self) -> SaleWindow {
        SaleWindow {
            from: self.date_from,
            to: self.date_to,
        }
    }

    /// Inclusive price-bound check against a parsed price, applied after
    /// fetch.
    pub fn price_in_bounds(&self, price: f64) -> bool {
        if let Some(min) = self.min_price {
            if price < min {
                return false;
            }
        }
        if let Some(max) = self.max_price {
            if price > max {
                return false;
            }
        }
        true
    }
}

/// Store-side product filter: case-insensitive category substring plus
/// inclusive rating bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductQuery {
    pub category_contains: Option<String>,
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
}

impl ProductQuery {
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(needle) = &self.category_contains {
            if !product
                .category
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(min) = self.min_rating {
            if product.rating < min {
                return false;
            }
        }
        if let Some(max) = self.max_rating {
            if product.rating > max {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaleWindow {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl SaleWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// A product together with its review count, as read back for aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductStats {
    pub product: Product,
    pub review_count: i64,
}

/// A review joined with its product and reviewer names, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDetail {
    pub id: String,
    pub title: String,
    pub content: String,
    pub product_name: String,
    pub reviewer_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeCount {
    pub range: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub price: f64,
    pub rating: f64,
    pub product_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    /// ISO `YYYY-MM-DD` of the sale date.
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRevenue {
    pub product_name: String,
    /// Synthetic revenue: parsed price x review count.
    pub revenue: f64,
    pub review_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub category: String,
    pub average_rating: f64,
    pub product_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReviewCount {
    pub product_name: String,
    pub review_count: i64,
}

/// The full dashboard payload; field names match the JSON the dashboard
/// consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub total_products: i64,
    pub average_rating: f64,
    pub total_reviews: i64,
    pub average_price: i64,
    pub rating_distribution: Vec<RangeCount>,
    pub price_vs_rating: Vec<PricePoint>,
    pub daily_sales: Vec<DailyCount>,
    pub revenue_by_product: Vec<ProductRevenue>,
    pub category_performance: Vec<CategoryStats>,
    pub price_distribution: Vec<RangeCount>,
    pub reviews_per_product: Vec<ProductReviewCount>,
    pub recent_reviews: Vec<ReviewDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_tag_parses_formatted_currency() {
        assert_eq!(PriceTag::new("₹1,099").amount(), 1099.0);
        assert_eq!(PriceTag::new("₹349").amount(), 349.0);
        assert_eq!(PriceTag::new("$12.50").amount(), 12.5);
        assert_eq!(PriceTag::zero().amount(), 0.0);
    }

    #[test]
    fn price_tag_defaults_unparsable_to_zero() {
        assert_eq!(PriceTag::new("free").amount(), 0.0);
        assert_eq!(PriceTag::new("").amount(), 0.0);
        assert_eq!(PriceTag::new("1.2.3").amount(), 0.0);
    }

    #[test]
    fn sheet_date_parses_day_month_short_year() {
        let date = parse_sheet_date("15/03/24").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(
            parse_sheet_date("1/1/00").unwrap(),
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
        );
    }

    #[test]
    fn sheet_date_rejects_malformed_input() {
        assert!(parse_sheet_date("2024-03-15").is_err());
        assert!(parse_sheet_date("32/01/24").is_err());
        assert!(parse_sheet_date("15/03").is_err());
        assert!(parse_sheet_date("15/03/2024").is_err());
        assert!(parse_sheet_date("").is_err());
    }

    #[test]
    fn top_level_category_takes_first_segment() {
        assert_eq!(
            top_level_category("Computers&Accessories|Cables|USBCables"),
            "Computers&Accessories"
        );
        assert_eq!(top_level_category("Electronics"), "Electronics");
        assert_eq!(top_level_category(""), "Other");
        assert_eq!(top_level_category("|Cables"), "Other");
    }

    #[test]
    fn raw_row_col_trims_and_defaults() {
        let row = RawRow::from_pairs([("product_id", "  P1  "), ("rating", "4.2")]);
        assert_eq!(row.col("product_id"), "P1");
        assert_eq!(row.col("rating"), "4.2");
        assert_eq!(row.col("missing"), "");
    }

    #[test]
    fn price_bounds_are_inclusive_and_optional() {
        let filter = DashboardFilter {
            min_price: Some(100.0),
            max_price: Some(500.0),
            ..Default::default()
        };
        assert!(filter.price_in_bounds(100.0));
        assert!(filter.price_in_bounds(500.0));
        assert!(!filter.price_in_bounds(99.9));
        assert!(!filter.price_in_bounds(500.1));
        assert!(DashboardFilter::default().price_in_bounds(1_000_000.0));
    }

    #[test]
    fn product_query_matches_category_case_insensitively() {
        let product = Product {
            id: "P1".into(),
            name: "Cable".into(),
            category: "Computers&Accessories|Cables".into(),
            actual_price: PriceTag::new("₹349"),
            rating: 4.0,
            about_product: String::new(),
            product_link: String::new(),
        };
        let query = ProductQuery {
            category_contains: Some("cables".into()),
            ..Default::default()
        };
        assert!(query.matches(&product));

        let out_of_range = ProductQuery {
            min_rating: Some(4.5),
            ..Default::default()
        };
        assert!(!out_of_range.matches(&product));
    }
}
