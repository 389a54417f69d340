//! Dashboard metrics aggregation: filtered rollups over the analytics store
//! with a read-through JSON cache keyed by the filter tuple.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use prism_core::{
    top_level_category, CategoryStats, DailyCount, DashboardFilter, DashboardMetrics, PricePoint,
    ProductRevenue, ProductReviewCount, ProductStats, RangeCount, ReviewDetail,
};
use prism_store::{AnalyticsStore, Cache, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "prism-metrics";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Top-N cutoff for the per-product rollups.
const TOP_PRODUCT_LIMIT: usize = 10;
const RECENT_REVIEW_LIMIT: i64 = 10;
const REVIEW_PREVIEW_CHARS: usize = 150;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("analytics query failed: {0}")]
    Store(#[from] StoreError),
    #[error("metrics serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Cache identity of a filter tuple. Every filter dimension appears in the
/// key with an explicit placeholder so distinct filters never collide.
pub fn cache_key(filter: &DashboardFilter) -> String {
    let parts = [
        "dashboard".to_string(),
        "metrics".to_string(),
        filter.category.clone().unwrap_or_else(|| "all".to_string()),
        filter.min_price.map_or_else(|| "0".to_string(), fmt_bound),
        filter
            .max_price
            .map_or_else(|| "999999".to_string(), fmt_bound),
        filter.min_rating.map_or_else(|| "0".to_string(), fmt_bound),
        filter.max_rating.map_or_else(|| "5".to_string(), fmt_bound),
        filter
            .date_from
            .map_or_else(|| "all".to_string(), |d| d.to_string()),
        filter
            .date_to
            .map_or_else(|| "all".to_string(), |d| d.to_string()),
    ];
    prism_store::compose_key(&parts.iter().map(String::as_str).collect::<Vec<_>>())
}

fn fmt_bound(value: f64) -> String {
    value.to_string()
}

/// Computes the dashboard payload for a filter, caching the JSON encoding.
///
/// Category and rating bounds are pushed down to the store; price bounds are
/// applied here after parsing the formatted price strings. `averageRating`
/// and `totalReviews` deliberately ignore the price bounds, matching what
/// the dashboard has always shown.
pub struct MetricsAggregator {
    store: Arc<dyn AnalyticsStore>,
    cache: Arc<dyn Cache>,
    cache_ttl: Duration,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn AnalyticsStore>, cache: Arc<dyn Cache>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache,
            cache_ttl,
        }
    }

    pub async fn compute(&self, filter: &DashboardFilter) -> Result<DashboardMetrics, MetricsError> {
        let key = cache_key(filter);
        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_str(&raw) {
                Ok(metrics) => {
                    debug!(key, "dashboard metrics served from cache");
                    return Ok(metrics);
                }
                Err(err) => {
                    warn!(key, %err, "discarding unreadable cached metrics entry");
                }
            }
        }

        let metrics = self.aggregate(filter).await?;
        let encoded = serde_json::to_string(&metrics)?;
        self.cache.set(&key, encoded, self.cache_ttl).await;
        Ok(metrics)
    }

    async fn aggregate(&self, filter: &DashboardFilter) -> Result<DashboardMetrics, MetricsError> {
        let query = filter.product_query();
        let window = filter.sale_window();

        let average_rating = round2(self.store.average_rating(&query).await?);
        let total_reviews = self.store.count_reviews(&query).await?;
        let stats = self.store.products_with_review_counts(&query).await?;
        let sales = self.store.sales_in_window(&query, &window).await?;
        let recent = self.store.recent_reviews(&query, RECENT_REVIEW_LIMIT).await?;

        let filtered: Vec<(ProductStats, f64)> = stats
            .into_iter()
            .map(|s| {
                let price = s.product.actual_price.amount();
                (s, price)
            })
            .filter(|(_, price)| filter.price_in_bounds(*price))
            .collect();

        let price_sum: f64 = filtered.iter().map(|(_, price)| price).sum();
        let average_price = (price_sum / filtered.len().max(1) as f64).round() as i64;

        let price_vs_rating = filtered
            .iter()
            .map(|(s, price)| PricePoint {
                price: *price,
                rating: s.product.rating,
                product_name: s.product.name.clone(),
            })
            .collect();

        let mut by_date: BTreeMap<String, i64> = BTreeMap::new();
        for sale in &sales {
            *by_date.entry(sale.date_sold.to_string()).or_insert(0) += 1;
        }
        let daily_sales = by_date
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect();

        let mut revenue_by_product: Vec<ProductRevenue> = filtered
            .iter()
            .map(|(s, price)| ProductRevenue {
                product_name: s.product.name.clone(),
                revenue: price * s.review_count as f64,
                review_count: s.review_count,
            })
            .collect();
        revenue_by_product.sort_by(|a, b| b.revenue.total_cmp(&a.revenue));
        revenue_by_product.truncate(TOP_PRODUCT_LIMIT);

        let mut reviews_per_product: Vec<ProductReviewCount> = filtered
            .iter()
            .map(|(s, _)| ProductReviewCount {
                product_name: s.product.name.clone(),
                review_count: s.review_count,
            })
            .collect();
        reviews_per_product.sort_by(|a, b| b.review_count.cmp(&a.review_count));
        reviews_per_product.truncate(TOP_PRODUCT_LIMIT);

        let recent_reviews = recent.into_iter().map(preview_review).collect();

        Ok(DashboardMetrics {
            total_products: filtered.len() as i64,
            average_rating,
            total_reviews,
            average_price,
            rating_distribution: rating_distribution(&filtered),
            price_vs_rating,
            daily_sales,
            revenue_by_product,
            category_performance: category_performance(&filtered),
            price_distribution: price_distribution(&filtered),
            reviews_per_product,
            recent_reviews,
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Four fixed buckets; ratings outside [1, 5] fall into none of them.
fn rating_distribution(filtered: &[(ProductStats, f64)]) -> Vec<RangeCount> {
    let mut buckets = [
        RangeCount { range: "1-2".to_string(), count: 0 },
        RangeCount { range: "2-3".to_string(), count: 0 },
        RangeCount { range: "3-4".to_string(), count: 0 },
        RangeCount { range: "4-5".to_string(), count: 0 },
    ];
    for (stats, _) in filtered {
        let rating = stats.product.rating;
        if (1.0..2.0).contains(&rating) {
            buckets[0].count += 1;
        } else if (2.0..3.0).contains(&rating) {
            buckets[1].count += 1;
        } else if (3.0..4.0).contains(&rating) {
            buckets[2].count += 1;
        } else if (4.0..=5.0).contains(&rating) {
            buckets[3].count += 1;
        }
    }
    buckets.to_vec()
}

fn price_distribution(filtered: &[(ProductStats, f64)]) -> Vec<RangeCount> {
    let spans: [(&str, f64, f64); 4] = [
        ("₹0-500", 0.0, 500.0),
        ("₹500-1000", 500.0, 1000.0),
        ("₹1000-2000", 1000.0, 2000.0),
        ("₹2000+", 2000.0, f64::INFINITY),
    ];
    let mut buckets: Vec<RangeCount> = spans
        .iter()
        .map(|(range, _, _)| RangeCount {
            range: range.to_string(),
            count: 0,
        })
        .collect();
    for (_, price) in filtered {
        for (i, (_, min, max)) in spans.iter().enumerate() {
            if *price >= *min && *price < *max {
                buckets[i].count += 1;
                break;
            }
        }
    }
    buckets
}

/// Per top-level category segment, in first-seen order.
fn category_performance(filtered: &[(ProductStats, f64)]) -> Vec<CategoryStats> {
    let mut groups: Vec<(String, f64, i64)> = Vec::new();
    for (stats, _) in filtered {
        let segment = top_level_category(&stats.product.category);
        match groups.iter_mut().find(|(name, _, _)| name == segment) {
            Some((_, total, count)) => {
                *total += stats.product.rating;
                *count += 1;
            }
            None => groups.push((segment.to_string(), stats.product.rating, 1)),
        }
    }
    groups
        .into_iter()
        .map(|(category, total, count)| CategoryStats {
            category,
            average_rating: total / count as f64,
            product_count: count,
        })
        .collect()
}

fn preview_review(mut review: ReviewDetail) -> ReviewDetail {
    if review.content.chars().count() > REVIEW_PREVIEW_CHARS {
        let mut preview: String = review.content.chars().take(REVIEW_PREVIEW_CHARS).collect();
        preview.push_str("...");
        review.content = preview;
    }
    review
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use prism_core::{PriceTag, Product, Review, Reviewer, Sale};
    use prism_store::{CatalogStore, MemoryCache, MemoryStore};

    fn product(id: &str, name: &str, category: &str, price: &str, rating: f64) -> Product {
        Product {
            id: id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            actual_price: PriceTag::new(price),
            rating,
            about_product: String::new(),
            product_link: String::new(),
        }
    }

    fn review(id: &str, product_id: &str, content: &str) -> Review {
        Review {
            id: id.to_string(),
            product_id: product_id.to_string(),
            reviewer_id: "U1".to_string(),
            title: "t".to_string(),
            content: content.to_string(),
        }
    }

    async fn seed(store: &MemoryStore, products: &[Product], reviews: &[Review], sales: &[Sale]) {
        let mut tx = store.begin(Duration::from_secs(5)).await.unwrap();
        tx.upsert_products(products).await.unwrap();
        tx.upsert_reviewers(&[Reviewer {
            id: "U1".to_string(),
            name: "Alice".to_string(),
        }])
        .await
        .unwrap();
        tx.insert_sales(sales).await.unwrap();
        tx.upsert_reviews(reviews).await.unwrap();
        tx.commit().await.unwrap();
    }

    fn aggregator(store: &MemoryStore) -> (MetricsAggregator, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let aggregator = MetricsAggregator::new(
            Arc::new(store.clone()),
            Arc::clone(&cache) as Arc<dyn Cache>,
            DEFAULT_CACHE_TTL,
        );
        (aggregator, cache)
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        seed(
            &store,
            &[
                product("P1", "Cable", "Computers&Accessories|Cables", "₹349", 4.5),
                product("P2", "Speaker", "Electronics|Speakers", "₹2,499", 3.8),
                product("P3", "Mystery", "", "₹99", 1.5),
            ],
            &[
                review("R1", "P1", "solid"),
                review("R2", "P1", "works"),
                review("R3", "P2", "loud"),
            ],
            &[
                Sale {
                    product_id: "P1".to_string(),
                    date_sold: NaiveDate::from_ymd_opt(2024, 3, 16).unwrap(),
                },
                Sale {
                    product_id: "P1".to_string(),
                    date_sold: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
                },
                Sale {
                    product_id: "P2".to_string(),
                    date_sold: NaiveDate::from_ymd_opt(2024, 3, 16).unwrap(),
                },
            ],
        )
        .await;
        store
    }

    #[tokio::test]
    async fn unfiltered_rollups_cover_the_whole_store() {
        let store = seeded_store().await;
        let (aggregator, _) = aggregator(&store);
        let metrics = aggregator.compute(&DashboardFilter::default()).await.unwrap();

        assert_eq!(metrics.total_products, 3);
        // (4.5 + 3.8 + 1.5) / 3, rounded to two decimals.
        assert_eq!(metrics.average_rating, 3.27);
        assert_eq!(metrics.total_reviews, 3);
        // (349 + 2499 + 99) / 3 = 982.33 -> 982.
        assert_eq!(metrics.average_price, 982);

        let rating_counts: i64 = metrics.rating_distribution.iter().map(|b| b.count).sum();
        assert_eq!(rating_counts, 3);
        assert_eq!(metrics.rating_distribution[0].count, 1); // 1.5
        assert_eq!(metrics.rating_distribution[2].count, 1); // 3.8
        assert_eq!(metrics.rating_distribution[3].count, 1); // 4.5

        let price_counts: i64 = metrics.price_distribution.iter().map(|b| b.count).sum();
        assert_eq!(price_counts, metrics.total_products);
        assert_eq!(metrics.price_distribution[0].count, 2); // 349, 99
        assert_eq!(metrics.price_distribution[3].count, 1); // 2499

        // Ascending by date, counts grouped.
        assert_eq!(
            metrics
                .daily_sales
                .iter()
                .map(|d| (d.date.as_str(), d.count))
                .collect::<Vec<_>>(),
            vec![("2024-03-15", 1), ("2024-03-16", 2)]
        );

        // 2499 * 1 review beats 349 * 2 reviews.
        assert_eq!(metrics.revenue_by_product[0].product_name, "Speaker");
        assert_eq!(metrics.revenue_by_product[0].revenue, 2499.0);
        assert_eq!(metrics.revenue_by_product[1].product_name, "Cable");
        assert_eq!(metrics.revenue_by_product[1].revenue, 698.0);

        assert_eq!(metrics.reviews_per_product[0].product_name, "Cable");
        assert_eq!(metrics.reviews_per_product[0].review_count, 2);

        let categories: Vec<&str> = metrics
            .category_performance
            .iter()
            .map(|c| c.category.as_str())
            .collect();
        assert_eq!(
            categories,
            vec!["Computers&Accessories", "Electronics", "Other"]
        );

        // Newest first.
        assert_eq!(metrics.recent_reviews.len(), 3);
        assert_eq!(metrics.recent_reviews[0].id, "R3");
        assert_eq!(metrics.recent_reviews[0].product_name, "Speaker");
        assert_eq!(metrics.recent_reviews[0].reviewer_name, "Alice");
    }

    #[tokio::test]
    async fn price_bounds_trim_products_but_not_store_side_rollups() {
        let store = seeded_store().await;
        let (aggregator, _) = aggregator(&store);
        let filter = DashboardFilter {
            min_price: Some(1000.0),
            ..Default::default()
        };
        let metrics = aggregator.compute(&filter).await.unwrap();

        assert_eq!(metrics.total_products, 1);
        assert_eq!(metrics.price_vs_rating.len(), 1);
        assert_eq!(metrics.price_vs_rating[0].product_name, "Speaker");
        assert_eq!(metrics.average_price, 2499);
        // averageRating and totalReviews keep the store-side scope.
        assert_eq!(metrics.average_rating, 3.27);
        assert_eq!(metrics.total_reviews, 3);
    }

    #[tokio::test]
    async fn rating_bounds_apply_store_side() {
        let store = seeded_store().await;
        let (aggregator, _) = aggregator(&store);
        let filter = DashboardFilter {
            min_rating: Some(4.0),
            ..Default::default()
        };
        let metrics = aggregator.compute(&filter).await.unwrap();

        assert_eq!(metrics.total_products, 1);
        assert_eq!(metrics.average_rating, 4.5);
        assert_eq!(metrics.total_reviews, 2);
        assert_eq!(metrics.category_performance.len(), 1);
        assert_eq!(
            metrics.category_performance[0].category,
            "Computers&Accessories"
        );
    }

    #[tokio::test]
    async fn compute_reads_through_the_cache() {
        let store = seeded_store().await;
        let (aggregator, cache) = aggregator(&store);
        let filter = DashboardFilter::default();

        let first = aggregator.compute(&filter).await.unwrap();
        assert!(cache.get(&cache_key(&filter)).await.is_some());

        // A store change behind a warm cache is invisible until invalidation.
        seed(
            &store,
            &[product("P4", "Extra", "Electronics|Other", "₹10", 2.5)],
            &[],
            &[],
        )
        .await;
        let second = aggregator.compute(&filter).await.unwrap();
        assert_eq!(second, first);

        cache.invalidate("dashboard:*").await;
        let third = aggregator.compute(&filter).await.unwrap();
        assert_eq!(third.total_products, 4);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_treated_as_a_miss() {
        let store = seeded_store().await;
        let (aggregator, cache) = aggregator(&store);
        let filter = DashboardFilter::default();
        cache
            .set(&cache_key(&filter), "not json".to_string(), DEFAULT_CACHE_TTL)
            .await;

        let metrics = aggregator.compute(&filter).await.unwrap();
        assert_eq!(metrics.total_products, 3);
    }

    #[tokio::test]
    async fn long_review_content_is_previewed() {
        let store = MemoryStore::new();
        let long = "x".repeat(200);
        seed(
            &store,
            &[product("P1", "Cable", "Cables", "₹349", 4.5)],
            &[review("R1", "P1", &long)],
            &[],
        )
        .await;
        let (aggregator, _) = aggregator(&store);

        let metrics = aggregator.compute(&DashboardFilter::default()).await.unwrap();
        let content = &metrics.recent_reviews[0].content;
        assert_eq!(content.chars().count(), 153);
        assert!(content.ends_with("..."));
    }

    #[tokio::test]
    async fn empty_store_yields_zeroed_metrics() {
        let store = MemoryStore::new();
        let (aggregator, _) = aggregator(&store);
        let metrics = aggregator.compute(&DashboardFilter::default()).await.unwrap();

        assert_eq!(metrics.total_products, 0);
        assert_eq!(metrics.average_rating, 0.0);
        assert_eq!(metrics.total_reviews, 0);
        assert_eq!(metrics.average_price, 0);
        assert!(metrics.daily_sales.is_empty());
        assert!(metrics.recent_reviews.is_empty());
        assert!(metrics.rating_distribution.iter().all(|b| b.count == 0));
    }

    #[tokio::test]
    async fn bucket_edges_follow_half_open_ranges() {
        let store = MemoryStore::new();
        seed(
            &store,
            &[
                product("P1", "A", "C", "₹500", 2.0),
                product("P2", "B", "C", "₹1999", 5.0),
                product("P3", "C", "C", "₹2000", 0.5),
            ],
            &[],
            &[],
        )
        .await;
        let (aggregator, _) = aggregator(&store);
        let metrics = aggregator.compute(&DashboardFilter::default()).await.unwrap();

        assert_eq!(metrics.price_distribution[1].count, 1); // 500 opens ₹500-1000
        assert_eq!(metrics.price_distribution[2].count, 1); // 1999
        assert_eq!(metrics.price_distribution[3].count, 1); // 2000 is ₹2000+

        assert_eq!(metrics.rating_distribution[1].count, 1); // 2.0 opens 2-3
        assert_eq!(metrics.rating_distribution[3].count, 1); // 5.0 closes 4-5
        // 0.5 lands in no rating bucket.
        let total: i64 = metrics.rating_distribution.iter().map(|b| b.count).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn cache_key_spells_out_every_dimension() {
        assert_eq!(
            cache_key(&DashboardFilter::default()),
            "dashboard:metrics:all:0:999999:0:5:all:all"
        );
        let filter = DashboardFilter {
            category: Some("Cables".to_string()),
            min_price: Some(100.0),
            max_rating: Some(4.5),
            date_from: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        };
        assert_eq!(
            cache_key(&filter),
            "dashboard:metrics:Cables:100:999999:0:4.5:2024-03-01:all"
        );
    }
}
