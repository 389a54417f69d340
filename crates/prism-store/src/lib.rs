//! Store contracts and backends for PRISM: the Postgres catalog store, an
//! in-memory backend with real transaction semantics for fixtures and tests,
//! and a TTL cache with pattern invalidation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prism_core::{
    Product, ProductQuery, ProductStats, Review, ReviewDetail, Reviewer, Sale, SaleWindow,
    SyncRun, SyncStatus,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

pub const CRATE_NAME: &str = "prism-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("unknown sync status `{0}`")]
    UnknownStatus(String),
    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Product,
    Reviewer,
    Review,
    Sale,
}

impl EntityKind {
    fn table(&self) -> &'static str {
        match self {
            EntityKind::Product => "products",
            EntityKind::Reviewer => "reviewers",
            EntityKind::Review => "reviews",
            EntityKind::Sale => "sales",
        }
    }
}

/// One open replace transaction against the catalog tables.
///
/// Dropping a session without `commit` must leave the store unchanged; the
/// caller owns delete/insert ordering.
#[async_trait]
pub trait CatalogTx: Send {
    async fn delete_all(&mut self, kind: EntityKind) -> Result<u64, StoreError>;
    async fn upsert_products(&mut self, batch: &[Product]) -> Result<u64, StoreError>;
    async fn upsert_reviewers(&mut self, batch: &[Reviewer]) -> Result<u64, StoreError>;
    async fn insert_sales(&mut self, batch: &[Sale]) -> Result<u64, StoreError>;
    async fn upsert_reviews(&mut self, batch: &[Review]) -> Result<u64, StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Open a transaction with the given statement timeout. Bulk replaces
    /// need far more than default store timeouts.
    async fn begin(&self, timeout: Duration) -> Result<Box<dyn CatalogTx>, StoreError>;
}

/// Append-only run log: one row per sync attempt.
#[async_trait]
pub trait SyncRunStore: Send + Sync {
    async fn create_run(&self) -> Result<SyncRun, StoreError>;
    async fn mark_success(&self, id: Uuid, rows_updated: i64) -> Result<(), StoreError>;
    async fn mark_error(&self, id: Uuid, message: &str) -> Result<(), StoreError>;
    async fn in_progress_run(&self) -> Result<Option<SyncRun>, StoreError>;
    async fn last_run(&self) -> Result<Option<SyncRun>, StoreError>;
    async fn history(&self, limit: i64) -> Result<Vec<SyncRun>, StoreError>;
}

/// Read side for the metrics aggregation: category/rating filters are applied
/// store-side, price filtering happens after fetch.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn average_rating(&self, query: &ProductQuery) -> Result<f64, StoreError>;
    async fn count_reviews(&self, query: &ProductQuery) -> Result<i64, StoreError>;
    async fn products_with_review_counts(
        &self,
        query: &ProductQuery,
    ) -> Result<Vec<ProductStats>, StoreError>;
    async fn sales_in_window(
        &self,
        query: &ProductQuery,
        window: &SaleWindow,
    ) -> Result<Vec<Sale>, StoreError>;
    async fn recent_reviews(
        &self,
        query: &ProductQuery,
        limit: i64,
    ) -> Result<Vec<ReviewDetail>, StoreError>;
}

/// Key/value cache with per-entry TTL and glob-prefix invalidation.
/// Cache failures are never fatal: implementations log and degrade to a miss.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    /// Remove every key matching the pattern. A trailing `*` matches any
    /// suffix; otherwise the key must match exactly.
    async fn invalidate(&self, pattern: &str);
}

/// Colon-joined cache key from its parts.
pub fn compose_key(parts: &[&str]) -> String {
    parts.join(":")
}

// ---------------------------------------------------------------------------
// Postgres backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

pub struct PgCatalogTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTx for PgCatalogTx {
    async fn delete_all(&mut self, kind: EntityKind) -> Result<u64, StoreError> {
        let stmt = format!("DELETE FROM {}", kind.table());
        let result = sqlx::query(&stmt).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn upsert_products(&mut self, batch: &[Product]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO products (id, name, category, actual_price, rating, about_product, product_link) ",
        );
        qb.push_values(batch, |mut b, p| {
            b.push_bind(&p.id)
                .push_bind(&p.name)
                .push_bind(&p.category)
                .push_bind(p.actual_price.as_str())
                .push_bind(p.rating)
                .push_bind(&p.about_product)
                .push_bind(&p.product_link);
        });
        qb.push(
            " ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, category = EXCLUDED.category, \
             actual_price = EXCLUDED.actual_price, rating = EXCLUDED.rating, \
             about_product = EXCLUDED.about_product, product_link = EXCLUDED.product_link",
        );
        let result = qb.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn upsert_reviewers(&mut self, batch: &[Reviewer]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO reviewers (id, name) ");
        qb.push_values(batch, |mut b, r| {
            b.push_bind(&r.id).push_bind(&r.name);
        });
        qb.push(" ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name");
        let result = qb.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn insert_sales(&mut self, batch: &[Sale]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO sales (product_id, date_sold) ");
        qb.push_values(batch, |mut b, s| {
            b.push_bind(&s.product_id).push_bind(s.date_sold);
        });
        let result = qb.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn upsert_reviews(&mut self, batch: &[Review]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO reviews (id, product_id, reviewer_id, title, content) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(&r.id)
                .push_bind(&r.product_id)
                .push_bind(&r.reviewer_id)
                .push_bind(&r.title)
                .push_bind(&r.content);
        });
        qb.push(
            " ON CONFLICT (id) DO UPDATE SET product_id = EXCLUDED.product_id, \
             reviewer_id = EXCLUDED.reviewer_id, title = EXCLUDED.title, \
             content = EXCLUDED.content",
        );
        let result = qb.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn begin(&self, timeout: Duration) -> Result<Box<dyn CatalogTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let stmt = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
        sqlx::query(&stmt).execute(&mut *tx).await?;
        Ok(Box::new(PgCatalogTx { tx }))
    }
}

fn row_to_sync_run(row: &sqlx::postgres::PgRow) -> Result<SyncRun, StoreError> {
    let status_raw: String = row.try_get("status")?;
    let status = SyncStatus::parse(&status_raw).ok_or(StoreError::UnknownStatus(status_raw))?;
    Ok(SyncRun {
        id: row.try_get("id")?,
        status,
        rows_updated: row.try_get("rows_updated")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
    })
}

const SYNC_RUN_COLUMNS: &str = "id, status, rows_updated, started_at, completed_at, error_message";

#[async_trait]
impl SyncRunStore for PgStore {
    async fn create_run(&self) -> Result<SyncRun, StoreError> {
        let run = SyncRun {
            id: Uuid::new_v4(),
            status: SyncStatus::InProgress,
            rows_updated: 0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        };
        sqlx::query("INSERT INTO sync_runs (id, status, rows_updated, started_at) VALUES ($1, $2, $3, $4)")
            .bind(run.id)
            .bind(run.status.as_str())
            .bind(run.rows_updated)
            .bind(run.started_at)
            .execute(&self.pool)
            .await?;
        Ok(run)
    }

    async fn mark_success(&self, id: Uuid, rows_updated: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sync_runs SET status = $2, rows_updated = $3, completed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(SyncStatus::Success.as_str())
        .bind(rows_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_error(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sync_runs SET status = $2, error_message = $3, completed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(SyncStatus::Error.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn in_progress_run(&self) -> Result<Option<SyncRun>, StoreError> {
        let stmt = format!(
            "SELECT {SYNC_RUN_COLUMNS} FROM sync_runs WHERE status = $1 ORDER BY started_at DESC LIMIT 1",
        );
        let row = sqlx::query(&stmt)
            .bind(SyncStatus::InProgress.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_sync_run).transpose()
    }

    async fn last_run(&self) -> Result<Option<SyncRun>, StoreError> {
        let stmt =
            format!("SELECT {SYNC_RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC LIMIT 1");
        let row = sqlx::query(&stmt).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_sync_run).transpose()
    }

    async fn history(&self, limit: i64) -> Result<Vec<SyncRun>, StoreError> {
        let stmt =
            format!("SELECT {SYNC_RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC LIMIT $1");
        let rows = sqlx::query(&stmt).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_sync_run).collect()
    }
}

/// Append the store-side product filter; `alias` is the products table alias
/// including its trailing dot, or empty.
fn push_product_filter(qb: &mut QueryBuilder<'_, Postgres>, alias: &str, query: &ProductQuery) {
    if let Some(needle) = &query.category_contains {
        qb.push(format!(" AND {alias}category ILIKE "));
        qb.push_bind(format!("%{needle}%"));
    }
    if let Some(min) = query.min_rating {
        qb.push(format!(" AND {alias}rating >= "));
        qb.push_bind(min);
    }
    if let Some(max) = query.max_rating {
        qb.push(format!(" AND {alias}rating <= "));
        qb.push_bind(max);
    }
}

fn row_to_product(row: &sqlx::postgres::PgRow) -> Result<Product, StoreError> {
    let actual_price: String = row.try_get("actual_price")?;
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        actual_price: prism_core::PriceTag::new(actual_price),
        rating: row.try_get("rating")?,
        about_product: row.try_get("about_product")?,
        product_link: row.try_get("product_link")?,
    })
}

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn average_rating(&self, query: &ProductQuery) -> Result<f64, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT AVG(rating) AS avg_rating FROM products WHERE 1=1");
        push_product_filter(&mut qb, "", query);
        let row = qb.build().fetch_one(&self.pool).await?;
        let avg: Option<f64> = row.try_get("avg_rating")?;
        Ok(avg.unwrap_or(0.0))
    }

    async fn count_reviews(&self, query: &ProductQuery) -> Result<i64, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) AS n FROM reviews r JOIN products p ON p.id = r.product_id WHERE 1=1",
        );
        push_product_filter(&mut qb, "p.", query);
        let row = qb.build().fetch_one(&self.pool).await?;
        Ok(row.try_get("n")?)
    }

    async fn products_with_review_counts(
        &self,
        query: &ProductQuery,
    ) -> Result<Vec<ProductStats>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT p.id, p.name, p.category, p.actual_price, p.rating, p.about_product, \
             p.product_link, COUNT(r.id) AS review_count \
             FROM products p LEFT JOIN reviews r ON r.product_id = p.id WHERE 1=1",
        );
        push_product_filter(&mut qb, "p.", query);
        qb.push(" GROUP BY p.id ORDER BY p.id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(ProductStats {
                    product: row_to_product(row)?,
                    review_count: row.try_get("review_count")?,
                })
            })
            .collect()
    }

    async fn sales_in_window(
        &self,
        query: &ProductQuery,
        window: &SaleWindow,
    ) -> Result<Vec<Sale>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT s.product_id, s.date_sold FROM sales s \
             JOIN products p ON p.id = s.product_id WHERE 1=1",
        );
        push_product_filter(&mut qb, "p.", query);
        if let Some(from) = window.from {
            qb.push(" AND s.date_sold >= ");
            qb.push_bind(from);
        }
        if let Some(to) = window.to {
            qb.push(" AND s.date_sold <= ");
            qb.push_bind(to);
        }
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(Sale {
                    product_id: row.try_get("product_id")?,
                    date_sold: row.try_get("date_sold")?,
                })
            })
            .collect()
    }

    async fn recent_reviews(
        &self,
        query: &ProductQuery,
        limit: i64,
    ) -> Result<Vec<ReviewDetail>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT r.id, r.title, r.content, r.created_at, p.name AS product_name, \
             v.name AS reviewer_name \
             FROM reviews r JOIN products p ON p.id = r.product_id \
             JOIN reviewers v ON v.id = r.reviewer_id WHERE 1=1",
        );
        push_product_filter(&mut qb, "p.", query);
        qb.push(" ORDER BY r.created_at DESC, r.id DESC LIMIT ");
        qb.push_bind(limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(ReviewDetail {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    content: row.try_get("content")?,
                    product_name: row.try_get("product_name")?,
                    reviewer_name: row.try_get("reviewer_name")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct CatalogState {
    products: Vec<Product>,
    reviewers: Vec<Reviewer>,
    reviews: Vec<StoredReview>,
    sales: Vec<Sale>,
}

#[derive(Debug, Clone)]
struct StoredReview {
    review: Review,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    catalog: CatalogState,
    runs: Vec<SyncRun>,
}

/// Store backend holding everything in process memory. Transactions stage a
/// working copy and publish it on commit, so rollback and injected failures
/// behave like the real store. Used for fixture-driven runs and tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StdMutex<MemoryInner>>,
    fail_review_batch: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the nth `upsert_reviews` call (0-based) of every transaction fail,
    /// for rollback coverage.
    pub fn with_review_batch_failure(mut self, nth: usize) -> Self {
        self.fail_review_batch = Some(nth);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of all products, for state assertions in tests.
    pub fn products_snapshot(&self) -> Vec<Product> {
        self.lock().catalog.products.clone()
    }

    pub fn reviews_snapshot(&self) -> Vec<Review> {
        self.lock()
            .catalog
            .reviews
            .iter()
            .map(|r| r.review.clone())
            .collect()
    }

    pub fn sales_snapshot(&self) -> Vec<Sale> {
        self.lock().catalog.sales.clone()
    }

    pub fn reviewers_snapshot(&self) -> Vec<Reviewer> {
        self.lock().catalog.reviewers.clone()
    }
}

struct MemoryCatalogTx {
    inner: Arc<StdMutex<MemoryInner>>,
    staged: CatalogState,
    review_batches_seen: usize,
    fail_review_batch: Option<usize>,
}

#[async_trait]
impl CatalogTx for MemoryCatalogTx {
    async fn delete_all(&mut self, kind: EntityKind) -> Result<u64, StoreError> {
        let n = match kind {
            EntityKind::Product => std::mem::take(&mut self.staged.products).len(),
            EntityKind::Reviewer => std::mem::take(&mut self.staged.reviewers).len(),
            EntityKind::Review => std::mem::take(&mut self.staged.reviews).len(),
            EntityKind::Sale => std::mem::take(&mut self.staged.sales).len(),
        };
        Ok(n as u64)
    }

    async fn upsert_products(&mut self, batch: &[Product]) -> Result<u64, StoreError> {
        for product in batch {
            match self.staged.products.iter_mut().find(|p| p.id == product.id) {
                Some(existing) => *existing = product.clone(),
                None => self.staged.products.push(product.clone()),
            }
        }
        Ok(batch.len() as u64)
    }

    async fn upsert_reviewers(&mut self, batch: &[Reviewer]) -> Result<u64, StoreError> {
        for reviewer in batch {
            match self.staged.reviewers.iter_mut().find(|r| r.id == reviewer.id) {
                Some(existing) => *existing = reviewer.clone(),
                None => self.staged.reviewers.push(reviewer.clone()),
            }
        }
        Ok(batch.len() as u64)
    }

    async fn insert_sales(&mut self, batch: &[Sale]) -> Result<u64, StoreError> {
        self.staged.sales.extend(batch.iter().cloned());
        Ok(batch.len() as u64)
    }

    async fn upsert_reviews(&mut self, batch: &[Review]) -> Result<u64, StoreError> {
        if self.fail_review_batch == Some(self.review_batches_seen) {
            return Err(StoreError::Backend("injected review batch failure".into()));
        }
        self.review_batches_seen += 1;
        let now = Utc::now();
        for review in batch {
            match self
                .staged
                .reviews
                .iter_mut()
                .find(|r| r.review.id == review.id)
            {
                Some(existing) => existing.review = review.clone(),
                None => self.staged.reviews.push(StoredReview {
                    review: review.clone(),
                    created_at: now,
                }),
            }
        }
        Ok(batch.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.catalog = self.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // The staged copy is simply dropped.
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn begin(&self, _timeout: Duration) -> Result<Box<dyn CatalogTx>, StoreError> {
        let staged = self.lock().catalog.clone();
        Ok(Box::new(MemoryCatalogTx {
            inner: Arc::clone(&self.inner),
            staged,
            review_batches_seen: 0,
            fail_review_batch: self.fail_review_batch,
        }))
    }
}

#[async_trait]
impl SyncRunStore for MemoryStore {
    async fn create_run(&self) -> Result<SyncRun, StoreError> {
        let run = SyncRun {
            id: Uuid::new_v4(),
            status: SyncStatus::InProgress,
            rows_updated: 0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        };
        self.lock().runs.push(run.clone());
        Ok(run)
    }

    async fn mark_success(&self, id: Uuid, rows_updated: i64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(run) = inner.runs.iter_mut().find(|r| r.id == id) {
            run.status = SyncStatus::Success;
            run.rows_updated = rows_updated;
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_error(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(run) = inner.runs.iter_mut().find(|r| r.id == id) {
            run.status = SyncStatus::Error;
            run.error_message = Some(message.to_string());
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn in_progress_run(&self) -> Result<Option<SyncRun>, StoreError> {
        Ok(self
            .lock()
            .runs
            .iter()
            .rev()
            .find(|r| r.status == SyncStatus::InProgress)
            .cloned())
    }

    async fn last_run(&self) -> Result<Option<SyncRun>, StoreError> {
        Ok(self.lock().runs.last().cloned())
    }

    async fn history(&self, limit: i64) -> Result<Vec<SyncRun>, StoreError> {
        Ok(self
            .lock()
            .runs
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn average_rating(&self, query: &ProductQuery) -> Result<f64, StoreError> {
        let inner = self.lock();
        let ratings: Vec<f64> = inner
            .catalog
            .products
            .iter()
            .filter(|p| query.matches(p))
            .map(|p| p.rating)
            .collect();
        if ratings.is_empty() {
            return Ok(0.0);
        }
        Ok(ratings.iter().sum::<f64>() / ratings.len() as f64)
    }

    async fn count_reviews(&self, query: &ProductQuery) -> Result<i64, StoreError> {
        let inner = self.lock();
        let count = inner
            .catalog
            .reviews
            .iter()
            .filter(|r| {
                inner
                    .catalog
                    .products
                    .iter()
                    .any(|p| p.id == r.review.product_id && query.matches(p))
            })
            .count();
        Ok(count as i64)
    }

    async fn products_with_review_counts(
        &self,
        query: &ProductQuery,
    ) -> Result<Vec<ProductStats>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .catalog
            .products
            .iter()
            .filter(|p| query.matches(p))
            .map(|p| ProductStats {
                product: p.clone(),
                review_count: inner
                    .catalog
                    .reviews
                    .iter()
                    .filter(|r| r.review.product_id == p.id)
                    .count() as i64,
            })
            .collect())
    }

    async fn sales_in_window(
        &self,
        query: &ProductQuery,
        window: &SaleWindow,
    ) -> Result<Vec<Sale>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .catalog
            .sales
            .iter()
            .filter(|s| window.contains(s.date_sold))
            .filter(|s| {
                inner
                    .catalog
                    .products
                    .iter()
                    .any(|p| p.id == s.product_id && query.matches(p))
            })
            .cloned()
            .collect())
    }

    async fn recent_reviews(
        &self,
        query: &ProductQuery,
        limit: i64,
    ) -> Result<Vec<ReviewDetail>, StoreError> {
        let inner = self.lock();
        // Insertion order doubles as creation order, so newest-first is a
        // reverse scan.
        Ok(inner
            .catalog
            .reviews
            .iter()
            .rev()
            .filter_map(|stored| {
                let product = inner
                    .catalog
                    .products
                    .iter()
                    .find(|p| p.id == stored.review.product_id)?;
                if !query.matches(product) {
                    return None;
                }
                let reviewer = inner
                    .catalog
                    .reviewers
                    .iter()
                    .find(|v| v.id == stored.review.reviewer_id)?;
                Some(ReviewDetail {
                    id: stored.review.id.clone(),
                    title: stored.review.title.clone(),
                    content: stored.review.content.clone(),
                    product_name: product.name.clone(),
                    reviewer_name: reviewer.name.clone(),
                    created_at: stored.created_at,
                })
            })
            .take(limit.max(0) as usize)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// In-memory TTL cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache with per-entry TTL; a sync invalidates the whole
/// dashboard namespace via the `*` pattern.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            warn!(key, "cache ttl overflow; entry dropped");
            return;
        };
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
    }

    async fn invalidate(&self, pattern: &str) {
        let mut entries = self.entries.lock().await;
        match pattern.strip_suffix('*') {
            Some(prefix) => entries.retain(|key, _| !key.starts_with(prefix)),
            None => {
                entries.remove(pattern);
            }
        }
    }
}
