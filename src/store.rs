//! SQLite-backed [`GazetteStore`].
//!
//! Idempotent create is a single `INSERT ... ON CONFLICT(public_url) DO NOTHING
//! RETURNING` statement: the unique index decides the race, and a conflict
//! is resolved by reading back the row that won it. There is no separate
//! existence check, so concurrent submitters cannot both insert.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::errors::StoreError;
use crate::migrate;
use crate::models::{CreateOutcome, GazetteRecord, NewGazette, Page};
use crate::period::YearMonth;
use crate::traits::GazetteStore;

pub struct SqliteGazetteStore {
    pool: SqlitePool,
}

impl SqliteGazetteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect using `[db]` settings and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gazettes")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn row_to_record(row: &SqliteRow) -> Result<GazetteRecord, StoreError> {
    Ok(GazetteRecord {
        id: row.try_get("id")?,
        publication_date: row.try_get("publication_date")?,
        public_url: row.try_get("public_url")?,
    })
}

#[async_trait]
impl GazetteStore for SqliteGazetteStore {
    async fn create(&self, new: &NewGazette) -> Result<CreateOutcome, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO gazettes (publication_date, public_url)
            VALUES (?, ?)
            ON CONFLICT(public_url) DO NOTHING
            RETURNING id, publication_date, public_url
            "#,
        )
        .bind(new.publication_date)
        .bind(&new.public_url)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            let record = row_to_record(&row)?;
            tracing::info!(id = record.id, url = %record.public_url, "gazette created");
            return Ok(CreateOutcome {
                record,
                created: true,
            });
        }

        // Lost the race (or a re-run): the winning row is authoritative.
        let row = sqlx::query(
            "SELECT id, publication_date, public_url FROM gazettes WHERE public_url = ?",
        )
        .bind(&new.public_url)
        .fetch_one(&self.pool)
        .await?;
        let record = row_to_record(&row)?;
        tracing::info!(id = record.id, url = %record.public_url, "gazette already exists");

        Ok(CreateOutcome {
            record,
            created: false,
        })
    }

    async fn list(
        &self,
        filter: Option<YearMonth>,
        page: Page,
    ) -> Result<Vec<GazetteRecord>, StoreError> {
        let rows = match filter {
            Some(period) => {
                let (first, last) = period.bounds();
                sqlx::query(
                    r#"
                    SELECT id, publication_date, public_url FROM gazettes
                    WHERE publication_date BETWEEN ? AND ?
                    ORDER BY publication_date, id
                    "#,
                )
                .bind(first)
                .bind(last)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                // SQLite treats a negative LIMIT as unbounded.
                sqlx::query(
                    r#"
                    SELECT id, publication_date, public_url FROM gazettes
                    ORDER BY publication_date, id
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(page.limit.unwrap_or(-1))
                .bind(page.skip)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_record).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<GazetteRecord>, StoreError> {
        let row = sqlx::query("SELECT id, publication_date, public_url FROM gazettes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }
}
