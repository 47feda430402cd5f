//! SQLite-backed report storage.

use std::str::FromStr as _;

use anyhow::{Context as _, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use tracing::{debug, info};

use crate::risk::RiskLevel;

/// Workflow status every report starts in.
pub const INITIAL_STATUS: &str = "New";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        domain_name TEXT NOT NULL,
        abuse_type TEXT NOT NULL,
        report_source TEXT NOT NULL,
        confidence_score INTEGER NOT NULL,
        status TEXT NOT NULL,
        risk_score INTEGER NOT NULL,
        reviewer_id TEXT,
        last_updated TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_reports_domain ON reports(domain_name);
";

/// A stored abuse report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Report {
    pub id: i64,
    pub domain_name: String,
    pub abuse_type: String,
    pub report_source: String,
    pub confidence_score: i64,
    pub status: String,
    pub risk_score: i64,
    pub reviewer_id: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// A validated report that has not been stored yet.
///
/// Text fields are already trimmed and `risk` is derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReport {
    pub domain_name: String,
    pub abuse_type: String,
    pub report_source: String,
    pub confidence_score: i64,
    pub risk: RiskLevel,
}

/// Handle to the report database. Cheap to clone; every operation checks a
/// connection out of the pool for its own duration.
#[derive(Clone, Debug)]
pub struct ReportStore {
    pool: SqlitePool,
}

/// A batch of inserts that becomes durable only on [`ReportTx::commit`].
/// Dropping it rolls every insert back.
pub struct ReportTx {
    tx: Transaction<'static, Sqlite>,
}

/// Timestamps are stored as fixed-width RFC 3339 text so that ordering by the
/// column is chronological.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

async fn insert_with<'e, E>(executor: E, report: &NewReport) -> sqlx::Result<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO reports
            (domain_name, report_source, abuse_type, confidence_score,
             status, risk_score, reviewer_id, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
            RETURNING id
        "#,
    )
    .bind(&report.domain_name)
    .bind(&report.report_source)
    .bind(&report.abuse_type)
    .bind(report.confidence_score)
    .bind(INITIAL_STATUS)
    .bind(report.risk.score())
    .bind(timestamp(Utc::now()))
    .fetch_one(executor)
    .await
}

impl ReportStore {
    /// Connect to the database at `url`, creating it if missing, and make sure
    /// the `reports` table exists.
    pub async fn open(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .context("failed to parse database options")?
            .create_if_missing(true);

        if let Some(dir) = opts.get_filename().parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .context("failed to create database directory")?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .context("failed to connect to SQLite database")?;

        let store = Self { pool };
        store.bootstrap().await?;
        info!("report store ready at {url}");
        Ok(store)
    }

    /// A private in-memory database. Pinned to a single connection, as every
    /// connection to `:memory:` sees its own database.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory database")?;

        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub(crate) const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn bootstrap(&self) -> Result<()> {
        _ = sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .context("failed to create tables")?;
        Ok(())
    }

    /// Insert and commit a single report, returning its id.
    #[tracing::instrument(skip_all, fields(domain = %report.domain_name))]
    pub async fn insert(&self, report: &NewReport) -> Result<i64> {
        let id = insert_with(&self.pool, report)
            .await
            .context("failed to insert report")?;
        debug!(id, "inserted report");
        Ok(id)
    }

    /// Start a transaction for a batch of inserts.
    pub async fn begin(&self) -> Result<ReportTx> {
        let tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;
        Ok(ReportTx { tx })
    }

    pub async fn list_all(&self) -> Result<Vec<Report>> {
        sqlx::query_as::<_, Report>("SELECT * FROM reports ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list reports")
    }

    /// Reports for one domain, most recently updated first. The domain is
    /// matched exactly after trimming.
    #[tracing::instrument(skip(self))]
    pub async fn list_by_domain(&self, domain_name: &str) -> Result<Vec<Report>> {
        sqlx::query_as::<_, Report>(
            "SELECT * FROM reports WHERE domain_name = ? ORDER BY last_updated DESC, id DESC",
        )
        .bind(domain_name.trim())
        .fetch_all(&self.pool)
        .await
        .context("failed to list reports for domain")
    }

    pub async fn exists(&self, id: i64) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to look up report")?;
        Ok(found.is_some())
    }

    /// Set the workflow status and reviewer of a report and refresh its
    /// `last_updated`. Returns `false` if no report has this id.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, id: i64, status: &str, reviewer_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE reports SET status = ?, reviewer_id = ?, last_updated = ? WHERE id = ?",
        )
        .bind(status)
        .bind(reviewer_id)
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed to update report")?;

        Ok(result.rows_affected() != 0)
    }
}

impl ReportTx {
    /// Insert a report inside the transaction. The id is final, but the row is
    /// not visible to other connections until commit.
    pub async fn insert(&mut self, report: &NewReport) -> Result<i64> {
        insert_with(&mut *self.tx, report)
            .await
            .context("failed to insert report")
    }

    pub async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("failed to commit reports")
    }
}
