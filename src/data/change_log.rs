//! Scraping run lifecycle and the append-only change log.
//!
//! Run rows are opened and closed from the job side through the pool. The
//! per-entity log methods take a connection instead, so a row's change log
//! records commit (or roll back) together with the row's own transaction.

use crate::data::models::{ChangeLogEntry, ChangeType, RunStatus, ScrapingRun};
use crate::error::Result;
use crate::harvest::stats::ScrapeStats;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::info;

/// Façade over the `scraping_runs` and `change_log` tables.
#[derive(Clone)]
pub struct ChangeTracker {
    pool: PgPool,
}

impl ChangeTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a run in status `running` and returns its id.
    pub async fn start_run(&self, semester_id: i64, source_url: &str) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO scraping_runs (semester_id, started_at, status, source_url)
             VALUES ($1, NOW(), $2, $3)
             RETURNING id",
        )
        .bind(semester_id)
        .bind(RunStatus::Running)
        .bind(source_url)
        .fetch_one(&self.pool)
        .await?;

        info!(run_id = id, semester_id, "Scraping run started");
        Ok(id)
    }

    /// Closes a run as completed, recording its totals.
    pub async fn complete_run(&self, run_id: i64, stats: &ScrapeStats) -> Result<()> {
        sqlx::query(
            "UPDATE scraping_runs
             SET status = $2, ended_at = NOW(),
                 total_entries = $3, new_entries = $4, updated_entries = $5
             WHERE id = $1",
        )
        .bind(run_id)
        .bind(RunStatus::Completed)
        .bind(stats.total_entries)
        .bind(stats.new_entries)
        .bind(stats.updated_entries)
        .execute(&self.pool)
        .await?;

        info!(
            run_id,
            total = stats.total_entries,
            new = stats.new_entries,
            updated = stats.updated_entries,
            "Scraping run completed"
        );
        Ok(())
    }

    /// Closes a run as failed with an error message.
    pub async fn fail_run(&self, run_id: i64, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE scraping_runs
             SET status = $2, ended_at = NOW(), error_message = $3
             WHERE id = $1",
        )
        .bind(run_id)
        .bind(RunStatus::Failed)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Closes a run as cancelled.
    pub async fn cancel_run(&self, run_id: i64, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE scraping_runs
             SET status = $2, ended_at = NOW(), error_message = $3
             WHERE id = $1",
        )
        .bind(run_id)
        .bind(RunStatus::Cancelled)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records an entity creation inside the caller's transaction.
    pub async fn log_created(
        conn: &mut PgConnection,
        run_id: i64,
        entity_type: &str,
        entity_id: i64,
        description: &str,
    ) -> Result<()> {
        Self::log(
            conn,
            run_id,
            entity_type,
            entity_id,
            ChangeType::Created,
            None,
            None,
            None,
            Some(description),
        )
        .await
    }

    /// Records a field-level update inside the caller's transaction.
    pub async fn log_updated(
        conn: &mut PgConnection,
        run_id: i64,
        entity_type: &str,
        entity_id: i64,
        field_name: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<()> {
        Self::log(
            conn,
            run_id,
            entity_type,
            entity_id,
            ChangeType::Updated,
            Some(field_name),
            old_value,
            new_value,
            None,
        )
        .await
    }

    /// Records an entity deactivation inside the caller's transaction.
    pub async fn log_deleted(
        conn: &mut PgConnection,
        run_id: i64,
        entity_type: &str,
        entity_id: i64,
        description: &str,
    ) -> Result<()> {
        Self::log(
            conn,
            run_id,
            entity_type,
            entity_id,
            ChangeType::Deleted,
            None,
            None,
            None,
            Some(description),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn log(
        conn: &mut PgConnection,
        run_id: i64,
        entity_type: &str,
        entity_id: i64,
        change_type: ChangeType,
        field_name: Option<&str>,
        old_value: Option<&str>,
        new_value: Option<&str>,
        description: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO change_log
               (scraping_run_id, entity_type, entity_id, change_type,
                field_name, old_value, new_value, description)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(run_id)
        .bind(entity_type)
        .bind(entity_id)
        .bind(change_type)
        .bind(field_name)
        .bind(old_value)
        .bind(new_value)
        .bind(description)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Most recent runs of a semester, newest first.
    pub async fn run_history(&self, semester_id: i64, limit: i64) -> Result<Vec<ScrapingRun>> {
        let runs = sqlx::query_as::<_, ScrapingRun>(
            "SELECT * FROM scraping_runs
             WHERE semester_id = $1
             ORDER BY started_at DESC, id DESC
             LIMIT $2",
        )
        .bind(semester_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    /// All change log entries recorded since the given instant, oldest first.
    pub async fn changes_since(&self, since: DateTime<Utc>) -> Result<Vec<ChangeLogEntry>> {
        let entries = sqlx::query_as::<_, ChangeLogEntry>(
            "SELECT * FROM change_log WHERE created_at >= $1 ORDER BY created_at, id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Change counts per entity type for one run.
    pub async fn change_counts_by_type(&self, run_id: i64) -> Result<Vec<(String, i64)>> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT entity_type, COUNT(*) FROM change_log
             WHERE scraping_run_id = $1
             GROUP BY entity_type
             ORDER BY entity_type",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }
}
