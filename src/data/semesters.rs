//! Database operations for semesters.

use crate::data::models::Semester;
use crate::error::Result;
use chrono::NaiveDate;
use sqlx::PgPool;

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Option<Semester>> {
    let semester = sqlx::query_as::<_, Semester>("SELECT * FROM semesters WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(semester)
}

pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Semester>> {
    let semester = sqlx::query_as::<_, Semester>("SELECT * FROM semesters WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(semester)
}

/// Get-or-create a semester by its unique display name.
///
/// Concurrent callers are resolved by the unique constraint: the loser of an
/// insert race re-reads the winner's row.
pub async fn ensure(
    pool: &PgPool,
    name: &str,
    short_name: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Semester> {
    let inserted = sqlx::query_as::<_, Semester>(
        "INSERT INTO semesters (name, short_name, start_date, end_date)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (name) DO NOTHING
         RETURNING *",
    )
    .bind(name)
    .bind(short_name)
    .bind(start_date)
    .bind(end_date)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(semester) => Ok(semester),
        None => {
            let existing = find_by_name(pool, name).await?;
            existing.ok_or_else(|| anyhow::anyhow!("Semester {name} vanished after insert race"))
        }
    }
}
