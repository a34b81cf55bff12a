//! Database operations for courses, study-program links and schedule
//! entries.
//!
//! Courses carry the case-insensitive uniqueness invariant: at most one
//! active course per `(semester, lower(name))`, enforced by the partial
//! unique index `ux_courses_semester_lower_name`. Concurrent creators race
//! on that index; the losing writer re-runs the lookup (see
//! [`crate::data::upsert`]).

use crate::data::models::{Course, DayOfWeek, ScheduleEntry};
use crate::error::Result;
use chrono::NaiveTime;
use sqlx::PgConnection;

/// Name of the unique index arbitrating concurrent course creation.
pub const COURSE_NAME_INDEX: &str = "ux_courses_semester_lower_name";

/// Whether a database error is the unique violation raised when two writers
/// create the same course concurrently.
pub fn is_course_name_conflict(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.constraint() == Some(COURSE_NAME_INDEX)
    )
}

/// Finds the active course with the given name (case-insensitive) in a
/// semester.
pub async fn find_active_by_name(
    conn: &mut PgConnection,
    semester_id: i64,
    name: &str,
) -> Result<Option<Course>> {
    let course = sqlx::query_as::<_, Course>(
        "SELECT * FROM courses
         WHERE semester_id = $1 AND active AND LOWER(name) = LOWER($2)",
    )
    .bind(semester_id)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(course)
}

/// Inserts a course. The raw `sqlx::Error` is surfaced so the caller can
/// branch on [`is_course_name_conflict`].
pub async fn insert(
    conn: &mut PgConnection,
    semester_id: i64,
    name: &str,
    lecturer_id: i64,
    course_type_id: i64,
) -> Result<Course, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        "INSERT INTO courses (name, semester_id, lecturer_id, course_type_id)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(name)
    .bind(semester_id)
    .bind(lecturer_id)
    .bind(course_type_id)
    .fetch_one(&mut *conn)
    .await
}

/// Repoints a course at a different lecturer and/or course type.
pub async fn update_references(
    conn: &mut PgConnection,
    course_id: i64,
    lecturer_id: i64,
    course_type_id: i64,
) -> Result<()> {
    sqlx::query("UPDATE courses SET lecturer_id = $2, course_type_id = $3 WHERE id = $1")
        .bind(course_id)
        .bind(lecturer_id)
        .bind(course_type_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Links a course to a study program. Returns whether a new link row was
/// created; an existing link (any fach-semester) is left untouched.
pub async fn link_study_program(
    conn: &mut PgConnection,
    course_id: i64,
    study_program_id: i64,
    fach_semester: Option<i32>,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO course_study_programs (course_id, study_program_id, fach_semester)
         VALUES ($1, $2, $3)
         ON CONFLICT (course_id, study_program_id) DO NOTHING",
    )
    .bind(course_id)
    .bind(study_program_id)
    .bind(fach_semester)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Finds an active schedule entry by its upsert identity:
/// `(course, day, start, end, room code case-insensitive)`.
pub async fn find_schedule_entry(
    conn: &mut PgConnection,
    course_id: i64,
    day: DayOfWeek,
    start_time: NaiveTime,
    end_time: NaiveTime,
    room_code: &str,
) -> Result<Option<ScheduleEntry>> {
    let entry = sqlx::query_as::<_, ScheduleEntry>(
        "SELECT se.* FROM schedule_entries se
         JOIN rooms r ON r.id = se.room_id
         WHERE se.course_id = $1 AND se.active
           AND se.day_of_week = $2 AND se.start_time = $3 AND se.end_time = $4
           AND LOWER(r.code) = LOWER($5)",
    )
    .bind(course_id)
    .bind(day)
    .bind(start_time)
    .bind(end_time)
    .bind(room_code)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(entry)
}

pub async fn insert_schedule_entry(
    conn: &mut PgConnection,
    course_id: i64,
    room_id: i64,
    day: DayOfWeek,
    start_time: NaiveTime,
    end_time: NaiveTime,
    week_pattern: Option<&str>,
    notes: Option<&str>,
) -> Result<ScheduleEntry> {
    let entry = sqlx::query_as::<_, ScheduleEntry>(
        "INSERT INTO schedule_entries
           (course_id, room_id, day_of_week, start_time, end_time, week_pattern, notes)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(course_id)
    .bind(room_id)
    .bind(day)
    .bind(start_time)
    .bind(end_time)
    .bind(week_pattern)
    .bind(notes)
    .fetch_one(&mut *conn)
    .await?;
    Ok(entry)
}

/// Overwrites the mutable fields of an existing schedule entry.
pub async fn update_schedule_entry(
    conn: &mut PgConnection,
    entry_id: i64,
    week_pattern: Option<&str>,
    notes: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE schedule_entries SET week_pattern = $2, notes = $3 WHERE id = $1")
        .bind(entry_id)
        .bind(week_pattern)
        .bind(notes)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
