//! The per-row upsert pipeline.
//!
//! Every schedule row is persisted in its own short transaction: resolve or
//! create the course type, lecturer and room, find or create the course,
//! link the study program, then insert or update the schedule entry. Change
//! log records are written on the same connection, so they commit atomically
//! with the row.
//!
//! Two workers may race on creating the same course; the partial unique
//! index on `(semester_id, lower(name))` picks the winner. Postgres aborts
//! the losing transaction, so the loser rolls back and replays the row,
//! joining the winner's course through the lookup. That replay is a normal
//! branch, not an error.

use crate::catalog::ScheduleRow;
use crate::catalog::StudyProgramOption;
use crate::catalog::lecturer::{LecturerIdentity, parse_lecturer};
use crate::data::change_log::ChangeTracker;
use crate::data::models::{Course, Lecturer};
use crate::data::{courses, reference};
use crate::error::Result;
use crate::harvest::stats::RowOutcome;
use crate::progress::{LogLevel, ProgressTracker};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, warn};

/// Upper bound for the sanitizer's informational log line.
const SANITIZER_LOG_LIMIT: usize = 140;

/// Immutable context shared by all rows of one fach-semester table.
pub struct RowContext<'a> {
    pub run_id: i64,
    pub semester_id: i64,
    pub program: &'a StudyProgramOption,
    pub fach_semester: Option<&'a str>,
}

/// Persists one schedule row in its own transaction.
///
/// A lost course-creation race rolls the transaction back and replays the
/// row once; any other database error propagates and fails the enclosing
/// program task.
pub async fn persist_row(
    pool: &PgPool,
    tracker: &ProgressTracker,
    ctx: &RowContext<'_>,
    row: &ScheduleRow,
) -> Result<RowOutcome> {
    for attempt in 0..2 {
        let mut tx = pool.begin().await?;
        match persist_row_once(&mut tx, tracker, ctx, row).await {
            Ok(outcome) => {
                tx.commit().await?;
                return Ok(outcome);
            }
            Err(err)
                if attempt == 0
                    && err
                        .downcast_ref::<sqlx::Error>()
                        .is_some_and(courses::is_course_name_conflict) =>
            {
                // Lost the creation race; the transaction is aborted, so
                // replay the row and join the winner's course.
                tx.rollback().await?;
                debug!(
                    course = row.title,
                    "Course created concurrently, replaying row"
                );
            }
            Err(err) => return Err(err),
        }
    }
    unreachable!("row replay after a lost course race cannot race again on the same name");
}

async fn persist_row_once(
    conn: &mut PgConnection,
    tracker: &ProgressTracker,
    ctx: &RowContext<'_>,
    row: &ScheduleRow,
) -> Result<RowOutcome> {
    // 1. Course type
    let type_code =
        reference::normalize_course_type(&row.course_type).unwrap_or_else(|| "?".to_string());
    let course_type = reference::get_or_create_course_type(conn, &type_code, &row.course_type)
        .await?;
    if course_type.created {
        ChangeTracker::log_created(
            conn,
            ctx.run_id,
            "CourseType",
            course_type.entity.id,
            &format!("Veranstaltungsart {} angelegt", course_type.entity.code),
        )
        .await?;
    }

    // 2. Lecturer
    let identity = parse_lecturer(&row.lecturer);
    let lecturer = resolve_lecturer(conn, ctx.run_id, &identity).await?;
    if identity.modified || identity.truncated {
        let line = format!("Dozentenangabe bereinigt: {} -> {}", row.lecturer, identity.name);
        tracker.log(LogLevel::Info, &cap_chars(&line, SANITIZER_LOG_LIMIT));
    }

    // 3. Room
    let room = reference::get_or_create_room(conn, &row.room).await?;
    if room.created {
        ChangeTracker::log_created(
            conn,
            ctx.run_id,
            "Room",
            room.entity.id,
            &format!("Raum {} angelegt", room.entity.code),
        )
        .await?;
    }

    // 4. Course
    let course = resolve_course(
        conn,
        ctx,
        &row.title,
        lecturer.id,
        course_type.entity.id,
    )
    .await?;

    // 5. Study program link
    let program = reference::find_study_program(
        conn,
        &ctx.program.code,
        &ctx.program.display_name,
    )
    .await?;
    match program {
        Some(program) => {
            let fach_number = ctx.fach_semester.and_then(fach_semester_number);
            courses::link_study_program(conn, course.id, program.id, fach_number).await?;
        }
        None => warn!(
            code = ctx.program.code,
            "Study program not found, row stays unlinked"
        ),
    }

    // 6. Schedule entry
    let week_pattern = non_blank(&row.week_pattern);
    let notes = build_notes(row, ctx.fach_semester);

    let existing = courses::find_schedule_entry(
        conn,
        course.id,
        row.day,
        row.start_time,
        row.end_time,
        &row.room,
    )
    .await?;

    match existing {
        Some(entry) => {
            let mut changed = false;

            if entry.week_pattern.as_deref() != week_pattern {
                ChangeTracker::log_updated(
                    conn,
                    ctx.run_id,
                    "ScheduleEntry",
                    entry.id,
                    "week_pattern",
                    entry.week_pattern.as_deref(),
                    week_pattern,
                )
                .await?;
                changed = true;
            }
            if entry.notes.as_deref() != notes.as_deref() {
                ChangeTracker::log_updated(
                    conn,
                    ctx.run_id,
                    "ScheduleEntry",
                    entry.id,
                    "notes",
                    entry.notes.as_deref(),
                    notes.as_deref(),
                )
                .await?;
                changed = true;
            }

            if changed {
                courses::update_schedule_entry(conn, entry.id, week_pattern, notes.as_deref())
                    .await?;
                Ok(RowOutcome::Updated)
            } else {
                Ok(RowOutcome::Unchanged)
            }
        }
        None => {
            let entry = courses::insert_schedule_entry(
                conn,
                course.id,
                room.entity.id,
                row.day,
                row.start_time,
                row.end_time,
                week_pattern,
                notes.as_deref(),
            )
            .await?;
            ChangeTracker::log_created(
                conn,
                ctx.run_id,
                "ScheduleEntry",
                entry.id,
                &format!("Termin für {} angelegt", row.title),
            )
            .await?;
            Ok(RowOutcome::Created)
        }
    }
}

/// Looks up the lecturer by email (preferred) or name, filling blank stored
/// fields; creates the lecturer if unknown.
async fn resolve_lecturer(
    conn: &mut PgConnection,
    run_id: i64,
    identity: &LecturerIdentity,
) -> Result<Lecturer> {
    let existing = match &identity.email {
        Some(email) => reference::find_lecturer_by_email(conn, email).await?,
        None => reference::find_lecturer_by_name(conn, &identity.name).await?,
    };

    match existing {
        Some(lecturer) => {
            reference::fill_lecturer_fields(
                conn,
                &lecturer,
                identity.title.as_deref(),
                identity.email.as_deref(),
            )
            .await
        }
        None => {
            let lecturer = reference::create_lecturer(
                conn,
                &identity.name,
                identity.title.as_deref(),
                identity.email.as_deref(),
            )
            .await?;
            ChangeTracker::log_created(
                conn,
                run_id,
                "Lecturer",
                lecturer.id,
                &format!("Dozent {} angelegt", lecturer.name),
            )
            .await?;
            Ok(lecturer)
        }
    }
}

/// Finds the semester's active course by case-insensitive name or creates
/// it. A found course gets its lecturer/type repointed when they drifted.
async fn resolve_course(
    conn: &mut PgConnection,
    ctx: &RowContext<'_>,
    title: &str,
    lecturer_id: i64,
    course_type_id: i64,
) -> Result<Course> {
    if let Some(course) = courses::find_active_by_name(conn, ctx.semester_id, title).await? {
        if course.lecturer_id != lecturer_id || course.course_type_id != course_type_id {
            courses::update_references(conn, course.id, lecturer_id, course_type_id).await?;
            return Ok(Course {
                lecturer_id,
                course_type_id,
                ..course
            });
        }
        return Ok(course);
    }

    let course = courses::insert(conn, ctx.semester_id, title, lecturer_id, course_type_id)
        .await
        .map_err(anyhow::Error::from)?;
    ChangeTracker::log_created(
        conn,
        ctx.run_id,
        "Course",
        course.id,
        &format!("Veranstaltung {} angelegt", course.name),
    )
    .await?;
    Ok(course)
}

/// Joins the non-blank context parts into the entry notes:
/// `category | group | fach-semester | Info <id>`.
fn build_notes(row: &ScheduleRow, fach_semester: Option<&str>) -> Option<String> {
    let info = (!row.info_id.is_empty()).then(|| format!("Info {}", row.info_id));
    let parts: Vec<&str> = [
        row.category.as_deref(),
        row.group.as_deref(),
        fach_semester,
        info.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.trim().is_empty())
    .collect();

    (!parts.is_empty()).then(|| parts.join(" | "))
}

/// Integer prefix of a `"N.Semester"` label.
fn fach_semester_number(label: &str) -> Option<i32> {
    label.split('.').next()?.trim().parse().ok()
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn cap_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
