//! Get-or-create operations for shared reference entities: course types,
//! lecturers, rooms and study programs.
//!
//! These run inside the per-row transaction of the upsert pipeline, so every
//! function takes a connection rather than the pool. Reference entities are
//! never deleted, only deactivated.

use crate::data::models::{CourseType, DegreeKind, Lecturer, Room, StudyProgram};
use crate::error::Result;
use sqlx::PgConnection;

/// Course type codes that survive normalization as-is.
const KNOWN_TYPE_CODES: &[&str] = &["V", "Ü", "S", "P", "B"];

/// Normalizes a raw course type cell to its one-character code.
///
/// Known codes pass through; anything else falls back to the first character
/// of the raw value.
pub fn normalize_course_type(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let upper = trimmed.to_uppercase();
    if KNOWN_TYPE_CODES.contains(&upper.as_str()) {
        return Some(upper);
    }
    trimmed.chars().next().map(|c| c.to_string())
}

/// Outcome of a get-or-create, telling the caller whether a change log
/// record is due.
pub struct Resolved<T> {
    pub entity: T,
    pub created: bool,
}

pub async fn get_or_create_course_type(
    conn: &mut PgConnection,
    code: &str,
    name: &str,
) -> Result<Resolved<CourseType>> {
    let existing = sqlx::query_as::<_, CourseType>("SELECT * FROM course_types WHERE code = $1")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(entity) = existing {
        return Ok(Resolved {
            entity,
            created: false,
        });
    }

    let entity = sqlx::query_as::<_, CourseType>(
        "INSERT INTO course_types (code, name) VALUES ($1, $2) RETURNING *",
    )
    .bind(code)
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;
    Ok(Resolved {
        entity,
        created: true,
    })
}

pub async fn find_lecturer_by_email(
    conn: &mut PgConnection,
    email: &str,
) -> Result<Option<Lecturer>> {
    let lecturer =
        sqlx::query_as::<_, Lecturer>("SELECT * FROM lecturers WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(lecturer)
}

pub async fn find_lecturer_by_name(
    conn: &mut PgConnection,
    name: &str,
) -> Result<Option<Lecturer>> {
    let lecturer = sqlx::query_as::<_, Lecturer>(
        "SELECT * FROM lecturers WHERE name ILIKE '%' || $1 || '%' ORDER BY id LIMIT 1",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(lecturer)
}

pub async fn create_lecturer(
    conn: &mut PgConnection,
    name: &str,
    title: Option<&str>,
    email: Option<&str>,
) -> Result<Lecturer> {
    let lecturer = sqlx::query_as::<_, Lecturer>(
        "INSERT INTO lecturers (name, title, email) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(name)
    .bind(title)
    .bind(email)
    .fetch_one(&mut *conn)
    .await?;
    Ok(lecturer)
}

/// Fills title/email on a stored lecturer only where they are still blank.
/// The stored name is never overwritten.
pub async fn fill_lecturer_fields(
    conn: &mut PgConnection,
    lecturer: &Lecturer,
    title: Option<&str>,
    email: Option<&str>,
) -> Result<Lecturer> {
    let new_title = match (&lecturer.title, title) {
        (None, Some(title)) => Some(title),
        _ => None,
    };
    let new_email = match (&lecturer.email, email) {
        (None, Some(email)) => Some(email),
        _ => None,
    };

    if new_title.is_none() && new_email.is_none() {
        return Ok(lecturer.clone());
    }

    let updated = sqlx::query_as::<_, Lecturer>(
        "UPDATE lecturers
         SET title = COALESCE(title, $2), email = COALESCE(email, $3)
         WHERE id = $1
         RETURNING *",
    )
    .bind(lecturer.id)
    .bind(new_title)
    .bind(new_email)
    .fetch_one(&mut *conn)
    .await?;
    Ok(updated)
}

/// Splits a room code on the first of `/`, `-`, space, `_` into building and
/// room number. Codes without a delimiter use the full code for both parts.
pub fn parse_room_code(code: &str) -> (String, String) {
    match code.split_once(['/', '-', ' ', '_']) {
        Some((building, number)) if !building.is_empty() && !number.is_empty() => {
            (building.to_string(), number.to_string())
        }
        _ => (code.to_string(), code.to_string()),
    }
}

pub async fn get_or_create_room(conn: &mut PgConnection, code: &str) -> Result<Resolved<Room>> {
    let existing = sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE code = $1")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(entity) = existing {
        return Ok(Resolved {
            entity,
            created: false,
        });
    }

    let (building, room_number) = parse_room_code(code);
    let entity = sqlx::query_as::<_, Room>(
        "INSERT INTO rooms (code, building, room_number) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(code)
    .bind(building)
    .bind(room_number)
    .fetch_one(&mut *conn)
    .await?;
    Ok(Resolved {
        entity,
        created: true,
    })
}

/// Marks a room inactive. Rooms are shared reference data and never deleted.
pub async fn deactivate_room(conn: &mut PgConnection, room_id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE rooms SET active = FALSE WHERE id = $1 AND active")
        .bind(room_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Get-or-create a study program discovered on `verz.html`. The degree kind
/// is inferred from the display name; the faculty comes from the preceding
/// section header.
pub async fn ensure_study_program(
    conn: &mut PgConnection,
    code: &str,
    name: &str,
    faculty: Option<&str>,
) -> Result<StudyProgram> {
    let existing = sqlx::query_as::<_, StudyProgram>("SELECT * FROM study_programs WHERE code = $1")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(program) = existing {
        return Ok(program);
    }

    let program = sqlx::query_as::<_, StudyProgram>(
        "INSERT INTO study_programs (code, name, degree, faculty)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (code) DO UPDATE SET code = EXCLUDED.code
         RETURNING *",
    )
    .bind(code)
    .bind(name)
    .bind(DegreeKind::from_display_name(name))
    .bind(faculty)
    .fetch_one(&mut *conn)
    .await?;
    Ok(program)
}

/// Looks up a study program by code, falling back to a name-contains match.
pub async fn find_study_program(
    conn: &mut PgConnection,
    code: &str,
    name: &str,
) -> Result<Option<StudyProgram>> {
    let by_code = sqlx::query_as::<_, StudyProgram>("SELECT * FROM study_programs WHERE code = $1")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
    if by_code.is_some() {
        return Ok(by_code);
    }

    let by_name = sqlx::query_as::<_, StudyProgram>(
        "SELECT * FROM study_programs WHERE name ILIKE '%' || $1 || '%' ORDER BY id LIMIT 1",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(by_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_course_type_known_codes() {
        assert_eq!(normalize_course_type("V").as_deref(), Some("V"));
        assert_eq!(normalize_course_type("ü").as_deref(), Some("Ü"));
        assert_eq!(normalize_course_type(" s ").as_deref(), Some("S"));
    }

    #[test]
    fn test_normalize_course_type_fallback_first_char() {
        assert_eq!(normalize_course_type("Vorlesung").as_deref(), Some("V"));
        assert_eq!(normalize_course_type("Exkursion").as_deref(), Some("E"));
        assert_eq!(normalize_course_type("").as_deref(), None);
    }

    #[test]
    fn test_parse_room_code_delimiters() {
        assert_eq!(
            parse_room_code("MIB/1001"),
            ("MIB".to_string(), "1001".to_string())
        );
        assert_eq!(
            parse_room_code("HSB-2003"),
            ("HSB".to_string(), "2003".to_string())
        );
        assert_eq!(
            parse_room_code("AUD 42"),
            ("AUD".to_string(), "42".to_string())
        );
        assert_eq!(
            parse_room_code("LAB_7"),
            ("LAB".to_string(), "7".to_string())
        );
    }

    #[test]
    fn test_parse_room_code_fallback() {
        assert_eq!(
            parse_room_code("AUDIMAX"),
            ("AUDIMAX".to_string(), "AUDIMAX".to_string())
        );
        assert_eq!(parse_room_code("X/"), ("X/".to_string(), "X/".to_string()));
    }
}
