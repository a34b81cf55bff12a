//! Domain models backing the relational schema.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Day of the week a schedule entry occurs on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "day_of_week", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    /// Resolves a German day label by abbreviation prefix
    /// (`Mo`, `Di`, `Mittwoch`, ...). Unknown labels yield `None`.
    pub fn from_german(label: &str) -> Option<Self> {
        let lower = label.trim().to_lowercase();
        let day = match () {
            _ if lower.starts_with("mo") => DayOfWeek::Monday,
            _ if lower.starts_with("di") => DayOfWeek::Tuesday,
            _ if lower.starts_with("mi") => DayOfWeek::Wednesday,
            _ if lower.starts_with("do") => DayOfWeek::Thursday,
            _ if lower.starts_with("fr") => DayOfWeek::Friday,
            _ if lower.starts_with("sa") => DayOfWeek::Saturday,
            _ if lower.starts_with("so") => DayOfWeek::Sunday,
            _ => return None,
        };
        Some(day)
    }
}

/// Kind of degree a study program leads to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "degree_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DegreeKind {
    Bachelor,
    Master,
    Diploma,
    Doctorate,
}

impl DegreeKind {
    /// Infers the degree kind from a program display name such as
    /// "Angewandte Informatik (Bachelor)". Defaults to diploma, the oldest
    /// program form in the catalog.
    pub fn from_display_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("bachelor") {
            DegreeKind::Bachelor
        } else if lower.contains("master") {
            DegreeKind::Master
        } else if lower.contains("promotion") || lower.contains("doktor") {
            DegreeKind::Doctorate
        } else {
            DegreeKind::Diploma
        }
    }
}

/// Lifecycle status of a scraping run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "run_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Kind of mutation a change log entry records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "change_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Semester {
    pub id: i64,
    pub name: String,
    pub short_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StudyProgram {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub degree: DegreeKind,
    pub faculty: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CourseType {
    pub id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Lecturer {
    pub id: i64,
    pub name: String,
    pub title: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Room {
    pub id: i64,
    pub code: String,
    pub building: String,
    pub room_number: String,
    pub capacity: Option<i32>,
    pub room_type: Option<String>,
    pub equipment: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub course_number: Option<String>,
    pub semester_id: i64,
    pub lecturer_id: i64,
    pub course_type_id: i64,
    pub sws: Option<i32>,
    pub ects: Option<f64>,
    pub active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleEntry {
    pub id: i64,
    pub course_id: i64,
    pub room_id: i64,
    pub day_of_week: DayOfWeek,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub week_pattern: Option<String>,
    pub notes: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScrapingRun {
    pub id: i64,
    pub semester_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub total_entries: Option<i32>,
    pub new_entries: Option<i32>,
    pub updated_entries: Option<i32>,
    pub error_message: Option<String>,
    pub source_url: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub scraping_run_id: i64,
    pub entity_type: String,
    pub entity_id: i64,
    pub change_type: ChangeType,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
