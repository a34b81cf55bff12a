use chrono::{NaiveDate, NaiveTime};
use sqlx::PgPool;
use vvz_harvester::catalog::{ScheduleRow, StudyProgramOption};
use vvz_harvester::data::models::{DayOfWeek, Semester};
use vvz_harvester::data::{ChangeTracker, semesters};

/// Seed a summer semester and open a scraping run for it, returning both ids.
pub async fn seed_semester_and_run(pool: &PgPool) -> (Semester, i64) {
    let semester = semesters::ensure(
        pool,
        "Sommersemester 2024",
        "SS24",
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 9, 30).unwrap(),
    )
    .await
    .expect("seed semester failed");

    let tracker = ChangeTracker::new(pool.clone());
    let run_id = tracker
        .start_run(semester.id, "https://evlvz.hrz.tu-freiberg.de/~vover/")
        .await
        .expect("start run failed");

    (semester, run_id)
}

/// Build the study program option used across the pipeline tests.
pub fn make_program() -> StudyProgramOption {
    StudyProgramOption {
        code: "BAI".to_string(),
        display_name: "Angewandte Informatik (Bachelor)".to_string(),
        faculty: Some("Fakultät 1".to_string()),
        href: "stgvrz.html?stdg=BAI&stdg1=Angewandte%20Informatik%20(Bachelor)".to_string(),
    }
}

/// Insert the study program row the pipeline links against.
pub async fn seed_program(pool: &PgPool, program: &StudyProgramOption) {
    let mut conn = pool.acquire().await.expect("acquire failed");
    vvz_harvester::data::reference::ensure_study_program(
        &mut conn,
        &program.code,
        &program.display_name,
        program.faculty.as_deref(),
    )
    .await
    .expect("seed program failed");
}

/// Build a test `ScheduleRow` with sensible defaults; only the fields a
/// test cares about need overriding.
pub fn make_row(title: &str, lecturer: &str) -> ScheduleRow {
    ScheduleRow {
        course_type: "V".to_string(),
        title: title.to_string(),
        lecturer: lecturer.to_string(),
        day: DayOfWeek::Tuesday,
        start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
        room: "MIB/1001".to_string(),
        week_pattern: "wöchentlich".to_string(),
        info_id: "42".to_string(),
        category: None,
        group: None,
    }
}

/// Count rows of a table.
pub async fn count(pool: &PgPool, table: &str) -> i64 {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count query failed");
    count
}
