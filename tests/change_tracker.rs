mod helpers;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use vvz_harvester::data::ChangeTracker;
use vvz_harvester::data::models::{ChangeType, RunStatus, ScrapingRun};
use vvz_harvester::harvest::ScrapeStats;

async fn fetch_run(pool: &PgPool, run_id: i64) -> ScrapingRun {
    sqlx::query_as::<_, ScrapingRun>("SELECT * FROM scraping_runs WHERE id = $1")
        .bind(run_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test]
async fn test_completed_run_has_end_time_and_totals(pool: PgPool) {
    let (_, run_id) = helpers::seed_semester_and_run(&pool).await;
    let change = ChangeTracker::new(pool.clone());

    let running = fetch_run(&pool, run_id).await;
    assert_eq!(running.status, RunStatus::Running);
    assert!(running.ended_at.is_none());

    let stats = ScrapeStats {
        total_entries: 12,
        new_entries: 3,
        updated_entries: 2,
        skipped_rows: 1,
    };
    change.complete_run(run_id, &stats).await.unwrap();

    let run = fetch_run(&pool, run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_entries, Some(12));
    assert_eq!(run.new_entries, Some(3));
    assert_eq!(run.updated_entries, Some(2));
    let ended_at = run.ended_at.expect("completed run must carry an end time");
    assert!(ended_at >= run.started_at);
}

#[sqlx::test]
async fn test_failed_run_has_error_message(pool: PgPool) {
    let (_, run_id) = helpers::seed_semester_and_run(&pool).await;
    let change = ChangeTracker::new(pool.clone());

    change.fail_run(run_id, "verz.html returned 502").await.unwrap();

    let run = fetch_run(&pool, run_id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.ended_at.is_some());
    assert_eq!(run.error_message.as_deref(), Some("verz.html returned 502"));
}

#[sqlx::test]
async fn test_cancelled_run(pool: PgPool) {
    let (_, run_id) = helpers::seed_semester_and_run(&pool).await;
    let change = ChangeTracker::new(pool.clone());

    change.cancel_run(run_id, "Scraping abgebrochen").await.unwrap();

    let run = fetch_run(&pool, run_id).await;
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.ended_at.is_some());
}

#[sqlx::test]
async fn test_change_log_queries(pool: PgPool) {
    let (_, run_id) = helpers::seed_semester_and_run(&pool).await;
    let change = ChangeTracker::new(pool.clone());
    let before: DateTime<Utc> = Utc::now() - Duration::seconds(1);

    {
        let mut conn = pool.acquire().await.unwrap();
        ChangeTracker::log_created(&mut conn, run_id, "Course", 1, "Veranstaltung angelegt")
            .await
            .unwrap();
        ChangeTracker::log_created(&mut conn, run_id, "Lecturer", 2, "Dozent angelegt")
            .await
            .unwrap();
        ChangeTracker::log_updated(
            &mut conn,
            run_id,
            "ScheduleEntry",
            3,
            "week_pattern",
            Some("wöchentlich"),
            Some("14-täglich"),
        )
        .await
        .unwrap();
        ChangeTracker::log_deleted(&mut conn, run_id, "Room", 4, "Raum deaktiviert")
            .await
            .unwrap();
    }

    let since = change.changes_since(before).await.unwrap();
    assert_eq!(since.len(), 4);
    assert_eq!(since[0].entity_type, "Course");
    assert_eq!(since[0].change_type, ChangeType::Created);
    assert_eq!(since[2].field_name.as_deref(), Some("week_pattern"));
    assert_eq!(since[2].old_value.as_deref(), Some("wöchentlich"));
    assert_eq!(since[3].change_type, ChangeType::Deleted);

    let counts = change.change_counts_by_type(run_id).await.unwrap();
    assert_eq!(
        counts,
        vec![
            ("Course".to_string(), 1),
            ("Lecturer".to_string(), 1),
            ("Room".to_string(), 1),
            ("ScheduleEntry".to_string(), 1),
        ]
    );

    // Nothing after "now"
    let later = change.changes_since(Utc::now() + Duration::seconds(5)).await.unwrap();
    assert!(later.is_empty());
}

#[sqlx::test]
async fn test_run_history_is_newest_first_and_limited(pool: PgPool) {
    let (semester, first_run) = helpers::seed_semester_and_run(&pool).await;
    let change = ChangeTracker::new(pool.clone());

    change.complete_run(first_run, &ScrapeStats::default()).await.unwrap();
    let second_run = change
        .start_run(semester.id, "https://evlvz.hrz.tu-freiberg.de/~vover/")
        .await
        .unwrap();
    let third_run = change
        .start_run(semester.id, "https://evlvz.hrz.tu-freiberg.de/~vover/")
        .await
        .unwrap();

    let history = change.run_history(semester.id, 2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, third_run);
    assert_eq!(history[1].id, second_run);
}

#[sqlx::test]
async fn test_room_deactivation_is_logged(pool: PgPool) {
    let (_, run_id) = helpers::seed_semester_and_run(&pool).await;

    let mut conn = pool.acquire().await.unwrap();
    let room = vvz_harvester::data::reference::get_or_create_room(&mut conn, "MIB/1001")
        .await
        .unwrap();

    let deactivated =
        vvz_harvester::data::reference::deactivate_room(&mut conn, room.entity.id)
            .await
            .unwrap();
    assert!(deactivated);
    ChangeTracker::log_deleted(&mut conn, run_id, "Room", room.entity.id, "Raum deaktiviert")
        .await
        .unwrap();

    // Idempotent: already inactive
    let again = vvz_harvester::data::reference::deactivate_room(&mut conn, room.entity.id)
        .await
        .unwrap();
    assert!(!again);

    let (active,): (bool,) = sqlx::query_as("SELECT active FROM rooms WHERE id = $1")
        .bind(room.entity.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!active);
}
