//! Scraping of one study program: fach-semester enumeration and the row
//! loop feeding the upsert pipeline.

use crate::catalog::{CatalogSession, StudyProgramOption};
use crate::data::reference;
use crate::data::upsert::{self, RowContext};
use crate::error::{Cancelled, Result};
use crate::harvest::stats::ScrapeStats;
use crate::metrics::{HarvestMetrics, TIMER_PROGRAM, TIMER_ROW_PERSIST};
use crate::progress::{LogLevel, ProgressTracker};
use sqlx::PgPool;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Returns [`Cancelled`] once the token fires. Called at task boundaries
/// and at the top of every row loop.
pub fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Cancelled.into());
    }
    Ok(())
}

/// Shared per-semester context handed to every program task.
pub struct ProgramContext<'a> {
    pub pool: &'a PgPool,
    pub tracker: &'a ProgressTracker,
    pub metrics: &'a HarvestMetrics,
    pub cancel: &'a CancellationToken,
    pub run_id: i64,
    pub semester_id: i64,
}

/// Scrapes every fach-semester of one study program through the given
/// session, persisting each row in its own transaction.
///
/// The default page already shows the currently selected fach-semester;
/// only the other options require a POST.
pub async fn scrape_study_program(
    session: &CatalogSession,
    ctx: &ProgramContext<'_>,
    program: &StudyProgramOption,
) -> Result<ScrapeStats> {
    ensure_active(ctx.cancel)?;

    let started = Instant::now();
    debug!(code = program.code, "Scraping study program");

    let default_page = session.open_program(program).await?;
    let fach_options = session.parse_fach_semesters(&default_page);

    {
        // The program itself is reference data; register it before its rows.
        let mut conn = ctx.pool.acquire().await?;
        reference::ensure_study_program(
            &mut conn,
            &program.code,
            &program.display_name,
            program.faculty.as_deref(),
        )
        .await?;
    }

    ctx.tracker
        .subtask_start(&program.code, &program.display_name, fach_options.len().max(1) as u64);

    let mut stats = ScrapeStats::default();

    if fach_options.is_empty() {
        // No dropdown: the default page is the only table this program has.
        scrape_table(session, ctx, program, None, &default_page, &mut stats).await?;
        ctx.tracker.subtask_update(&program.code, 1, None);
    } else {
        for (index, option) in fach_options.iter().enumerate() {
            ensure_active(ctx.cancel)?;

            let body = if option.post_required {
                session.open_program_semester(program, &option.label).await?
            } else {
                default_page.clone()
            };
            scrape_table(session, ctx, program, Some(&option.label), &body, &mut stats).await?;

            ctx.tracker
                .subtask_update(&program.code, (index + 1) as u64, Some(&option.label));
        }
    }

    ctx.tracker.subtask_finish(&program.code);
    ctx.metrics.record(TIMER_PROGRAM, started.elapsed());

    info!(
        code = program.code,
        total = stats.total_entries,
        new = stats.new_entries,
        updated = stats.updated_entries,
        skipped = stats.skipped_rows,
        "Study program scraped"
    );
    Ok(stats)
}

async fn scrape_table(
    session: &CatalogSession,
    ctx: &ProgramContext<'_>,
    program: &StudyProgramOption,
    fach_semester: Option<&str>,
    body: &str,
    stats: &mut ScrapeStats,
) -> Result<()> {
    let table = session.parse_schedule(body);
    if table.skipped > 0 {
        ctx.tracker.log(
            LogLevel::Warn,
            &format!(
                "{}: {} Zeilen übersprungen (nicht lesbar)",
                program.code, table.skipped
            ),
        );
        stats.skipped_rows += table.skipped as i32;
    }

    let row_ctx = RowContext {
        run_id: ctx.run_id,
        semester_id: ctx.semester_id,
        program,
        fach_semester,
    };

    for row in &table.rows {
        ensure_active(ctx.cancel)?;

        let started = Instant::now();
        let outcome = upsert::persist_row(ctx.pool, ctx.tracker, &row_ctx, row).await?;
        ctx.metrics.record(TIMER_ROW_PERSIST, started.elapsed());

        stats.record(outcome);
    }

    Ok(())
}
