//! Execution of a single harvest job.
//!
//! A job owns one orchestrator session for discovery and semester selection.
//! Study programs within a semester run either serially on that session or
//! fanned out over a worker pool sharing a session pool. Each semester gets
//! its own [`ScrapingRun`] row.
//!
//! [`ScrapingRun`]: crate::data::models::ScrapingRun

use crate::catalog::{CatalogSession, SessionPool, StudyProgramOption};
use crate::config::{Config, MAX_PARALLELISM};
use crate::data::change_log::ChangeTracker;
use crate::data::models::Semester;
use crate::data::semesters;
use crate::error::{Cancelled, Result};
use crate::harvest::program::{ProgramContext, ensure_active, scrape_study_program};
use crate::harvest::retry::with_retries;
use crate::harvest::semester_match::{RemoteSemester, SemesterMatcher};
use crate::harvest::stats::ScrapeStats;
use crate::metrics::{HarvestMetrics, TIMER_RUN, TIMER_SEMESTER};
use crate::progress::{LogLevel, ProgressTracker};
use anyhow::anyhow;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Hard ceiling on one semester's worker fan-out.
const WORKER_POOL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// What a submitted job should harvest.
#[derive(Debug, Clone)]
pub enum JobSpec {
    /// Enumerate all remote semesters, ensure local rows, scrape each.
    Discovery,
    /// Scrape the remote semesters matching these free-form identifiers.
    Remote { identifiers: Vec<String> },
    /// Scrape one locally known semester.
    Local { semester_id: i64 },
}

/// Executes one job on the manager's job slot.
pub(crate) struct JobRunner {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub tracker: Arc<ProgressTracker>,
    pub metrics: Arc<HarvestMetrics>,
    pub change: ChangeTracker,
    pub cancel: CancellationToken,
    pub cancel_message: Arc<Mutex<Option<String>>>,
}

impl JobRunner {
    /// Runs the job to its terminal tracker state. Never panics the slot:
    /// every outcome ends in `completed`, `failed` or (after a stop) `idle`.
    pub async fn run(self, spec: JobSpec) {
        let started = Instant::now();
        let result = self.run_inner(&spec).await;
        self.metrics.record(TIMER_RUN, started.elapsed());

        match result {
            Ok(()) => {
                info!(elapsed = ?started.elapsed(), "Harvest job finished");
                self.tracker.finish("Scraping abgeschlossen");
            }
            Err(err) if err.downcast_ref::<Cancelled>().is_some() => {
                let message = self
                    .cancel_message
                    .lock()
                    .expect("cancel message lock poisoned")
                    .take();
                info!(reason = message.as_deref(), "Harvest job cancelled");
                match message {
                    Some(message) => self.tracker.reset(Some(&message)),
                    None => self.tracker.fail("Scraping abgebrochen"),
                }
            }
            Err(err) => {
                error!(error = ?err, "Harvest job failed");
                self.tracker
                    .fail(&format!("Scraping fehlgeschlagen: {err:#}"));
            }
        }
    }

    async fn run_inner(&self, spec: &JobSpec) -> Result<()> {
        let session = CatalogSession::new(&self.config)?;
        let options = with_retries(
            "fetch_semester_options",
            self.config.max_retries,
            self.config.retry_delay,
            &self.cancel,
            || session.fetch_semester_options(),
        )
        .await?;

        let remotes: Vec<RemoteSemester> = options
            .iter()
            .filter_map(|option| {
                let classified = RemoteSemester::classify(&option.display_name);
                if classified.is_none() {
                    warn!(
                        option = option.display_name,
                        "Unrecognized semester option, skipping"
                    );
                }
                classified
            })
            .collect();
        if remotes.is_empty() {
            anyhow::bail!("Keine Semester im Katalog gefunden");
        }

        let targets = self.resolve_targets(spec, remotes).await?;

        self.tracker.start(
            targets.len() as u64,
            "Scraping",
            &format!("{} Semester zu verarbeiten", targets.len()),
        );

        for (index, (semester, remote)) in targets.iter().enumerate() {
            ensure_active(&self.cancel)?;
            self.scrape_semester(&session, semester, remote).await?;
            self.tracker.update(
                Some(&remote.display_name),
                (index + 1) as u64,
                None,
                Some(&format!("{} abgeschlossen", remote.short_name)),
            );
        }

        Ok(())
    }

    /// Turns the job spec into (local semester, remote option) pairs.
    async fn resolve_targets(
        &self,
        spec: &JobSpec,
        remotes: Vec<RemoteSemester>,
    ) -> Result<Vec<(Semester, RemoteSemester)>> {
        match spec {
            JobSpec::Discovery => {
                let mut targets = Vec::with_capacity(remotes.len());
                for remote in remotes {
                    targets.push((self.ensure_semester(&remote).await?, remote));
                }
                Ok(targets)
            }
            JobSpec::Remote { identifiers } => {
                let matcher = SemesterMatcher::new(remotes);
                let mut targets = Vec::with_capacity(identifiers.len());
                for identifier in identifiers {
                    let remote = matcher
                        .resolve(identifier)
                        .ok_or_else(|| anyhow!("Unbekanntes Semester: {identifier}"))?
                        .clone();
                    targets.push((self.ensure_semester(&remote).await?, remote));
                }
                Ok(targets)
            }
            JobSpec::Local { semester_id } => {
                let semester = semesters::get_by_id(&self.pool, *semester_id)
                    .await?
                    .ok_or_else(|| anyhow!("Unbekannte Semester-Id: {semester_id}"))?;
                let matcher = SemesterMatcher::new(remotes);
                let remote = matcher
                    .resolve(&semester.short_name)
                    .or_else(|| matcher.resolve(&semester.name))
                    .cloned()
                    .ok_or_else(|| {
                        anyhow!("Semester {} nicht im Katalog gefunden", semester.name)
                    })?;
                Ok(vec![(semester, remote)])
            }
        }
    }

    async fn ensure_semester(&self, remote: &RemoteSemester) -> Result<Semester> {
        let (start_date, end_date) = remote.date_window();
        semesters::ensure(
            &self.pool,
            &remote.display_name,
            &remote.short_name,
            start_date,
            end_date,
        )
        .await
    }

    /// One semester: open a run, scrape, close the run. Errors re-throw
    /// after the run row is closed.
    async fn scrape_semester(
        &self,
        session: &CatalogSession,
        semester: &Semester,
        remote: &RemoteSemester,
    ) -> Result<()> {
        let run_id = self
            .change
            .start_run(semester.id, &self.config.base_url)
            .await?;
        self.metrics.run_started();
        self.tracker
            .log(LogLevel::Info, &format!("Beginne {}", remote.display_name));

        let started = Instant::now();
        let result = self
            .scrape_semester_inner(session, semester, remote, run_id)
            .await;
        self.metrics.record(TIMER_SEMESTER, started.elapsed());

        match result {
            Ok(stats) => {
                self.change.complete_run(run_id, &stats).await?;
                self.metrics.run_succeeded();
                self.tracker.log(
                    LogLevel::Info,
                    &format!(
                        "{}: {} Einträge ({} neu, {} aktualisiert)",
                        remote.short_name,
                        stats.total_entries,
                        stats.new_entries,
                        stats.updated_entries
                    ),
                );
                Ok(())
            }
            Err(err) if err.downcast_ref::<Cancelled>().is_some() => {
                self.change.cancel_run(run_id, "Scraping abgebrochen").await?;
                Err(err)
            }
            Err(err) => {
                self.metrics.run_failed();
                self.metrics.error();
                let message = format!("{err:#}");
                self.change.fail_run(run_id, &message).await?;
                self.tracker.log(
                    LogLevel::Error,
                    &format!("{} fehlgeschlagen: {message}", remote.short_name),
                );
                Err(err)
            }
        }
    }

    async fn scrape_semester_inner(
        &self,
        session: &CatalogSession,
        semester: &Semester,
        remote: &RemoteSemester,
        run_id: i64,
    ) -> Result<ScrapeStats> {
        session.select_semester(&remote.display_name).await?;

        let programs = with_retries(
            "fetch_study_programs",
            self.config.max_retries,
            self.config.retry_delay,
            &self.cancel,
            || session.fetch_study_programs(),
        )
        .await?;

        info!(
            semester = remote.short_name,
            programs = programs.len(),
            "Study programs fetched"
        );
        if programs.is_empty() {
            self.tracker.log(
                LogLevel::Warn,
                &format!("{}: keine Studiengänge gefunden", remote.short_name),
            );
            return Ok(ScrapeStats::default());
        }

        if self.config.parallel.enabled && programs.len() > 1 {
            self.scrape_programs_parallel(semester, remote, run_id, programs)
                .await
        } else {
            self.scrape_programs_serial(session, semester, run_id, &programs)
                .await
        }
    }

    /// Serial path: every program runs on the orchestrator session.
    async fn scrape_programs_serial(
        &self,
        session: &CatalogSession,
        semester: &Semester,
        run_id: i64,
        programs: &[StudyProgramOption],
    ) -> Result<ScrapeStats> {
        let ctx = ProgramContext {
            pool: &self.pool,
            tracker: &self.tracker,
            metrics: &self.metrics,
            cancel: &self.cancel,
            run_id,
            semester_id: semester.id,
        };

        let mut aggregate = ScrapeStats::default();
        for program in programs {
            ensure_active(&self.cancel)?;
            aggregate.merge(scrape_study_program(session, &ctx, program).await?);
        }
        Ok(aggregate)
    }

    /// Parallel path: one task per program, bounded by a worker semaphore,
    /// sessions mediated by the session pool. The first real task error
    /// cancels the remaining workers and becomes the job failure; stats flow
    /// back over a channel and are merged by this single owner.
    async fn scrape_programs_parallel(
        &self,
        semester: &Semester,
        remote: &RemoteSemester,
        run_id: i64,
        programs: Vec<StudyProgramOption>,
    ) -> Result<ScrapeStats> {
        let max_workers = self.config.parallel.max_workers.clamp(1, MAX_PARALLELISM);
        let pool_size = self.config.effective_session_pool_size();

        let mut sessions = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            sessions.push(CatalogSession::new(&self.config)?);
        }
        let session_pool = Arc::new(SessionPool::new(sessions));
        with_retries(
            "prime_session_pool",
            self.config.max_retries,
            self.config.retry_delay,
            &self.cancel,
            || session_pool.prime(&remote.display_name),
        )
        .await?;

        info!(
            semester = remote.short_name,
            workers = max_workers,
            sessions = pool_size,
            programs = programs.len(),
            "Dispatching parallel program scrape"
        );

        let worker_slots = Arc::new(Semaphore::new(max_workers));
        let (stats_tx, mut stats_rx) = mpsc::channel::<ScrapeStats>(programs.len());
        let errors: Arc<Mutex<Vec<anyhow::Error>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::with_capacity(programs.len());
        for program in programs {
            let worker_slots = worker_slots.clone();
            let session_pool = session_pool.clone();
            let stats_tx = stats_tx.clone();
            let errors = errors.clone();
            let cancel = self.cancel.clone();
            let pool = self.pool.clone();
            let tracker = self.tracker.clone();
            let metrics = self.metrics.clone();
            let inter_task_delay = self.config.parallel.inter_task_delay;
            let semester_id = semester.id;

            handles.push(tokio::spawn(async move {
                let _permit = worker_slots
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed");

                let outcome = async {
                    ensure_active(&cancel)?;
                    let session = session_pool.acquire(&cancel).await?;
                    let ctx = ProgramContext {
                        pool: &pool,
                        tracker: &tracker,
                        metrics: &metrics,
                        cancel: &cancel,
                        run_id,
                        semester_id,
                    };
                    let stats = scrape_study_program(&session, &ctx, &program).await?;
                    drop(session);
                    let _ = stats_tx.send(stats).await;

                    if !inter_task_delay.is_zero() {
                        tokio::time::sleep(inter_task_delay).await;
                    }
                    Ok::<(), anyhow::Error>(())
                }
                .await;

                if let Err(err) = outcome {
                    if err.downcast_ref::<Cancelled>().is_none() {
                        errors.lock().expect("error queue lock poisoned").push(err);
                        // Interrupt the remaining workers; the first queued
                        // error becomes the job's failure cause.
                        cancel.cancel();
                    }
                }
            }));
        }
        drop(stats_tx);

        let joined =
            tokio::time::timeout(WORKER_POOL_TIMEOUT, futures::future::join_all(handles)).await;
        match joined {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    warn!(panicked, "Worker task(s) panicked");
                    errors
                        .lock()
                        .expect("error queue lock poisoned")
                        .push(anyhow!("{panicked} Worker-Task(s) abgestürzt"));
                }
            }
            Err(_) => {
                self.cancel.cancel();
                anyhow::bail!(
                    "Worker-Pool Timeout nach {} Minuten",
                    WORKER_POOL_TIMEOUT.as_secs() / 60
                );
            }
        }

        if let Some(first) = errors
            .lock()
            .expect("error queue lock poisoned")
            .drain(..)
            .next()
        {
            return Err(first);
        }
        ensure_active(&self.cancel)?;

        let mut aggregate = ScrapeStats::default();
        while let Some(stats) = stats_rx.recv().await {
            aggregate.merge(stats);
        }
        Ok(aggregate)
    }
}
