//! Job manager: single-job exclusivity and the command surface consumed by
//! controllers and schedulers.

use crate::catalog::CatalogSession;
use crate::config::Config;
use crate::data::change_log::ChangeTracker;
use crate::error::Result;
use crate::harvest::job::{JobRunner, JobSpec};
use crate::harvest::retry::with_retries;
use crate::harvest::semester_match::RemoteSemester;
use crate::metrics::HarvestMetrics;
use crate::progress::{LogLevel, ProgressSnapshot, ProgressTracker};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Progress-log line emitted when a second job is submitted.
const BUSY_MESSAGE: &str = "Es läuft bereits ein Scraping-Prozess";

/// Result of a job submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The job was accepted and is now running.
    Accepted,
    /// Another job is still running; nothing was submitted.
    Busy,
    /// The request was malformed; nothing was submitted.
    InvalidArgument(String),
}

impl SubmitOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

/// A remote semester as exposed to command callers.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteSemesterInfo {
    pub display_name: String,
    pub short_name: String,
}

struct RunningJob {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    cancel_message: Arc<StdMutex<Option<String>>>,
}

/// Owns the single job slot and the shared progress/metrics instances.
pub struct HarvestManager {
    pool: PgPool,
    config: Arc<Config>,
    tracker: Arc<ProgressTracker>,
    metrics: Arc<HarvestMetrics>,
    change: ChangeTracker,
    slot: Mutex<Option<RunningJob>>,
}

impl HarvestManager {
    pub fn new(
        pool: PgPool,
        config: Arc<Config>,
        tracker: Arc<ProgressTracker>,
        metrics: Arc<HarvestMetrics>,
    ) -> Self {
        let change = ChangeTracker::new(pool.clone());
        Self {
            pool,
            config,
            tracker,
            metrics,
            change,
            slot: Mutex::new(None),
        }
    }

    /// Submits a discovery job covering every remote semester.
    pub async fn start_discovery_job(&self) -> SubmitOutcome {
        self.submit(JobSpec::Discovery, "Starte Katalog-Erkundung")
            .await
    }

    /// Submits a job for the semesters matching the given identifiers.
    /// An empty list is rejected without creating a job; identifiers that
    /// match no remote option fail the job once it runs.
    pub async fn start_remote_scraping_job(&self, identifiers: Vec<String>) -> SubmitOutcome {
        if identifiers.is_empty() {
            return SubmitOutcome::InvalidArgument(
                "Keine Semester-Bezeichner angegeben".to_string(),
            );
        }
        self.submit(
            JobSpec::Remote { identifiers },
            "Starte Semester-Scraping",
        )
        .await
    }

    /// Submits a job for one locally known semester. An unknown id is
    /// rejected without creating a job.
    pub async fn start_local_scraping_job(&self, semester_id: i64) -> SubmitOutcome {
        match crate::data::semesters::get_by_id(&self.pool, semester_id).await {
            Ok(Some(_)) => {
                self.submit(
                    JobSpec::Local { semester_id },
                    "Starte Semester-Scraping",
                )
                .await
            }
            Ok(None) => SubmitOutcome::InvalidArgument(format!(
                "Unbekannte Semester-Id: {semester_id}"
            )),
            Err(err) => SubmitOutcome::InvalidArgument(format!(
                "Semester-Id {semester_id} nicht prüfbar: {err:#}"
            )),
        }
    }

    /// Places a job into the slot unless a non-finished job holds it.
    async fn submit(&self, spec: JobSpec, initial_message: &str) -> SubmitOutcome {
        let mut slot = self.slot.lock().await;

        if let Some(job) = slot.as_ref() {
            if !job.handle.is_finished() {
                self.tracker.log(LogLevel::Info, BUSY_MESSAGE);
                return SubmitOutcome::Busy;
            }
        }

        self.tracker.reset(Some(initial_message));

        let cancel = CancellationToken::new();
        let cancel_message = Arc::new(StdMutex::new(None));
        let runner = JobRunner {
            pool: self.pool.clone(),
            config: self.config.clone(),
            tracker: self.tracker.clone(),
            metrics: self.metrics.clone(),
            change: self.change.clone(),
            cancel: cancel.clone(),
            cancel_message: cancel_message.clone(),
        };

        info!(spec = ?spec, "Harvest job submitted");
        let handle = tokio::spawn(runner.run(spec));

        *slot = Some(RunningJob {
            handle,
            cancel,
            cancel_message,
        });
        SubmitOutcome::Accepted
    }

    /// Requests cancellation of the running job. Without a running job the
    /// tracker is reset directly; calling this twice is harmless.
    pub async fn stop_scraping(&self, message: Option<&str>) {
        let slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(job) if !job.handle.is_finished() => {
                let mut cancel_message = job
                    .cancel_message
                    .lock()
                    .expect("cancel message lock poisoned");
                if cancel_message.is_none() {
                    *cancel_message = Some(message.unwrap_or("Scraping gestoppt").to_string());
                }
                drop(cancel_message);
                job.cancel.cancel();
                info!("Stop requested for running job");
            }
            _ => {
                self.tracker.reset(message);
            }
        }
    }

    /// Marks the job as paused. Advisory only: workers keep running; the
    /// status change is what observers see.
    pub fn pause_scraping(&self, message: Option<&str>) {
        self.tracker.pause(message.unwrap_or("Scraping pausiert"));
    }

    /// Whether the job slot holds a job that has not finished.
    pub async fn is_job_running(&self) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|job| !job.handle.is_finished())
    }

    /// Immutable progress snapshot for observers.
    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    pub fn metrics(&self) -> &HarvestMetrics {
        &self.metrics
    }

    pub fn change_tracker(&self) -> &ChangeTracker {
        &self.change
    }

    /// Fetches and classifies the remote semester options on a throwaway
    /// session, independent of any running job.
    pub async fn available_remote_semesters(&self) -> Result<Vec<RemoteSemesterInfo>> {
        let session = CatalogSession::new(&self.config)?;
        let cancel = CancellationToken::new();
        let options = with_retries(
            "fetch_semester_options",
            self.config.max_retries,
            self.config.retry_delay,
            &cancel,
            || session.fetch_semester_options(),
        )
        .await?;

        Ok(options
            .iter()
            .filter_map(|option| RemoteSemester::classify(&option.display_name))
            .map(|remote| RemoteSemesterInfo {
                display_name: remote.display_name,
                short_name: remote.short_name,
            })
            .collect())
    }
}
