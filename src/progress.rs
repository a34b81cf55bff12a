//! Thread-safe, hierarchical progress reporting for harvest jobs.
//!
//! One tracker instance lives for the whole application; jobs reset it on
//! start. All mutations go through a single mutex, readers take immutable
//! [`ProgressSnapshot`]s. The log is a bounded ring and doubles as the
//! user-visible trace of a run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Maximum number of retained log entries.
const LOG_CAPACITY: usize = 100;

/// Lifecycle status of the job (and of individual sub-tasks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Severity of a progress log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Progress of one unit of work within the job (e.g. a study program).
#[derive(Debug, Clone, Serialize)]
pub struct SubTask {
    pub id: String,
    pub label: String,
    pub status: JobStatus,
    pub processed: u64,
    pub total: u64,
    pub progress: u8,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Immutable view of the tracker state.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub current_task: String,
    pub processed_count: u64,
    pub total_count: u64,
    pub progress: u8,
    pub message: Option<String>,
    pub logs: Vec<LogEntry>,
    pub sub_tasks: Vec<SubTask>,
}

#[derive(Debug)]
struct State {
    status: JobStatus,
    current_task: String,
    processed_count: u64,
    total_count: u64,
    message: Option<String>,
    logs: VecDeque<LogEntry>,
    sub_tasks: Vec<SubTask>,
}

impl State {
    fn new() -> Self {
        Self {
            status: JobStatus::Idle,
            current_task: String::new(),
            processed_count: 0,
            total_count: 0,
            message: None,
            logs: VecDeque::with_capacity(LOG_CAPACITY),
            sub_tasks: Vec::new(),
        }
    }

    fn push_log(&mut self, level: LogLevel, message: String) {
        if self.logs.len() >= LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            level,
            message,
            timestamp: Utc::now(),
        });
    }

    /// Aggregate percentage: sub-task totals dominate when present,
    /// otherwise the top-level counters decide.
    fn progress(&self) -> u8 {
        if !self.sub_tasks.is_empty() {
            let total: u64 = self.sub_tasks.iter().map(|t| t.total).sum();
            if total > 0 {
                let processed: u64 = self.sub_tasks.iter().map(|t| t.processed).sum();
                return percent(processed, total);
            }
            let sum: u32 = self.sub_tasks.iter().map(|t| t.progress as u32).sum();
            return (sum / self.sub_tasks.len() as u32) as u8;
        }
        match self.status {
            JobStatus::Completed => 100,
            _ => percent(self.processed_count, self.total_count),
        }
    }
}

/// Rounded percentage clamped to 0..=100; a non-positive total is 0.
fn percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = ((processed as f64 / total as f64) * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Mutex-guarded progress state shared between the job and its observers.
#[derive(Debug)]
pub struct ProgressTracker {
    inner: Mutex<State>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(State::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.lock().expect("progress tracker lock poisoned")
    }

    /// Transitions to `running` with a fresh counter set.
    pub fn start(&self, total: u64, task: &str, message: &str) {
        let mut state = self.lock();
        state.status = JobStatus::Running;
        state.current_task = task.to_string();
        state.processed_count = 0;
        state.total_count = total;
        state.message = Some(message.to_string());
        state.push_log(LogLevel::Info, message.to_string());
    }

    /// Updates counters and optionally the task label and message.
    pub fn update(
        &self,
        task: Option<&str>,
        processed: u64,
        total: Option<u64>,
        message: Option<&str>,
    ) {
        let mut state = self.lock();
        if let Some(task) = task {
            state.current_task = task.to_string();
        }
        state.processed_count = processed;
        if let Some(total) = total {
            state.total_count = total;
        }
        if let Some(message) = message {
            state.message = Some(message.to_string());
            state.push_log(LogLevel::Info, message.to_string());
        }
    }

    /// Transitions to `completed` with progress pinned at 100.
    pub fn finish(&self, message: &str) {
        let mut state = self.lock();
        state.status = JobStatus::Completed;
        state.processed_count = state.processed_count.max(state.total_count);
        state.message = Some(message.to_string());
        state.push_log(LogLevel::Info, message.to_string());
        for task in &mut state.sub_tasks {
            if task.status == JobStatus::Running {
                task.status = JobStatus::Completed;
                task.processed = task.total.max(task.processed);
                task.progress = 100;
            }
        }
    }

    /// Transitions to `failed`.
    pub fn fail(&self, message: &str) {
        let mut state = self.lock();
        state.status = JobStatus::Failed;
        state.message = Some(message.to_string());
        state.push_log(LogLevel::Error, message.to_string());
    }

    /// Transitions to `paused` (advisory; workers are not halted).
    pub fn pause(&self, message: &str) {
        let mut state = self.lock();
        state.status = JobStatus::Paused;
        state.message = Some(message.to_string());
        state.push_log(LogLevel::Info, message.to_string());
    }

    /// Returns to `idle`, clearing counters and sub-tasks. The log ring is
    /// kept so the trace of the previous run stays readable.
    pub fn reset(&self, message: Option<&str>) {
        let mut state = self.lock();
        state.status = JobStatus::Idle;
        state.current_task.clear();
        state.processed_count = 0;
        state.total_count = 0;
        state.sub_tasks.clear();
        state.message = message.map(str::to_string);
        if let Some(message) = message {
            state.push_log(LogLevel::Info, message.to_string());
        }
    }

    /// Appends a log line without touching the rest of the state.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.lock().push_log(level, message.to_string());
    }

    /// Registers (or restarts) a sub-task.
    pub fn subtask_start(&self, id: &str, label: &str, total: u64) {
        let mut state = self.lock();
        let task = SubTask {
            id: id.to_string(),
            label: label.to_string(),
            status: JobStatus::Running,
            processed: 0,
            total,
            progress: 0,
            message: None,
            started_at: Some(Utc::now()),
        };
        if let Some(existing) = state.sub_tasks.iter_mut().find(|t| t.id == id) {
            *existing = task;
        } else {
            state.sub_tasks.push(task);
        }
    }

    /// Updates a sub-task's counters.
    pub fn subtask_update(&self, id: &str, processed: u64, message: Option<&str>) {
        let mut state = self.lock();
        if let Some(task) = state.sub_tasks.iter_mut().find(|t| t.id == id) {
            task.processed = processed;
            task.progress = percent(task.processed, task.total);
            if let Some(message) = message {
                task.message = Some(message.to_string());
            }
        }
    }

    /// Marks a sub-task as completed.
    pub fn subtask_finish(&self, id: &str) {
        let mut state = self.lock();
        if let Some(task) = state.sub_tasks.iter_mut().find(|t| t.id == id) {
            task.status = JobStatus::Completed;
            task.processed = task.total.max(task.processed);
            task.progress = 100;
        }
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// Deep-copied snapshot with the last 100 log entries.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        ProgressSnapshot {
            status: state.status,
            current_task: state.current_task.clone(),
            processed_count: state.processed_count,
            total_count: state.total_count,
            progress: state.progress(),
            message: state.message.clone(),
            logs: state.logs.iter().cloned().collect(),
            sub_tasks: state.sub_tasks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle() {
        let tracker = ProgressTracker::new();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.status, JobStatus::Idle);
        assert_eq!(snapshot.progress, 0);
        assert!(snapshot.logs.is_empty());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let tracker = ProgressTracker::new();

        tracker.start(10, "scrape", "los geht's");
        assert_eq!(tracker.status(), JobStatus::Running);

        tracker.update(None, 5, None, None);
        assert_eq!(tracker.snapshot().progress, 50);

        tracker.pause("kurz warten");
        assert_eq!(tracker.status(), JobStatus::Paused);

        tracker.fail("kaputt");
        assert_eq!(tracker.status(), JobStatus::Failed);

        tracker.reset(Some("zurückgesetzt"));
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.status, JobStatus::Idle);
        assert_eq!(snapshot.total_count, 0);
        assert!(snapshot.sub_tasks.is_empty());
    }

    #[test]
    fn test_finish_pins_progress_at_100() {
        let tracker = ProgressTracker::new();
        tracker.start(7, "scrape", "start");
        tracker.update(None, 3, None, None);
        tracker.finish("fertig");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.progress, 100);
    }

    #[test]
    fn test_percent_handles_zero_total() {
        assert_eq!(percent(5, 0), 0);
        assert_eq!(percent(0, 10), 0);
        assert_eq!(percent(10, 10), 100);
        assert_eq!(percent(1, 3), 33);
    }

    #[test]
    fn test_aggregate_progress_from_subtask_totals() {
        let tracker = ProgressTracker::new();
        tracker.start(0, "scrape", "start");
        tracker.subtask_start("a", "Programm A", 10);
        tracker.subtask_start("b", "Programm B", 30);
        tracker.subtask_update("a", 10, None);
        tracker.subtask_update("b", 10, None);

        // 20 of 40 processed
        assert_eq!(tracker.snapshot().progress, 50);
    }

    #[test]
    fn test_aggregate_progress_falls_back_to_average() {
        let tracker = ProgressTracker::new();
        tracker.start(0, "scrape", "start");
        tracker.subtask_start("a", "Programm A", 0);
        tracker.subtask_start("b", "Programm B", 0);
        tracker.subtask_finish("a");

        // (100 + 0) / 2
        assert_eq!(tracker.snapshot().progress, 50);
    }

    #[test]
    fn test_log_ring_is_bounded() {
        let tracker = ProgressTracker::new();
        for i in 0..250 {
            tracker.log(LogLevel::Debug, &format!("zeile {i}"));
        }

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.logs.len(), 100);
        assert_eq!(snapshot.logs[0].message, "zeile 150");
        assert_eq!(snapshot.logs[99].message, "zeile 249");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let tracker = ProgressTracker::new();
        tracker.start(4, "scrape", "start");
        let before = tracker.snapshot();

        tracker.update(None, 4, None, Some("weiter"));
        assert_eq!(before.processed_count, 0);
        assert_eq!(tracker.snapshot().processed_count, 4);
    }

    #[test]
    fn test_snapshot_serializes() {
        let tracker = ProgressTracker::new();
        tracker.start(2, "scrape", "start");
        let json = serde_json::to_value(tracker.snapshot()).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["logs"][0]["level"], "INFO");
    }

    #[test]
    fn test_subtask_restart_replaces_entry() {
        let tracker = ProgressTracker::new();
        tracker.subtask_start("a", "Programm A", 5);
        tracker.subtask_update("a", 5, None);
        tracker.subtask_start("a", "Programm A", 8);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.sub_tasks.len(), 1);
        assert_eq!(snapshot.sub_tasks[0].processed, 0);
        assert_eq!(snapshot.sub_tasks[0].total, 8);
    }
}
