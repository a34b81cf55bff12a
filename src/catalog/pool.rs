//! Bounded pool of catalog sessions shared by harvest workers.
//!
//! Sessions are sequential, so a worker must hold one exclusively for the
//! duration of its catalog operations. Each slot carries an atomic busy flag;
//! acquisition sweeps the slots and compare-and-sets the first free one,
//! sleeping briefly between sweeps.

use crate::catalog::session::CatalogSession;
use crate::error::{Cancelled, Result};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Pause between acquisition sweeps.
const ACQUIRE_RETRY: Duration = Duration::from_millis(10);

struct SessionSlot {
    session: CatalogSession,
    busy: AtomicBool,
}

/// Fixed-size pool of exclusive catalog sessions.
pub struct SessionPool {
    slots: Vec<SessionSlot>,
}

/// Exclusive hold on one pooled session; the slot frees itself on drop.
pub struct SessionGuard<'a> {
    slot: &'a SessionSlot,
}

impl std::fmt::Debug for SessionGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard").finish_non_exhaustive()
    }
}

impl Deref for SessionGuard<'_> {
    type Target = CatalogSession;

    fn deref(&self) -> &CatalogSession {
        &self.slot.session
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
    }
}

impl SessionPool {
    /// Builds a pool over the given sessions. The slot array is immutable
    /// after construction; only the busy flags change.
    pub fn new(sessions: Vec<CatalogSession>) -> Self {
        assert!(!sessions.is_empty(), "session pool must not be empty");
        Self {
            slots: sessions
                .into_iter()
                .map(|session| SessionSlot {
                    session,
                    busy: AtomicBool::new(false),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Acquires a free session, waiting as long as necessary.
    ///
    /// There is no overall timeout; cancellation is checked between sweeps
    /// and surfaces as [`Cancelled`].
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SessionGuard<'_>> {
        loop {
            for slot in &self.slots {
                if slot
                    .busy
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(SessionGuard { slot });
                }
            }

            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            tokio::time::sleep(ACQUIRE_RETRY).await;
        }
    }

    /// Primes every pooled session for the given semester: fetches the
    /// semester options and re-selects the target so the server-side session
    /// state matches before workers start.
    pub async fn prime(&self, semester_display_name: &str) -> Result<()> {
        for (index, slot) in self.slots.iter().enumerate() {
            let options = slot.session.fetch_semester_options().await?;
            if !options
                .iter()
                .any(|option| option.display_name == semester_display_name)
            {
                debug!(
                    session = index,
                    semester = semester_display_name,
                    "Semester missing from options during priming"
                );
            }
            slot.session.select_semester(semester_display_name).await?;
        }
        info!(
            sessions = self.slots.len(),
            semester = semester_display_name,
            "Session pool primed"
        );
        Ok(())
    }
}
