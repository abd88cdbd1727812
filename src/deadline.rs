//! Commit-deadline guard.
//!
//! Re-armed on every real mutation and disarmed by `commit`, so a task
//! that mutates a store and forgets to flush is caught instead of leaving
//! changes stranded in RAM. Modeled as plain arm/disarm calls on shared
//! state; the store's watchdog task polls [`CommitDeadline::expired`].

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};

/// How long a mutation may sit uncommitted.
pub const COMMIT_WINDOW: Duration = Duration::from_secs(5);

pub struct CommitDeadline {
    window: Duration,
    deadline: Mutex<CriticalSectionRawMutex, Cell<Option<Instant>>>,
}

impl CommitDeadline {
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: Mutex::new(Cell::new(None)),
        }
    }

    /// Arm, or restart an already-armed guard.
    pub fn arm(&self, now: Instant) {
        let deadline = now + self.window;
        self.deadline.lock(|cell| cell.set(Some(deadline)));
    }

    /// Disarm, returning whether the guard had been armed.
    pub fn disarm(&self) -> bool {
        self.deadline.lock(|cell| cell.take().is_some())
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.lock(|cell| cell.get().is_some())
    }

    /// Whether an armed deadline has passed.
    pub fn expired(&self, now: Instant) -> bool {
        self.deadline
            .lock(|cell| matches!(cell.get(), Some(deadline) if now >= deadline))
    }
}
