//! Cooperative tick-driven job scheduler.
//!
//! One recurring job per sensor, each with an independent interval. The
//! run loop calls [`Scheduler::take_due`] once per tick; due jobs come back
//! in registration order and are executed sequentially by the caller, so an
//! action that overruns its interval delays its next firing instead of
//! running concurrently with it.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Identifier handed out for every registered job.
pub type JobId = u64;

/// Errors that can occur when registering a job.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A zero interval is invalid configuration, not a request to spin.
    #[error("job interval must be greater than zero")]
    ZeroInterval,
}

#[derive(Debug)]
struct Job<T> {
    interval: Duration,
    next_due: Instant,
    payload: T,
}

/// Recurring jobs keyed by registration order.
#[derive(Debug, Default)]
pub struct Scheduler<T> {
    jobs: Vec<Job<T>>,
    next_id: JobId,
}

impl<T: Clone> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            next_id: 0,
        }
    }

    /// Register a job that first fires `interval` after registration and
    /// every `interval` thereafter.
    ///
    /// # Errors
    /// Returns `ScheduleError::ZeroInterval` for a zero interval.
    pub fn schedule(&mut self, interval: Duration, payload: T) -> Result<JobId, ScheduleError> {
        self.schedule_at(Instant::now(), interval, payload)
    }

    /// Like [`schedule`](Self::schedule) with an explicit registration
    /// instant.
    pub fn schedule_at(
        &mut self,
        now: Instant,
        interval: Duration,
        payload: T,
    ) -> Result<JobId, ScheduleError> {
        if interval.is_zero() {
            return Err(ScheduleError::ZeroInterval);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.push(Job {
            interval,
            next_due: now + interval,
            payload,
        });
        Ok(id)
    }

    /// Payloads of every job due at `now`, in registration order.
    ///
    /// Each returned job is re-armed at `now + interval`: if the caller's
    /// action runs long, the following firing is delayed, never skipped and
    /// never run in parallel.
    pub fn take_due(&mut self, now: Instant) -> Vec<T> {
        let mut due = Vec::new();
        for job in &mut self.jobs {
            if job.next_due <= now {
                due.push(job.payload.clone());
                job.next_due = now + job.interval;
            }
        }
        due
    }

    /// Drop every job so no further firings occur.
    pub fn cancel_all(&mut self) {
        self.jobs.clear();
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
