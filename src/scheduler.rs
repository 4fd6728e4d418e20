//! Periodic jobs

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// The jobs a [`Scheduler`] knows about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobId {
    StockCheck,
    CalendarSync,
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            JobId::StockCheck => write!(f, "stock check"),
            JobId::CalendarSync => write!(f, "calendar sync"),
        }
    }
}

/// Owns the handles of the periodic jobs.
///
/// There is at most one running instance of each job. Registering a job again cancels the previous instance.
/// This must be used from within a tokio runtime.
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JoinHandle<()>>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `task` every `period`, the first time one `period` from now. Any previous instance of this job is cancelled
    pub fn replace<F, Fut>(&self, job: JobId, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                log::debug!("Running scheduled {}", job);
                // A panicking run must not end the loop
                let mut run = RunHandle(tokio::spawn(task()));
                if let Err(err) = (&mut run.0).await {
                    if err.is_panic() {
                        log::error!("Scheduled {} panicked: {}", job, err);
                    }
                }
            }
        });

        if let Some(previous) = self.jobs().insert(job, handle) {
            previous.abort();
        }
        log::info!("Scheduled {} every {:?}", job, period);
    }

    /// Returns whether a job was actually cancelled
    pub fn cancel(&self, job: JobId) -> bool {
        match self.jobs().remove(&job) {
            None => false,
            Some(handle) => {
                handle.abort();
                log::info!("Cancelled {}", job);
                true
            }
        }
    }

    pub fn is_scheduled(&self, job: JobId) -> bool {
        self.jobs().contains_key(&job)
    }

    /// Cancel every job
    pub fn shutdown(&self) {
        for (job, handle) in self.jobs().drain() {
            log::debug!("Stopping {}", job);
            handle.abort();
        }
    }
}

/// Aborts the current run when the job itself is cancelled
struct RunHandle(JoinHandle<()>);

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
