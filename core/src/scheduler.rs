//! Per-device periodic jobs
//!
//! Every `(label, kind)` pair owns one spawned task and one cancel signal. A
//! task waits for its next tick or for cancellation, whichever comes first,
//! and checks the signal once more before running the body, so a cancelled job
//! never starts another tick. A body already running when cancellation fires
//! is left to finish.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::{MeshError, MeshResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    InboxDrain,
    RoutingRefresh,
    Walk,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::InboxDrain, JobKind::RoutingRefresh, JobKind::Walk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InboxDrain => "inbox-drain",
            Self::RoutingRefresh => "routing-refresh",
            Self::Walk => "walk",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dropping the handle cancels the job: a dropped sender wakes the task's
/// `changed()` with an error, which ends its loop.
struct JobHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobHandle {
    fn cancel(self) -> JoinHandle<()> {
        self.cancel.send_replace(true);
        self.task
    }
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<(String, JobKind), JobHandle>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `period`, first tick one period from now. Replaces a
    /// job already scheduled under the same label and kind.
    ///
    /// Fails outside a Tokio runtime. `period` must be non-zero.
    pub fn start<F, Fut>(&self, label: &str, kind: JobKind, period: Duration, job: F) -> MeshResult<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = MeshResult<()>> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| MeshError::NoRuntime(e.to_string()))?;
        let (cancel, mut cancel_rx) = watch::channel(false);
        let owner = label.to_string();

        let task = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *cancel_rx.borrow() {
                    break;
                }
                if let Err(e) = job().await {
                    warn!(device = %owner, job = %kind, error = %e, "job tick failed");
                }
            }
            debug!(device = %owner, job = %kind, "job stopped");
        });

        let previous = self
            .jobs
            .lock()
            .insert((label.to_string(), kind), JobHandle { cancel, task });
        if previous.is_some() {
            debug!(device = label, job = %kind, "job replaced");
        }
        debug!(device = label, job = %kind, period_ms = period.as_millis() as u64, "job started");
        Ok(())
    }

    /// Cancel one job. False if it was not scheduled.
    pub fn cancel(&self, label: &str, kind: JobKind) -> bool {
        let removed = self.jobs.lock().remove(&(label.to_string(), kind));
        removed.map(JobHandle::cancel).is_some()
    }

    /// Cancel every job of `label`; returns how many were running
    pub fn cancel_all(&self, label: &str) -> usize {
        let removed: Vec<JobHandle> = {
            let mut jobs = self.jobs.lock();
            let keys: Vec<_> = jobs.keys().filter(|(owner, _)| owner == label).cloned().collect();
            keys.iter().filter_map(|key| jobs.remove(key)).collect()
        };
        let count = removed.len();
        for handle in removed {
            handle.cancel();
        }
        if count > 0 {
            debug!(device = label, jobs = count, "jobs cancelled");
        }
        count
    }

    pub fn is_scheduled(&self, label: &str, kind: JobKind) -> bool {
        self.jobs.lock().contains_key(&(label.to_string(), kind))
    }

    /// Kinds currently scheduled for `label`, in `JobKind` order
    pub fn scheduled(&self, label: &str) -> Vec<JobKind> {
        let jobs = self.jobs.lock();
        JobKind::ALL
            .into_iter()
            .filter(|kind| jobs.contains_key(&(label.to_string(), *kind)))
            .collect()
    }

    /// Cancel everything and wait for running ticks to finish
    pub async fn shutdown(&self) {
        let handles: Vec<JobHandle> = self.jobs.lock().drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            if let Err(e) = handle.cancel().await {
                warn!(error = %e, "job task ended abnormally");
            }
        }
    }
}
