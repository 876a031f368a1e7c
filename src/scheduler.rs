use std::{sync::Arc, time::SystemTime};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, watch};

use crate::collect::{RunError, RunReport};

/// Receiving side of a stop signal.
#[derive(Debug, Clone)]
pub struct Cancel(watch::Receiver<bool>);

impl Cancel {
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// A signal nobody can raise.
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the signal is raised. Pends forever if the sending side
    /// is gone without having raised it.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            core::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    Completed { report: RunReport },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    #[serde(serialize_with = "crate::util::http_date")]
    pub started_at: SystemTime,
    #[serde(serialize_with = "crate::util::http_date")]
    pub finished_at: SystemTime,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub running: bool,
    pub last_run: Option<LastRun>,
}

/// Owner of the "a run is active" state. At most one [`RunToken`] exists at a
/// time; dropping it frees the slot.
#[derive(Debug, Default)]
pub struct Scheduler {
    active: Mutex<Option<watch::Sender<bool>>>,
    last: Mutex<Option<LastRun>>,
    released: Notify,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Claim the run slot, or `None` when a run is already active.
    pub fn claim(self: &Arc<Self>) -> Option<RunToken> {
        let mut active = self.active.lock();
        if active.is_some() {
            return None;
        }

        let (tx, cancel) = Cancel::channel();
        *active = Some(tx);
        drop(active);

        Some(RunToken {
            scheduler: Arc::clone(self),
            cancel,
            started_at: SystemTime::now(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Ask the active run to stop. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        self.active.lock().as_ref().is_some_and(|tx| {
            tx.send_replace(true);
            true
        })
    }

    /// Resolves once no run is active.
    pub async fn idle(&self) {
        loop {
            let released = self.released.notified();
            if !self.is_running() {
                return;
            }
            released.await;
        }
    }

    pub fn status(&self) -> Status {
        Status {
            running: self.is_running(),
            last_run: self.last.lock().clone(),
        }
    }
}

#[derive(Debug)]
pub struct RunToken {
    scheduler: Arc<Scheduler>,
    cancel: Cancel,
    started_at: SystemTime,
}

impl RunToken {
    pub fn cancel(&self) -> Cancel {
        self.cancel.clone()
    }

    /// Record how the run ended and release the slot.
    pub fn finish(self, result: &Result<RunReport, RunError>) {
        let outcome = match result {
            Ok(report) => Outcome::Completed {
                report: report.clone(),
            },
            Err(e) => Outcome::Failed {
                error: e.to_string(),
            },
        };
        *self.scheduler.last.lock() = Some(LastRun {
            started_at: self.started_at,
            finished_at: SystemTime::now(),
            outcome,
        });
    }
}

impl Drop for RunToken {
    fn drop(&mut self) {
        *self.scheduler.active.lock() = None;
        self.scheduler.released.notify_waiters();
    }
}
