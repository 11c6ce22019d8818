//! Periodic task scheduler
//!
//! Ingest and maintenance run as independent tokio tasks, each on its own
//! interval. The first tick fires immediately. A job always runs to
//! completion: the stop signal is only observed between ticks, and
//! `stop()` waits for the in-flight job before returning.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::admin::Maintenance;
use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::feed::SnapshotSource;
use crate::ingest::IngestWriter;

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Factory producing one run of a periodic job
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// One named job on a fixed interval
pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
    stop_tx: watch::Sender<bool>,
    last_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn(name: &'static str, period: Duration, clock: SharedClock, job: Job) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let last_run = Arc::new(Mutex::new(None));
        let last_run_task = last_run.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // An overrunning job pushes the next tick back instead of bunching
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                if *stop_rx.borrow() {
                    break;
                }

                job().await;
                *last_run_task.lock() = Some(clock.now());
            }
            info!(task = name, "⏹️ Periodic task stopped");
        });

        info!(task = name, period_secs = period.as_secs(), "▶️ Periodic task started");
        Self {
            name,
            period,
            stop_tx,
            last_run,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Completion time of the most recent run
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock()
    }

    /// Signal stop and wait for the task, including any in-flight run
    pub async fn stop(self) -> Result<()> {
        // Receiver is gone only if the task already exited
        let _ = self.stop_tx.send(true);
        self.handle
            .await
            .map_err(|e| Error::Task(format!("{} task failed: {}", self.name, e)))
    }
}

/// Owns the ingest and maintenance tasks
pub struct Scheduler {
    tasks: Vec<PeriodicTask>,
}

impl Scheduler {
    /// Start both periodic tasks
    pub fn start(
        source: Arc<dyn SnapshotSource>,
        writer: Arc<IngestWriter>,
        maintenance: Arc<Maintenance>,
        ingest_period: Duration,
        maintenance_period: Duration,
        clock: SharedClock,
    ) -> Self {
        let ingest = PeriodicTask::spawn(
            "ingest",
            ingest_period,
            clock.clone(),
            ingest_job(source, writer),
        );
        let maintenance = PeriodicTask::spawn(
            "maintenance",
            maintenance_period,
            clock,
            maintenance_job(maintenance),
        );
        Self {
            tasks: vec![ingest, maintenance],
        }
    }

    pub fn tasks(&self) -> &[PeriodicTask] {
        &self.tasks
    }

    /// Stop every task, waiting for in-flight runs
    pub async fn stop(self) -> Result<()> {
        let mut first_err = None;
        for task in self.tasks {
            let name = task.name();
            if let Err(e) = task.stop().await {
                error!(task = name, error = %e, "Task did not stop cleanly");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Fetch a snapshot and append it to the raw tier. Failures are logged and
/// the next tick tries again.
pub fn ingest_job(source: Arc<dyn SnapshotSource>, writer: Arc<IngestWriter>) -> Job {
    Arc::new(move || -> JobFuture {
        let source = source.clone();
        let writer = writer.clone();
        Box::pin(async move {
            let snapshot = match source.fetch_snapshot().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Snapshot fetch failed");
                    return;
                }
            };
            if snapshot.is_empty() {
                warn!(source = source.name(), "Empty snapshot, nothing to ingest");
                return;
            }

            match tokio::task::spawn_blocking(move || writer.append(&snapshot)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(error = %e, "Snapshot append failed"),
                Err(e) => error!(error = %e, "Ingest worker panicked"),
            }
        })
    })
}

/// Rollup then retention, on the blocking pool
pub fn maintenance_job(maintenance: Arc<Maintenance>) -> Job {
    Arc::new(move || -> JobFuture {
        let maintenance = maintenance.clone();
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || maintenance.run_cycle()).await {
                Ok(report) if !report.is_complete() => {
                    warn!("Maintenance cycle finished with failed steps")
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Maintenance worker panicked"),
            }
        })
    })
}
