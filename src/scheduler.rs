use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::IncidentSource;
use crate::error::CycleError;
use crate::identities::{self, ReconcileReport};
use crate::ingest::{IngestPipeline, IngestReport};
use crate::report;
use crate::snapshot;
use crate::store::Store;

static STARTED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error)]
#[error("the sync scheduler is already running in this process")]
pub struct AlreadyStarted;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub identities: Option<ReconcileReport>,
    pub ingest: IngestReport,
    pub snapshot_employees: usize,
}

pub struct SyncCycle {
    source: Arc<dyn IncidentSource>,
    store: Arc<dyn Store>,
    pipeline: IngestPipeline,
    snapshot_path: PathBuf,
}

impl SyncCycle {
    pub fn new(
        source: Arc<dyn IncidentSource>,
        store: Arc<dyn Store>,
        pipeline: IngestPipeline,
        snapshot_path: PathBuf,
    ) -> Self {
        Self {
            source,
            store,
            pipeline,
            snapshot_path,
        }
    }

    pub async fn run_once(&self) -> Result<CycleReport, CycleError> {
        info!("fetching employee identities");
        let identities = match self.source.identities().await {
            Ok(mapping) => Some(identities::reconcile_mapping(self.store.as_ref(), &mapping).await),
            Err(err) => {
                warn!(error = %err, "identity fetch failed, keeping stored employees");
                None
            }
        };

        info!("fetching incidents");
        let ingest = self
            .pipeline
            .run(self.source.as_ref(), self.store.as_ref())
            .await?;

        let snapshot = report::build_snapshot(self.store.as_ref()).await?;
        snapshot::publish(&self.snapshot_path, &snapshot).await?;

        Ok(CycleReport {
            identities,
            ingest,
            snapshot_employees: snapshot.len(),
        })
    }
}

pub struct Scheduler {
    cycle: Arc<SyncCycle>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(cycle: SyncCycle, interval: Duration) -> Self {
        Self {
            cycle: Arc::new(cycle),
            interval,
        }
    }

    /// Starts the loop on its own task. Only one loop may be started per process.
    pub fn spawn(
        self,
        ready: watch::Receiver<bool>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, AlreadyStarted> {
        if STARTED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AlreadyStarted);
        }
        Ok(tokio::spawn(self.run(ready, shutdown)))
    }

    async fn run(self, mut ready: watch::Receiver<bool>, mut shutdown: watch::Receiver<bool>) {
        let became_ready = ready.wait_for(|ready| *ready).await.is_ok();
        if !became_ready {
            warn!("service shut down before becoming ready, scheduler not started");
            return;
        }
        info!(interval_secs = self.interval.as_secs(), "scheduler running");

        loop {
            let stop = *shutdown.borrow();
            if stop {
                break;
            }

            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!("scheduler stopped");
    }

    async fn run_cycle(&self) {
        let started = Instant::now();
        let cycle = Arc::clone(&self.cycle);

        // A panic inside the cycle only ends that cycle's task.
        match tokio::spawn(async move { cycle.run_once().await }).await {
            Ok(Ok(report)) => info!(
                stored = report.ingest.stored(),
                dropped = report.ingest.dropped(),
                failed_types = report.ingest.failed_types().len(),
                employees = report.snapshot_employees,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "sync cycle finished"
            ),
            Ok(Err(err)) => error!(error = %err, "sync cycle failed"),
            Err(err) => error!(error = %err, "sync cycle aborted"),
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        // Nobody can request shutdown any more.
        std::future::pending::<()>().await;
    }
}
