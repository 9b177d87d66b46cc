//! Periodic dispatch scheduler.
//!
//! Owns the cadence of batch processing: an immediate cycle on start, then
//! one per interval tick until stopped. Each cycle fans out `batch_size`
//! unit-of-work tokens to `worker_count` workers over a bounded channel;
//! every worker claims a batch of one so independent workers never compete
//! for the same lock range and failure isolation is exact. The trade is
//! deliberate: more store round-trips per cycle, simpler concurrency.
//!
//! ```text
//!  tick ──▶ producer ──(jobs, cap = batch_size)──▶ worker 0..n
//!                                                     │ process_pending_messages(1)
//!          aggregator ◀─(results, cap = batch_size)───┘
//! ```

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_core::{error::Result, time::Clock};

use crate::service::MessageService;

/// Upper bound on a single processing cycle.
const MAX_CYCLE_DURATION: Duration = Duration::from_secs(5 * 60);

/// Scheduler cadence and fan-out configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Unit-of-work tokens fed to the workers each cycle.
    pub batch_size: usize,
    /// Delay between cycles.
    pub interval: Duration,
    /// Concurrent workers per cycle.
    pub worker_count: usize,
}

/// Point-in-time snapshot of scheduler state and counters.
///
/// `last_run_at` is updated under a separate lock from the counters, so it
/// may be slightly newer than the totals it is read with.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Whether the scheduler is currently running.
    pub is_running: bool,
    /// When the most recent cycle started.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Work tokens that produced an outcome, success or failure.
    pub total_processed: u64,
    /// Work tokens whose batch completed without error.
    pub total_successful: u64,
    /// Work tokens whose batch failed.
    pub total_failed: u64,
}

struct Lifecycle {
    is_running: bool,
    last_run_at: Option<DateTime<Utc>>,
}

struct RunHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives processing cycles; shared between the public handle and the
/// spawned run loop.
struct CycleRunner {
    service: Arc<MessageService>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    lifecycle: RwLock<Lifecycle>,
    total_processed: AtomicU64,
    total_successful: AtomicU64,
    total_failed: AtomicU64,
}

impl CycleRunner {
    async fn run(self: Arc<Self>, stop: CancellationToken) {
        self.run_cycle(&stop).await;

        loop {
            tokio::select! {
                () = stop.cancelled() => {
                    info!("scheduler stop signal received");
                    break;
                }
                () = self.clock.sleep(self.config.interval) => {
                    self.run_cycle(&stop).await;
                }
            }
        }
    }

    /// Executes one processing cycle: fan out, deliver, aggregate.
    async fn run_cycle(&self, stop: &CancellationToken) {
        self.lifecycle.write().await.last_run_at = Some(self.clock.now_utc());

        info!("starting message processing cycle");

        let cycle = stop.child_token();
        let capacity = self.config.batch_size.max(1);
        let (job_tx, job_rx) = mpsc::channel::<()>(capacity);
        let (result_tx, mut result_rx) = mpsc::channel::<bool>(capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut workers = Vec::with_capacity(self.config.worker_count);
        for worker_id in 0..self.config.worker_count {
            let service = self.service.clone();
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cycle = cycle.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        tokio::select! {
                            () = cycle.cancelled() => None,
                            job = rx.recv() => job,
                        }
                    };

                    if job.is_none() {
                        break;
                    }

                    let ok = match service.process_pending_messages(&cycle, 1).await {
                        Ok(_) => true,
                        Err(batch_error) => {
                            error!(worker_id, error = %batch_error, "batch processing failed");
                            false
                        },
                    };

                    if result_tx.send(ok).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let batch_size = self.config.batch_size;
        let producer_cycle = cycle.clone();
        let producer = tokio::spawn(async move {
            for _ in 0..batch_size {
                tokio::select! {
                    () = producer_cycle.cancelled() => return,
                    result = job_tx.send(()) => {
                        if result.is_err() {
                            return;
                        }
                    }
                }
            }
            // job_tx drops here, closing the channel.
        });

        let mut successful: u64 = 0;
        let mut failed: u64 = 0;

        let deadline = tokio::time::timeout(MAX_CYCLE_DURATION, async {
            while let Some(ok) = result_rx.recv().await {
                if ok {
                    successful += 1;
                } else {
                    failed += 1;
                }
            }
        })
        .await;

        if deadline.is_err() {
            warn!("processing cycle deadline exceeded, cancelling in-flight work");
            cycle.cancel();
            while let Some(ok) = result_rx.recv().await {
                if ok {
                    successful += 1;
                } else {
                    failed += 1;
                }
            }
        }

        let _ = producer.await;
        for (worker_id, worker) in workers.into_iter().enumerate() {
            if let Err(join_error) = worker.await {
                if join_error.is_panic() {
                    // A panicking worker's in-flight token is an outcome too.
                    error!(worker_id, "worker panicked during processing cycle");
                    failed += 1;
                }
            }
        }

        let processed = successful + failed;
        self.total_successful.fetch_add(successful, Ordering::Relaxed);
        self.total_failed.fetch_add(failed, Ordering::Relaxed);
        self.total_processed.fetch_add(processed, Ordering::Relaxed);

        info!(processed, successful, failed, "message processing cycle completed");
    }
}

/// The scheduler: a process-wide lifecycle around [`CycleRunner`].
///
/// Exactly one is created at boot and shared with the HTTP handlers;
/// counters are atomics, lifecycle flags live behind a read/write lock.
pub struct Scheduler {
    runner: Arc<CycleRunner>,
    run: Mutex<Option<RunHandle>>,
}

impl Scheduler {
    /// Creates a stopped scheduler.
    pub fn new(service: Arc<MessageService>, config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner: Arc::new(CycleRunner {
                service,
                config,
                clock,
                lifecycle: RwLock::new(Lifecycle { is_running: false, last_run_at: None }),
                total_processed: AtomicU64::new(0),
                total_successful: AtomicU64::new(0),
                total_failed: AtomicU64::new(0),
            }),
            run: Mutex::new(None),
        }
    }

    /// Starts the scheduler, running the first cycle immediately.
    ///
    /// Calling `start` on a running scheduler is a no-op that logs a
    /// warning and returns success.
    pub async fn start(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            warn!("scheduler is already running");
            return Ok(());
        }

        info!(
            batch_size = self.runner.config.batch_size,
            interval_seconds = self.runner.config.interval.as_secs(),
            worker_count = self.runner.config.worker_count,
            "starting message scheduler"
        );

        self.runner.lifecycle.write().await.is_running = true;

        let token = CancellationToken::new();
        let handle = tokio::spawn(self.runner.clone().run(token.clone()));
        *run = Some(RunHandle { token, handle });

        Ok(())
    }

    /// Stops the scheduler, waiting for the in-flight cycle to drain.
    ///
    /// Outstanding batch transactions commit or roll back before this
    /// returns. Calling `stop` on a stopped scheduler is a no-op that logs
    /// a warning and returns success.
    pub async fn stop(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        let Some(RunHandle { token, handle }) = run.take() else {
            warn!("scheduler is not running");
            return Ok(());
        };

        info!("stopping message scheduler");

        token.cancel();
        if let Err(join_error) = handle.await {
            if join_error.is_panic() {
                error!("scheduler run loop panicked");
            }
        }

        self.runner.lifecycle.write().await.is_running = false;

        info!("message scheduler stopped");
        Ok(())
    }

    /// Whether the scheduler is currently running.
    pub async fn is_running(&self) -> bool {
        self.runner.lifecycle.read().await.is_running
    }

    /// Snapshot of lifecycle state and running counters.
    pub async fn stats(&self) -> SchedulerStats {
        let lifecycle = self.runner.lifecycle.read().await;
        SchedulerStats {
            is_running: lifecycle.is_running,
            last_run_at: lifecycle.last_run_at,
            total_processed: self.runner.total_processed.load(Ordering::Relaxed),
            total_successful: self.runner.total_successful.load(Ordering::Relaxed),
            total_failed: self.runner.total_failed.load(Ordering::Relaxed),
        }
    }
}
