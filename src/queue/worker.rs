//! # Worker Pool
//!
//! Workers pull jobs from the shared [`JobReceivers`], always preferring the
//! `high` partition, run them under the job's timeout and apply the job's
//! retry policy. Retries and throttle releases go back through
//! [`JobQueue::push_after`].

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{JobReceivers, QueuedJob};
use crate::config::WorkerPoolConfig;
use crate::error::GatewayError;
use crate::jobs::{JobContext, JobOutcome};

/// What became of one try
#[derive(Debug)]
pub enum JobDisposition {
    Completed,
    Discarded(String),
    /// Throttled; run again after `delay` with the same attempt number
    Released { job: QueuedJob, delay: Duration },
    /// Failed with tries left; run again after `delay`
    Retry { job: QueuedJob, delay: Duration },
    /// Gave up; `on_final_failure` has run
    Failed(GatewayError),
}

/// Run one try of `queued` and decide what happens next
pub async fn process_job(ctx: &JobContext, mut queued: QueuedJob) -> JobDisposition {
    let policy = queued.job.policy(ctx);
    let attempt = queued.attempt;
    let name = queued.job.name();

    let result = match tokio::time::timeout(policy.timeout, queued.job.handle(ctx, attempt)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            operation: format!("{name} job"),
            seconds: policy.timeout.as_secs(),
        }),
    };

    match result {
        Ok(JobOutcome::Completed) => {
            debug!(job = name, attempt = attempt, "✅ Job completed");
            JobDisposition::Completed
        }
        Ok(JobOutcome::Discard(reason)) => {
            debug!(job = name, attempt = attempt, reason = %reason, "🗑️ Job discarded");
            JobDisposition::Discarded(reason)
        }
        Ok(JobOutcome::Release(delay)) => {
            debug!(
                job = name,
                attempt = attempt,
                delay_seconds = delay.as_secs(),
                "⏳ Job released"
            );
            JobDisposition::Released { job: queued, delay }
        }
        Err(error) => {
            queued.job.on_failure(ctx, attempt, &error).await;

            if queued.job.should_retry(&error) && policy.has_tries_left(attempt) {
                let delay = policy.backoff_for(attempt);
                warn!(
                    job = name,
                    attempt = attempt,
                    max_tries = policy.max_tries,
                    delay_seconds = delay.as_secs(),
                    error_kind = %error.kind(),
                    error = %error,
                    "🔁 Job failed - retrying"
                );
                queued.attempt += 1;
                JobDisposition::Retry { job: queued, delay }
            } else {
                error!(
                    job = name,
                    attempt = attempt,
                    error_kind = %error.kind(),
                    error = %error,
                    "❌ Job failed permanently"
                );
                queued.job.on_final_failure(ctx, attempt, &error).await;
                JobDisposition::Failed(error)
            }
        }
    }
}

/// Fixed-size pool of queue workers
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawn `config.worker_count` workers over `receivers`
    pub fn start(ctx: JobContext, receivers: JobReceivers, config: &WorkerPoolConfig) -> Self {
        let worker_count = config.worker_count.max(1);
        info!("🏊 WORKER_POOL: Starting {} workers", worker_count);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let receivers = Arc::new(Mutex::new(receivers));
        let handles = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    ctx.clone(),
                    receivers.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        Self {
            handles,
            shutdown,
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop taking new jobs and wait for in-flight ones; returns `false`
    /// when workers had to be aborted
    pub async fn shutdown(self) -> bool {
        info!("🛑 WORKER_POOL: Shutdown requested");
        let _ = self.shutdown.send(true);

        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(self.shutdown_timeout, join_all(self.handles)).await {
            Ok(_) => {
                info!("✅ WORKER_POOL: All workers stopped");
                true
            }
            Err(_) => {
                warn!(
                    "⚠️ WORKER_POOL: Workers still busy after {}s - aborting",
                    self.shutdown_timeout.as_secs()
                );
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

async fn next_job(
    receivers: &Mutex<JobReceivers>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<QueuedJob> {
    let mut rx = receivers.lock().await;
    let rx = &mut *rx;
    tokio::select! {
        biased;
        _ = shutdown.changed() => None,
        job = rx.high.recv() => job,
        job = rx.default.recv() => job,
        job = rx.low.recv() => job,
    }
}

async fn run_worker(
    worker_id: usize,
    ctx: JobContext,
    receivers: Arc<Mutex<JobReceivers>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("🏊 WORKER_POOL: Worker #{} started", worker_id);
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(queued) = next_job(&receivers, &mut shutdown).await else {
            break;
        };

        match process_job(&ctx, queued).await {
            JobDisposition::Released { job, delay } | JobDisposition::Retry { job, delay } => {
                ctx.queue.push_after(job, delay);
            }
            JobDisposition::Completed
            | JobDisposition::Discarded(_)
            | JobDisposition::Failed(_) => {}
        }
    }
    debug!("🏊 WORKER_POOL: Worker #{} stopped", worker_id);
}
