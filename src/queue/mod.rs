//! # Job Queue
//!
//! In-process, priority-partitioned job queue. Each partition (`high`,
//! `default`, `low`) is a bounded tokio channel; workers always drain a
//! higher partition before looking at a lower one. Delayed pushes (retry
//! backoff, throttle releases) are parked on a timer task and re-enter their
//! partition when it fires.

pub mod worker;

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::jobs::Job;
use crate::models::QueuePriority;

pub use worker::{process_job, JobDisposition, WorkerPool};

/// A job plus its scheduling state
pub struct QueuedJob {
    pub job: Box<dyn Job>,
    /// 1-based number of the next try
    pub attempt: u32,
    pub priority: QueuePriority,
    pub enqueued_at: DateTime<Utc>,
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("job", &self.job.name())
            .field("attempt", &self.attempt)
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

impl QueuedJob {
    pub fn new(job: Box<dyn Job>, priority: QueuePriority) -> Self {
        Self {
            job,
            attempt: 1,
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

/// Receiving halves consumed by the worker pool
#[derive(Debug)]
pub struct JobReceivers {
    pub(crate) high: mpsc::Receiver<QueuedJob>,
    pub(crate) default: mpsc::Receiver<QueuedJob>,
    pub(crate) low: mpsc::Receiver<QueuedJob>,
}

impl JobReceivers {
    /// Next job without waiting, highest partition first
    pub fn try_next(&mut self) -> Option<QueuedJob> {
        self.high
            .try_recv()
            .or_else(|_| self.default.try_recv())
            .or_else(|_| self.low.try_recv())
            .ok()
    }
}

/// Cloneable sending handle
#[derive(Debug, Clone)]
pub struct JobQueue {
    high: mpsc::Sender<QueuedJob>,
    default: mpsc::Sender<QueuedJob>,
    low: mpsc::Sender<QueuedJob>,
}

impl JobQueue {
    /// Create a queue whose partitions each hold `capacity` jobs
    pub fn new(capacity: usize) -> (Self, JobReceivers) {
        let capacity = capacity.max(1);
        let (high_tx, high_rx) = mpsc::channel(capacity);
        let (default_tx, default_rx) = mpsc::channel(capacity);
        let (low_tx, low_rx) = mpsc::channel(capacity);
        (
            Self {
                high: high_tx,
                default: default_tx,
                low: low_tx,
            },
            JobReceivers {
                high: high_rx,
                default: default_rx,
                low: low_rx,
            },
        )
    }

    fn sender(&self, priority: QueuePriority) -> &mpsc::Sender<QueuedJob> {
        match priority {
            QueuePriority::High => &self.high,
            QueuePriority::Default => &self.default,
            QueuePriority::Low => &self.low,
        }
    }

    /// Enqueue a fresh job
    pub async fn push(&self, job: Box<dyn Job>, priority: QueuePriority) -> bool {
        self.requeue(QueuedJob::new(job, priority)).await
    }

    /// Put a job (fresh or retried) back on its partition; `false` once the
    /// queue has shut down
    pub async fn requeue(&self, queued: QueuedJob) -> bool {
        let name = queued.job.name();
        let priority = queued.priority;
        match self.sender(priority).send(queued).await {
            Ok(()) => {
                debug!(job = name, priority = priority.as_str(), "📥 Job enqueued");
                true
            }
            Err(_) => {
                warn!(job = name, "Job queue closed - dropping job");
                false
            }
        }
    }

    /// Enqueue without waiting for capacity. When the partition is full the
    /// job is parked on a background task until room frees up, so a worker
    /// never blocks on the queue it drains. `false` once the queue has shut
    /// down.
    pub fn push_nowait(&self, job: Box<dyn Job>, priority: QueuePriority) -> bool {
        self.offer(QueuedJob::new(job, priority))
    }

    fn offer(&self, queued: QueuedJob) -> bool {
        let name = queued.job.name();
        let priority = queued.priority;
        match self.sender(priority).try_send(queued) {
            Ok(()) => {
                debug!(job = name, priority = priority.as_str(), "📥 Job enqueued");
                true
            }
            Err(TrySendError::Full(queued)) => {
                debug!(
                    job = name,
                    priority = priority.as_str(),
                    "Partition full - deferring enqueue"
                );
                self.push_after(queued, Duration::ZERO);
                true
            }
            Err(TrySendError::Closed(_)) => {
                warn!(job = name, "Job queue closed - dropping job");
                false
            }
        }
    }

    /// Re-enqueue `queued` after `delay`
    pub fn push_after(&self, queued: QueuedJob, delay: Duration) {
        let queue = self.clone();
        debug!(
            job = queued.job.name(),
            attempt = queued.attempt,
            delay_seconds = delay.as_secs(),
            "⏲️ Job scheduled"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.requeue(queued).await;
        });
    }
}
