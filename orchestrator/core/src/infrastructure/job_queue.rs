// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Background Job Queue
//!
//! Bounded in-process queue for fire-and-forget side effects. A single
//! worker drains the queue in order and logs failures. Nothing a job does is
//! ever reported back to the producer.
//!
//! Two admission modes:
//! - [`JobQueue::enqueue`] never waits and drops the job when the queue is
//!   full. For best-effort work.
//! - [`JobQueue::submit`] waits for room and only fails once the worker has
//!   shut down. For work whose loss would leave state unsettled.
//!
//! On shutdown the worker stops admitting jobs and drains what is buffered.

use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub trait Job: Debug + Send + 'static {
    /// Stable name used in logs and metric labels.
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait JobHandler<J: Job>: Send + Sync + 'static {
    type Error: Display + Send;

    async fn handle(&self, job: J) -> Result<(), Self::Error>;
}

/// Producer side of the queue. Cheap to clone.
pub struct JobQueue<J: Job> {
    sender: mpsc::Sender<J>,
}

impl<J: Job> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<J: Job> JobQueue<J> {
    /// Create a queue and the worker that drains it.
    pub fn new<H: JobHandler<J>>(capacity: usize, handler: Arc<H>) -> (Self, JobWorker<J, H>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, JobWorker { receiver, handler })
    }

    /// Queue a job. Never waits: a full or closed queue drops the job with
    /// an error log. Returns whether the job was accepted.
    pub fn enqueue(&self, job: J) -> bool {
        let name = job.name();
        match self.sender.try_send(job) {
            Ok(()) => {
                debug!(job = name, "Job enqueued");
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                error!(job = name, ?job, "Job queue full, dropping job");
                metrics::counter!("conductor_cascade_jobs_total", "job" => name, "outcome" => "dropped").increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(job = name, ?job, "Job queue closed, dropping job");
                metrics::counter!("conductor_cascade_jobs_total", "job" => name, "outcome" => "dropped").increment(1);
                false
            }
        }
    }

    /// Queue a job, waiting for room when the queue is full. Only the wait
    /// for admission is awaited, not the job. Fails once the worker has shut
    /// down.
    pub async fn submit(&self, job: J) -> bool {
        let name = job.name();
        match self.sender.send(job).await {
            Ok(()) => {
                debug!(job = name, "Job submitted");
                true
            }
            Err(mpsc::error::SendError(job)) => {
                error!(job = name, ?job, "Job queue closed, job not submitted");
                metrics::counter!("conductor_cascade_jobs_total", "job" => name, "outcome" => "dropped").increment(1);
                false
            }
        }
    }
}

/// Consumer side of the queue.
pub struct JobWorker<J: Job, H: JobHandler<J>> {
    receiver: mpsc::Receiver<J>,
    handler: Arc<H>,
}

impl<J: Job, H: JobHandler<J>> JobWorker<J, H> {
    async fn process(&self, job: J) {
        let name = job.name();
        match self.handler.handle(job).await {
            Ok(()) => {
                metrics::counter!("conductor_cascade_jobs_total", "job" => name, "outcome" => "ok").increment(1);
            }
            Err(e) => {
                error!(job = name, error = %e, "Background job failed");
                metrics::counter!("conductor_cascade_jobs_total", "job" => name, "outcome" => "error").increment(1);
            }
        }
    }

    /// Process everything currently queued, including jobs enqueued while
    /// draining. Returns the number of jobs processed.
    pub async fn run_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(job) = self.receiver.try_recv() {
            self.process(job).await;
            processed += 1;
        }
        processed
    }

    /// Stop admitting jobs and process everything already buffered.
    pub async fn drain(&mut self) -> usize {
        self.receiver.close();
        let mut processed = 0;
        while let Some(job) = self.receiver.recv().await {
            self.process(job).await;
            processed += 1;
        }
        processed
    }

    /// Spawn the worker loop. On cancellation it drains the buffered jobs
    /// before exiting; it also exits once every producer is dropped.
    pub fn start(mut self, shutdown: CancellationToken) -> JoinHandle<()> {
        info!("Starting background job worker");
        tokio::spawn(async move {
            let mut processed = 0u64;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let drained = self.drain().await;
                        info!(processed, drained, "Job worker shutting down");
                        break;
                    }
                    next = self.receiver.recv() => match next {
                        Some(job) => {
                            self.process(job).await;
                            processed += 1;
                        }
                        None => {
                            info!(processed, "Job queue closed, worker exiting");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct Echo(u32);

    impl Job for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl JobHandler<Echo> for Recorder {
        type Error = String;

        async fn handle(&self, job: Echo) -> Result<(), String> {
            self.seen.lock().push(job.0);
            if job.0 == 2 {
                return Err("boom".into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_worker() {
        let handler = Arc::new(Recorder::default());
        let (queue, mut worker) = JobQueue::new(8, handler.clone());
        for i in 1..=3 {
            assert!(queue.enqueue(Echo(i)));
        }
        assert_eq!(worker.run_pending().await, 3);
        assert_eq!(*handler.seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let handler = Arc::new(Recorder::default());
        let (queue, _worker) = JobQueue::new(1, handler);
        assert!(queue.enqueue(Echo(1)));
        assert!(!queue.enqueue(Echo(3)));
    }

    #[tokio::test]
    async fn test_submit_waits_for_room_instead_of_dropping() {
        let handler = Arc::new(Recorder::default());
        let (queue, mut worker) = JobQueue::new(1, handler.clone());
        assert!(queue.enqueue(Echo(1)));

        let waiting = tokio::spawn({
            let queue = queue.clone();
            async move { queue.submit(Echo(3)).await }
        });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        worker.run_pending().await;
        assert!(waiting.await.unwrap());
        worker.run_pending().await;
        assert_eq!(*handler.seen.lock(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_submit_fails_after_shutdown() {
        let handler = Arc::new(Recorder::default());
        let (queue, mut worker) = JobQueue::new(4, handler.clone());
        assert_eq!(worker.drain().await, 0);
        assert!(!queue.submit(Echo(1)).await);
        assert!(!queue.enqueue(Echo(1)));
        assert!(handler.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffered_jobs() {
        let handler = Arc::new(Recorder::default());
        let (queue, worker) = JobQueue::new(8, handler.clone());
        for i in [4, 5, 6] {
            assert!(queue.enqueue(Echo(i)));
        }
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        worker.start(shutdown).await.unwrap();
        assert_eq!(*handler.seen.lock(), vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn test_spawned_worker_stops_on_cancel() {
        let handler = Arc::new(Recorder::default());
        let (queue, worker) = JobQueue::new(8, handler.clone());
        let shutdown = CancellationToken::new();
        let handle = worker.start(shutdown.clone());
        queue.enqueue(Echo(7));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(*handler.seen.lock(), vec![7]);
    }
}
