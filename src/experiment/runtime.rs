//! Fixed-size worker pool for scenario jobs.
//!
//! Jobs go through a bounded channel; results come back on an unbounded
//! one so that a worker never blocks on a coordinator that is still
//! submitting.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::debug;

use crate::error::{ExecutionError, NucleusError, NucleusResult};

pub(crate) struct WorkerPool<J, R> {
    name: &'static str,
    tx: Sender<J>,
    results: Receiver<R>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static, R: Send + 'static> WorkerPool<J, R> {
    /// Spawns `workers` named threads, each running `handler` on the jobs it
    /// receives.
    pub(crate) fn start<F>(name: &'static str, workers: usize, queue_capacity: usize, handler: F) -> NucleusResult<Self>
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        let workers = workers.max(1);
        let (tx, rx) = bounded::<J>(queue_capacity.max(1));
        let (result_tx, results) = unbounded::<R>();
        let handler = Arc::new(handler);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<J> = rx.clone();
            let result_tx = result_tx.clone();
            let handler = Arc::clone(&handler);
            let handle = thread::Builder::new()
                .name(format!("nucleus-{name}-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if result_tx.send(handler(job)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| NucleusError::internal(format!("failed to spawn {name} worker {idx}: {e}")))?;
            handles.push(handle);
        }
        debug!(pool = name, workers, "worker pool started");

        Ok(Self {
            name,
            tx,
            results,
            workers: handles,
        })
    }

    /// Queues a job, blocking while the queue is full.
    pub(crate) fn submit(&self, job: J) -> NucleusResult<()> {
        self.tx.send(job).map_err(|_| self.disconnected())
    }

    /// Waits for the next result.
    pub(crate) fn recv(&self) -> NucleusResult<R> {
        self.results.recv().map_err(|_| self.disconnected())
    }

    fn disconnected(&self) -> NucleusError {
        ExecutionError::Disconnected {
            path: self.name.to_string(),
        }
        .into()
    }

    /// Closes the queue and joins every worker. Queued jobs are still run.
    pub(crate) fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
        debug!(pool = self.name, "worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_job_yields_one_result() {
        let pool = WorkerPool::start("test", 3, 2, |n: u64| n * 2).unwrap();
        for n in 0..10 {
            pool.submit(n).unwrap();
        }
        let mut results: Vec<u64> = (0..10).map(|_| pool.recv().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, (0..10).map(|n| n * 2).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn test_workers_are_named() {
        let pool = WorkerPool::start("named", 1, 1, |(): ()| {
            thread::current().name().map(ToString::to_string)
        })
        .unwrap();
        pool.submit(()).unwrap();
        assert_eq!(pool.recv().unwrap().as_deref(), Some("nucleus-named-0"));
        pool.shutdown();
    }
}
