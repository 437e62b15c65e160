//! Blocking worker pool
//!
//! Replication tasks block on log reads and channel sends, so they run
//! on dedicated OS threads fed from a job queue. Dropping the pool
//! closes the queue and joins the workers; queued jobs still run.

use crossbeam::channel::{unbounded, Sender};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of blocking worker threads.
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// `name_format` names the threads, with `{}` replaced by an index.
    pub fn new(threads: usize, name_format: &str) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let handles = (0..threads.max(1))
            .map(|index| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(name_format.replace("{}", &index.to_string()))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            tx: Some(tx),
            handles,
        }
    }

    /// Queue a job. Jobs submitted after shutdown are dropped.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Box::new(job));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run() {
        let pool = WorkerPool::new(2, "test-worker-{}");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_workers_are_named() {
        let pool = WorkerPool::new(1, "named-{}");
        let (tx, rx) = unbounded();
        pool.submit(move || {
            let _ = tx.send(std::thread::current().name().map(String::from));
        });
        assert_eq!(rx.recv().unwrap().as_deref(), Some("named-0"));
    }
}
