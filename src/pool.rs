//! Bounded worker pool.
//!
//! A fixed set of OS threads drains a shared task queue; submitters get the
//! task's result back through a promise-style [`TaskHandle`].  Workers
//! never block inside tasks — the only suspension points are the queue
//! receive and the in-flight condition variable behind [`WorkerPool::wait`].
//!
//! Pool size 0 resolves to the hardware thread count, with a fallback of 4
//! when that cannot be determined.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Resolve a requested thread count: 0 means hardware concurrency.
pub fn resolve_threads(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    match num_cpus::get() {
        0 => 4,
        n => n,
    }
}

struct Inflight {
    count: usize,
}

pub struct WorkerPool {
    job_tx:   Option<Sender<Job>>,
    workers:  Vec<JoinHandle<()>>,
    inflight: Arc<(Mutex<Inflight>, Condvar)>,
    size:     usize,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Self {
        let size = resolve_threads(num_threads);
        let (job_tx, job_rx) = unbounded::<Job>();
        let inflight = Arc::new((Mutex::new(Inflight { count: 0 }), Condvar::new()));

        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let rx: Receiver<Job> = job_rx.clone();
            let inflight = Arc::clone(&inflight);
            workers.push(std::thread::spawn(move || {
                // The loop ends when every sender is dropped and the queue
                // has drained.
                while let Ok(job) = rx.recv() {
                    job();
                    let (lock, cvar) = &*inflight;
                    let mut state = lock.lock().unwrap();
                    state.count -= 1;
                    if state.count == 0 {
                        cvar.notify_all();
                    }
                }
            }));
        }

        Self {
            job_tx: Some(job_tx),
            workers,
            inflight,
            size,
        }
    }

    /// Number of worker threads.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Fire-and-forget submission.
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let (lock, _) = &*self.inflight;
            lock.lock().unwrap().count += 1;
        }
        self.job_tx
            .as_ref()
            .expect("pool already shut down")
            .send(Box::new(f))
            .expect("worker threads terminated");
    }

    /// Submit a task and receive its result through a promise handle.
    pub fn submit_task<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.submit(move || {
            // A receiver dropped early is fine; the send just discards.
            let _ = tx.send(f());
        });
        TaskHandle { rx }
    }

    /// Block until every submitted job has finished.  The pool stays usable
    /// afterwards.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inflight;
        let mut state = lock.lock().unwrap();
        while state.count > 0 {
            state = cvar.wait(state).unwrap();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue lets workers drain and exit.
        self.job_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Promise handle for a submitted task.
pub struct TaskHandle<T> {
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task's result arrives.  `None` if the worker died
    /// before producing one.
    pub fn join(self) -> Option<T> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_resolves_to_hardware_concurrency() {
        assert!(resolve_threads(0) >= 1);
        assert_eq!(resolve_threads(3), 3);
    }

    #[test]
    fn all_submitted_jobs_run() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn task_handles_return_results_in_submission_order() {
        let pool = WorkerPool::new(4);
        let handles: Vec<_> = (0..32)
            .map(|i| pool.submit_task(move || i * i))
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, (0..32).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn pool_survives_repeated_waits() {
        let pool = WorkerPool::new(2);
        for round in 0..3 {
            let handle = pool.submit_task(move || round + 1);
            pool.wait();
            assert_eq!(handle.join(), Some(round + 1));
        }
    }
}
