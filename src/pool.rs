use crossbeam::channel::{bounded, Receiver};
use crossbeam::queue::SegQueue;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::error;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool over a lock-free task queue.
///
/// Workers loop on try-dequeue, run each task with panics caught and
/// logged, and exit once the stop flag is set and the queue is drained.
pub struct ThreadPool {
    workers: Vec<JoinHandle<()>>,
    tasks: Arc<SegQueue<Task>>,
    stop: Arc<AtomicBool>,
}

/// Completion handle for a submitted task.
pub struct TaskHandle<T> {
    result: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes. Returns `None` if the task panicked.
    pub fn wait(self) -> Option<T> {
        self.result.recv().ok()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

impl ThreadPool {
    pub fn new(threads: usize) -> Self {
        let tasks: Arc<SegQueue<Task>> = Arc::new(SegQueue::new());
        let stop = Arc::new(AtomicBool::new(false));

        let workers = (0..threads.max(1))
            .map(|_| {
                let tasks = Arc::clone(&tasks);
                let stop = Arc::clone(&stop);
                thread::spawn(move || loop {
                    if let Some(task) = tasks.pop() {
                        if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                            error!(message = panic_message(&*panic), "pool task panicked");
                        }
                    } else if stop.load(Ordering::Acquire) {
                        return;
                    } else {
                        thread::yield_now();
                    }
                })
            })
            .collect();

        Self { workers, tasks, stop }
    }

    /// Submit a task and obtain its completion handle.
    ///
    /// # Panics
    ///
    /// Panics if the pool has been stopped; submitting then is a
    /// programmer error.
    pub fn submit<T, F>(&self, func: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        assert!(
            !self.stop.load(Ordering::Acquire),
            "submit on stopped ThreadPool"
        );
        let (tx, rx) = bounded(1);
        self.tasks.push(Box::new(move || {
            let _ = tx.send(func());
        }));
        TaskHandle { result: rx }
    }

    /// Signal workers to exit once the queue drains.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tasks_produce_results_through_handles() {
        let pool = ThreadPool::new(4);
        let handles: Vec<_> = (0..32u64).map(|i| pool.submit(move || i * i)).collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        let expected: Vec<_> = (0..32u64).map(|i| i * i).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn all_submitted_tasks_run() {
        let pool = ThreadPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..100)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();
        for handle in handles {
            handle.wait();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn panicking_task_yields_none_and_pool_survives() {
        let pool = ThreadPool::new(1);
        let bad = pool.submit(|| -> u32 { panic!("boom") });
        assert_eq!(bad.wait(), None);

        let good = pool.submit(|| 7u32);
        assert_eq!(good.wait(), Some(7));
    }

    #[test]
    #[should_panic(expected = "submit on stopped ThreadPool")]
    fn submit_after_stop_panics() {
        let pool = ThreadPool::new(1);
        pool.stop();
        let _ = pool.submit(|| ());
    }

    #[test]
    fn drop_joins_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(2);
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                // Handles are dropped; the tasks must still run before drop returns.
                let _ = pool.submit(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
        }
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }
}
