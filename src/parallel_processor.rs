use anyhow::{Result, anyhow};
use crossbeam::channel;
use indicatif::{ProgressBar, ProgressStyle};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::debug;

/// Fixed-size set of worker threads fed from a task queue.
///
/// Workers only exist for the duration of one [`WorkerPool::map`] /
/// [`WorkerPool::try_map`] call and are joined before it returns.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    progress: bool,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            progress: false,
        }
    }

    /// Show a progress bar while results are collected
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to every item, returning results in input order
    pub fn map<T, U, F>(&self, f: F, items: Vec<T>) -> Result<Vec<U>>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> U + Sync,
    {
        self.try_map(|item| Ok(f(item)), items)
    }

    /// Like [`WorkerPool::map`], but the first `Err` (or worker panic) fails the whole call
    pub fn try_map<T, U, F>(&self, f: F, items: Vec<T>) -> Result<Vec<U>>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> Result<U> + Sync,
    {
        let total = items.len();
        let (task_sender, task_receiver) = channel::unbounded::<(usize, T)>();
        let (result_sender, result_receiver) = channel::unbounded::<(usize, Result<U>)>();

        for task in items.into_iter().enumerate() {
            task_sender
                .send(task)
                .map_err(|_| anyhow!("task queue closed"))?;
        }
        drop(task_sender); // Close the queue

        let progress = self.progress_bar(total)?;
        let failed = AtomicBool::new(false);
        let f = &f;
        let failed_ref = &failed;

        debug!(workers = self.workers, tasks = total, "Starting worker pool");

        thread::scope(|scope| -> Result<Vec<U>> {
            let mut handles = Vec::with_capacity(self.workers);
            for worker_id in 0..self.workers {
                let tasks = task_receiver.clone();
                let results = result_sender.clone();
                let handle = thread::Builder::new()
                    .name(format!("apply-worker-{}", worker_id))
                    .spawn_scoped(scope, move || {
                        while let Ok((index, item)) = tasks.recv() {
                            if failed_ref.load(Ordering::SeqCst) {
                                break;
                            }
                            if results.send((index, f(item))).is_err() {
                                break;
                            }
                        }
                    });
                match handle {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        failed.store(true, Ordering::SeqCst);
                        return Err(anyhow!("Failed to spawn worker {}: {}", worker_id, e));
                    }
                }
            }
            drop(result_sender); // Only workers hold senders now

            let mut slots: Vec<Option<U>> = (0..total).map(|_| None).collect();
            let mut first_error: Option<anyhow::Error> = None;

            for (index, outcome) in result_receiver.iter() {
                match outcome {
                    Ok(value) => {
                        if let Some(slot) = slots.get_mut(index) {
                            *slot = Some(value);
                        }
                    }
                    Err(e) => {
                        failed.store(true, Ordering::SeqCst);
                        if first_error.is_none() {
                            first_error = Some(e.context(format!("task {} failed", index)));
                        }
                    }
                }
                progress.inc(1);
            }

            let mut panicked = Vec::new();
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(payload) = handle.join() {
                    panicked.push(format!("worker {}: {}", worker_id, panic_message(&*payload)));
                }
            }
            progress.finish_and_clear();

            if !panicked.is_empty() {
                return Err(anyhow!("worker panicked ({})", panicked.join("; ")));
            }
            if let Some(e) = first_error {
                return Err(e);
            }

            slots
                .into_iter()
                .collect::<Option<Vec<U>>>()
                .ok_or_else(|| anyhow!("worker pool lost results"))
        })
    }

    fn progress_bar(&self, total: usize) -> Result<ProgressBar> {
        if !self.progress {
            return Ok(ProgressBar::hidden());
        }
        let progress = ProgressBar::new(total as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {per_sec}")?
                .progress_chars("#>-"),
        );
        Ok(progress)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[test]
    fn test_map_preserves_order() {
        let pool = WorkerPool::new(4);
        let input: Vec<i64> = (0..10_000).collect();
        let output = pool.map(|x| x * 2, input.clone()).expect("map failed");
        let expected: Vec<i64> = input.iter().map(|x| x * 2).collect();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_map_empty_input() {
        let pool = WorkerPool::new(3);
        let output: Vec<i64> = pool.map(|x: i64| x + 1, Vec::new()).expect("map failed");
        assert!(output.is_empty());
    }

    #[test]
    fn test_more_workers_than_items() {
        let pool = WorkerPool::new(16);
        let output = pool.map(|x: i64| x + 1, vec![1, 2, 3]).expect("map failed");
        assert_eq!(output, vec![2, 3, 4]);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.workers(), 1);
        let output = pool.map(|x: i64| x - 1, vec![5, 6]).expect("map failed");
        assert_eq!(output, vec![4, 5]);
    }

    #[test]
    fn test_borrowed_state_in_function() {
        let offset = 100_i64;
        let pool = WorkerPool::new(2);
        let output = pool.map(|x: i64| x + offset, vec![1, 2]).expect("map failed");
        assert_eq!(output, vec![101, 102]);
    }

    #[test]
    fn test_try_map_propagates_error() {
        let pool = WorkerPool::new(4);
        let result = pool.try_map(
            |x: i64| {
                if x == 500 {
                    bail!("bad value {}", x);
                }
                Ok(x)
            },
            (0..1000).collect(),
        );
        let err = result.expect_err("error should propagate");
        assert!(format!("{:#}", err).contains("bad value 500"));
    }

    #[test]
    fn test_worker_panic_propagates() {
        let pool = WorkerPool::new(2);
        let result = pool.map(
            |x: i64| {
                if x == 3 {
                    panic!("boom on {}", x);
                }
                x
            },
            (0..10).collect(),
        );
        let err = result.expect_err("panic should propagate");
        assert!(err.to_string().contains("boom on 3"));
    }

    #[test]
    fn test_map_matches_sequential() {
        let column: Vec<i64> = (0..2_500).map(|x| x * 3 - 7).collect();
        let parallel = WorkerPool::new(3)
            .map(|x: i64| x * x, column.clone())
            .expect("map failed");
        let sequential: Vec<i64> = column.iter().map(|x| x * x).collect();
        assert_eq!(parallel, sequential);
    }
}
