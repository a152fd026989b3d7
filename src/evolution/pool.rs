//! Bounded fan-out/fan-in over a dedicated rayon pool.
//!
//! Every submitted task yields exactly one [`TaskOutcome`], success or error,
//! delivered in completion order. A panicking task is reported as
//! [`TaskError::Panicked`] and does not disturb its siblings.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

use rayon::{ThreadPool, ThreadPoolBuilder};

use super::error::TaskError;

/// Result of one task, tagged with its submission index.
#[derive(Debug)]
pub struct TaskOutcome<R> {
    pub index: usize,
    pub result: Result<R, TaskError>,
}

/// Fixed-size worker pool.
pub struct WorkerPool {
    name: String,
    pool: ThreadPool,
}

impl WorkerPool {
    /// Create a pool with `workers` threads.
    pub fn new(name: &str, workers: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let thread_prefix = name.to_string();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(move |i| format!("{thread_prefix}-{i}"))
            .build()?;
        Ok(Self {
            name: name.to_string(),
            pool,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `task` on every input and hand each outcome to `on_complete` on
    /// the calling thread as soon as it finishes.
    ///
    /// Returns once every task has completed or failed.
    pub fn for_each_completed<T, R, F, C>(&self, inputs: Vec<T>, task: F, mut on_complete: C)
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> Result<R, TaskError> + Sync,
        C: FnMut(TaskOutcome<R>),
    {
        if inputs.is_empty() {
            return;
        }

        let (tx, rx) = mpsc::channel();
        let task = &task;
        let pool = &self.pool;

        thread::scope(|s| {
            s.spawn(move || {
                pool.scope(move |scope| {
                    for (index, input) in inputs.into_iter().enumerate() {
                        let tx = tx.clone();
                        scope.spawn(move |_| {
                            let result = panic::catch_unwind(AssertUnwindSafe(|| task(index, input)))
                                .unwrap_or_else(|payload| {
                                    Err(TaskError::Panicked(panic_message(payload.as_ref())))
                                });
                            // Receiver outlives the pool scope.
                            let _ = tx.send(TaskOutcome { index, result });
                        });
                    }
                });
            });

            for outcome in rx {
                on_complete(outcome);
            }
        });
    }

    /// Run every task and collect outcomes in completion order.
    pub fn run_all<T, R, F>(&self, inputs: Vec<T>, task: F) -> Vec<TaskOutcome<R>>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> Result<R, TaskError> + Sync,
    {
        let mut outcomes = Vec::with_capacity(inputs.len());
        self.for_each_completed(inputs, task, |outcome| outcomes.push(outcome));
        outcomes
    }
}

/// Split outcomes into successes and failures, keeping arrival order.
pub fn partition<R>(outcomes: Vec<TaskOutcome<R>>) -> (Vec<(usize, R)>, Vec<(usize, TaskError)>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for TaskOutcome { index, result } in outcomes {
        match result {
            Ok(value) => ok.push((index, value)),
            Err(err) => failed.push((index, err)),
        }
    }
    (ok, failed)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
