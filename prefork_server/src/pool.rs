//! Worker-internal thread pool.
//!
//! A fixed set of threads drains a FIFO task queue. Scheduling is
//! cooperative: a thread holds the queue lock only to pop, then runs the
//! task unlocked. [`ThreadPool::stop`] refuses new tasks, wakes every
//! thread, and joins them; threads finish whatever was already queued
//! first, so no accepted task is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::trace;

/// A queued unit of work.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// `execute` was called after `stop`.
    #[error("thread pool is stopped")]
    Stopped,
}

struct PoolState {
    queue: VecDeque<Job>,
    stopping: bool,
}

/// Fixed-size cooperative thread pool.
pub struct ThreadPool {
    shared: Arc<(Mutex<PoolState>, Condvar)>,
    threads: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn `size` worker threads.
    pub fn new(size: usize) -> Self {
        let shared = Arc::new((
            Mutex::new(PoolState {
                queue: VecDeque::new(),
                stopping: false,
            }),
            Condvar::new(),
        ));

        let threads = (0..size)
            .map(|i| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("pool-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn pool thread")
            })
            .collect();

        Self { shared, threads }
    }

    /// Queue one task.
    ///
    /// Fails with [`PoolError::Stopped`] once `stop` has begun; the task
    /// is returned to the caller unexecuted via the error.
    pub fn execute<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let (lock, _) = &*self.shared;
            let mut state = lock.lock().unwrap();
            if state.stopping {
                return Err(PoolError::Stopped);
            }
            state.queue.push_back(Box::new(task));
        }
        let (_, cvar) = &*self.shared;
        cvar.notify_one();
        Ok(())
    }

    /// Number of pool threads.
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Signal shutdown and join every thread.
    ///
    /// Tasks already queued run to completion before this returns;
    /// nothing executes afterwards. Idempotent.
    pub fn stop(&mut self) {
        {
            let (lock, _) = &*self.shared;
            let mut state = lock.lock().unwrap();
            if state.stopping {
                return;
            }
            state.stopping = true;
        }
        let (_, cvar) = &*self.shared;
        cvar.notify_all();

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        trace!("thread pool drained");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &(Mutex<PoolState>, Condvar)) {
    let (lock, cvar) = shared;
    loop {
        let task = {
            let mut state = lock.lock().unwrap();
            while !state.stopping && state.queue.is_empty() {
                state = cvar.wait(state).unwrap();
            }
            if state.stopping && state.queue.is_empty() {
                return;
            }
            // Non-empty by the wait predicate.
            state.queue.pop_front().unwrap()
        };
        // Run outside the lock so other threads keep draining.
        task();
    }
}
