//! Mock dispatcher for testing
//!
//! Evaluates every point as `[point[0] * 2; n_output]` without touching the
//! filesystem, and records how it was driven so tests can check the
//! coordinator's side of the contract.
//!
//! # Features
//!
//! - Counts `exec_sample` and `stop` calls
//! - Can fail with a [`MockFailure`] (recoverable with `downcast_ref`)
//! - Can block until the run is cancelled or stopped
//! - Can emit log entries into the run's sink before evaluating
//! - Can panic mid-run
//!
//! # Example
//!
//! ```
//! use distfunc::dispatch::mock::MockDispatcher;
//!
//! let mock = MockDispatcher::new();
//! mock.set_fail_with("host unreachable");
//! assert_eq!(mock.exec_calls(), 0);
//! ```

use super::{DispatchRequest, Dispatcher};
use crate::logs::LogEntry;
use crate::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Error raised by a failing [`MockDispatcher`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("mock dispatcher failure: {0}")]
pub struct MockFailure(pub String);

#[derive(Default)]
struct MockState {
    exec_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    stopped: AtomicBool,
    block_until_stopped: AtomicBool,
    panic: AtomicBool,
    fail_with: Mutex<Option<String>>,
    entries: Mutex<Vec<LogEntry>>,
    last_sample: Mutex<Option<SampleRecord>>,
}

/// What the last `exec_sample` call received
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub run: String,
    pub points: Vec<Vec<f64>>,
    pub detached: bool,
}

/// Test double for [`Dispatcher`]
///
/// Clones share their state, so a test can keep one clone while the
/// coordinator owns another.
#[derive(Clone, Default)]
pub struct MockDispatcher {
    state: Arc<MockState>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every run with `message`
    pub fn set_fail_with(&self, message: impl Into<String>) {
        *lock(&self.state.fail_with) = Some(message.into());
    }

    /// Block in `exec_sample` until the run is cancelled or `stop` is called
    pub fn set_block_until_stopped(&self, block: bool) {
        self.state.block_until_stopped.store(block, Ordering::SeqCst);
    }

    pub fn set_panic(&self, panic: bool) {
        self.state.panic.store(panic, Ordering::SeqCst);
    }

    /// Entries appended to the sink at the start of every run
    pub fn set_entries(&self, entries: Vec<LogEntry>) {
        *lock(&self.state.entries) = entries;
    }

    pub fn exec_calls(&self) -> usize {
        self.state.exec_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.state.stop_calls.load(Ordering::SeqCst)
    }

    pub fn last_sample(&self) -> Option<SampleRecord> {
        lock(&self.state.last_sample).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatcher for MockDispatcher {
    fn exec_sample(&self, request: DispatchRequest<'_>) -> Result<Vec<Vec<f64>>> {
        self.state.exec_calls.fetch_add(1, Ordering::SeqCst);

        let points: Vec<Vec<f64>> = request.sample.iter().map(<[f64]>::to_vec).collect();
        *lock(&self.state.last_sample) = Some(SampleRecord {
            run: request.run.basename().to_string(),
            points: points.clone(),
            detached: request.sample.is_detached(),
        });

        for entry in lock(&self.state.entries).iter() {
            request.sink.append(entry.clone());
        }

        if self.state.block_until_stopped.load(Ordering::SeqCst) {
            while !request.cancel.is_cancelled() && !self.state.stopped.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        if self.state.panic.load(Ordering::SeqCst) {
            panic!("mock dispatcher panic");
        }

        if let Some(message) = lock(&self.state.fail_with).clone() {
            return Err(MockFailure(message).into());
        }

        let n_output = request.config.n_output();
        Ok(points
            .iter()
            .map(|p| vec![p.first().copied().unwrap_or_default() * 2.0; n_output])
            .collect())
    }

    fn stop(&self) {
        self.state.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.state.stopped.store(true, Ordering::SeqCst);
    }
}
