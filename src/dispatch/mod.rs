//! Dispatcher contract
//!
//! A [`Dispatcher`] takes a whole sample, evaluates every point somewhere
//! (local threads, remote hosts, a batch scheduler) and returns the outputs
//! in input order. The coordinator only ever talks to it through
//! [`Dispatcher::exec_sample`] and [`Dispatcher::stop`].
//!
//! Log output of the run goes into the [`LogSink`] carried by the request;
//! the coordinator renders it on its own drain thread.

pub mod assign;
pub mod local;
pub mod mock;
pub mod workdir;

pub use local::ThreadDispatcher;

use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::logs::LogSink;
use crate::run_id::RunIdentity;
use std::sync::Arc;

/// Points handed to a dispatcher
///
/// Local runs in shared-workdir mode borrow the caller's points as they are.
/// Every other run gets owned copies, so nothing downstream depends on the
/// caller's representation.
#[derive(Debug, Clone)]
pub enum DispatchSample<'a> {
    Shared(Vec<&'a [f64]>),
    Detached(Vec<Vec<f64>>),
}

impl<'a> DispatchSample<'a> {
    pub fn len(&self) -> usize {
        match self {
            DispatchSample::Shared(points) => points.len(),
            DispatchSample::Detached(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn point(&self, index: usize) -> Option<&[f64]> {
        match self {
            DispatchSample::Shared(points) => points.get(index).copied(),
            DispatchSample::Detached(points) => points.get(index).map(Vec::as_slice),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.len()).filter_map(move |i| self.point(i))
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, DispatchSample::Detached(_))
    }
}

/// Everything a dispatcher needs for one sample
pub struct DispatchRequest<'a> {
    pub config: &'a RunConfig,
    pub run: &'a RunIdentity,
    pub sample: DispatchSample<'a>,
    pub sink: Arc<LogSink>,
    /// Cancelled by the coordinator before it calls [`Dispatcher::stop`]
    pub cancel: CancelToken,
}

/// Evaluates samples on behalf of an
/// [`EvaluationCoordinator`](crate::coordinator::EvaluationCoordinator)
pub trait Dispatcher: Send + Sync {
    /// Evaluate every point of the request, blocking until done
    ///
    /// Returns one output point per input point, in input order.
    fn exec_sample(&self, request: DispatchRequest<'_>) -> anyhow::Result<Vec<Vec<f64>>>;

    /// Stop outstanding work of the running sample
    ///
    /// Best effort. Must not panic, and must be harmless when nothing has
    /// started yet. The coordinator calls it at most once per run.
    fn stop(&self);
}
