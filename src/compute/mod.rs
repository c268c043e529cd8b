//! Per-point computations
//!
//! A [`Computation`] turns one input point into one output point. The
//! in-process dispatcher calls it once per point, from a worker thread of the
//! host the point was assigned to.

pub mod command;

pub use command::CommandComputation;

use crate::cancel::CancelToken;
use crate::Result;
use std::path::Path;

/// What a computation knows about the point it evaluates
#[derive(Debug, Clone, Copy)]
pub struct PointContext<'a> {
    /// Position of the point in the sample
    pub index: usize,
    pub host: &'a str,
    pub workdir: &'a Path,
    pub user_data: &'a serde_json::Value,
    pub cancel: &'a CancelToken,
}

/// User function evaluated once per point
pub trait Computation: Send + Sync {
    fn evaluate(&self, point: &[f64], ctx: &PointContext<'_>) -> Result<Vec<f64>>;
}

impl<F> Computation for F
where
    F: Fn(&[f64], &PointContext<'_>) -> Result<Vec<f64>> + Send + Sync,
{
    fn evaluate(&self, point: &[f64], ctx: &PointContext<'_>) -> Result<Vec<f64>> {
        self(point, ctx)
    }
}
