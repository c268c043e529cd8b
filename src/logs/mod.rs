//! Run log channel
//!
//! Dispatchers and the computations they run produce [`LogEntry`] values into a
//! shared [`LogSink`]. While a run is in progress a [`DrainLoop`] polls the sink
//! and renders every entry through a [`LogRenderer`].
//!
//! # Modules
//!
//! - `entry`: the closed set of entry shapes
//! - `sink`: thread-safe append/poll queue
//! - `drain`: background consumer with adaptive polling

pub mod drain;
pub mod entry;
pub mod sink;

pub use drain::{DrainCadence, DrainHandle, DrainLoop, DrainStopper, LogRenderer, TracingRenderer};
pub use entry::{LogEntry, Severity};
pub use sink::LogSink;
