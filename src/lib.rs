//! distfunc - distributed evaluation of expensive functions
//!
//! distfunc evaluates a batch of input points ("a sample") by spreading the
//! points over weighted compute hosts, running a user computation once per
//! point and collecting the outputs back in input order.
//!
//! # Architecture
//!
//! - **Configuration**: [`RunConfig`] built and validated up front, from code,
//!   a TOML run file or the command line
//! - **Hosts**: weighted host registry, `"name"` or `"name:weight"`
//! - **Coordination**: [`EvaluationCoordinator`] drives one run at a time,
//!   drains run logs on a background thread and stops outstanding work on
//!   failure or CTRL-C
//! - **Dispatch**: pluggable [`Dispatcher`]; [`ThreadDispatcher`] runs hosts
//!   as lanes of local worker threads
//!
//! # Example
//!
//! ```no_run
//! use distfunc::{EvaluationCoordinator, RunConfig, ThreadDispatcher};
//!
//! # fn main() -> distfunc::Result<()> {
//! let config = RunConfig::builder("model.sh", 2, 1)
//!     .hosts(["node-1", "node-3:2"])
//!     .cleanup("keep-failed")
//!     .build()?;
//!
//! let coordinator = EvaluationCoordinator::new(config, ThreadDispatcher::command("model.sh"));
//! let outputs = coordinator.evaluate(&[[0.0, 1.0], [2.0, 3.0]])?;
//! assert_eq!(outputs.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod compute;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod hosts;
pub mod logs;
pub mod run_id;
pub mod sample;
pub mod signal;
pub mod telemetry;
pub mod util;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use compute::{Computation, PointContext};
pub use config::{CleanupPolicy, RunConfig, RunConfigBuilder, WorkdirMode};
pub use coordinator::{EvaluationCoordinator, RunPhase};
pub use dispatch::{Dispatcher, ThreadDispatcher};
pub use error::{ConfigurationError, DispatchFailure, HostSpecWarning};
pub use hosts::{HostRegistry, HostSpec};
pub use run_id::RunIdentity;
pub use signal::{CtrlC, InterruptSource, SignalGuard};

/// Result type used throughout distfunc
pub type Result<T> = anyhow::Result<T>;
