//! Error types
//!
//! Three families of problems can surface while evaluating a sample:
//!
//! - [`ConfigurationError`]: bad inputs detected while building a
//!   [`RunConfig`](crate::config::RunConfig). Raised before anything is dispatched.
//! - [`DispatchFailure`]: anything that goes wrong inside one `evaluate` call.
//!   The original cause is kept intact and can be downcast by the caller.
//! - [`HostSpecWarning`]: malformed or duplicate host specifications. These are
//!   logged and returned for inspection but never abort a run.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid run configuration
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("wrong cleanup parameter ({0}), expected one of: none, keep-failed, all")]
    UnknownCleanupPolicy(String),

    #[error("wrong workdir mode ({0}), expected one of: separate, shared")]
    UnknownWorkdirMode(String),

    #[error("wrapper file ({}) not found", .0.display())]
    WrapperNotFound(PathBuf),

    #[error("file to send ({}) not found", .0.display())]
    StagedFileNotFound(PathBuf),

    #[error("{name} dimension must be at least 1")]
    ZeroDimension { name: &'static str },

    #[error("wrapper file is required")]
    MissingWrapper,

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("failed to read config file {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ConfigSyntax(#[from] toml::de::Error),

    #[error("invalid user data: {0}")]
    UserData(String),
}

/// Failure of one `evaluate` call
///
/// Wraps whatever the dispatcher (or the coordinator itself) raised. The
/// original error is never replaced: use [`DispatchFailure::cause`] and
/// `downcast_ref` to inspect it.
#[derive(Error, Debug)]
#[error("failed to evaluate sample: {cause:#}")]
pub struct DispatchFailure {
    #[source]
    cause: anyhow::Error,
    distributed: bool,
    interrupted: bool,
}

impl DispatchFailure {
    pub fn new(cause: anyhow::Error, distributed: bool, interrupted: bool) -> Self {
        Self {
            cause,
            distributed,
            interrupted,
        }
    }

    /// The error originally raised during the dispatch window
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Consume the failure and return the original error
    pub fn into_cause(self) -> anyhow::Error {
        self.cause
    }

    /// Whether the failed run targeted a scheduler or explicit hosts
    pub fn is_distributed(&self) -> bool {
        self.distributed
    }

    /// Whether the run was stopped (interrupt or failure-triggered stop)
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }
}

/// Reasons the coordinator itself can reject or abort a run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("an evaluation is already in progress on this coordinator")]
    AlreadyRunning,

    #[error("run was interrupted")]
    Interrupted,

    #[error("dispatcher panicked: {0}")]
    DispatcherPanicked(String),

    #[error("dispatcher returned {actual} points for a sample of {expected}")]
    OutputLength { expected: usize, actual: usize },
}

/// Failures raised by the in-process dispatcher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("point {index} failed on host {host}: {message}")]
    PointFailed {
        index: usize,
        host: String,
        message: String,
    },

    #[error("run cancelled before every point was evaluated")]
    Cancelled,

    #[error("no result for point {index}")]
    MissingResult { index: usize },
}

/// Problems with the shape or content of a sample
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    #[error("point {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("line {line}: cannot parse value '{value}'")]
    InvalidValue { line: usize, value: String },
}

/// Non-fatal host specification problems
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostSpecWarning {
    #[error("weight not understood for host: {spec}, set to default weight: {default}")]
    InvalidWeight { spec: String, default: u32 },

    #[error("same host ({name}) added twice, instance not added twice")]
    DuplicateHost { name: String },
}
