//! Configuration module
//!
//! Builds the immutable [`RunConfig`] handed to dispatchers, from code
//! ([`RunConfigBuilder`]), a TOML run file, or CLI arguments.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use crate::error::{ConfigurationError, HostSpecWarning};
use crate::hosts::HostRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Working directory isolation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WorkdirMode {
    /// Each point gets its own working directory
    #[default]
    Separate,
    /// All points share one directory (cheap analytical functions)
    Shared,
}

impl FromStr for WorkdirMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "separate" => Ok(Self::Separate),
            "shared" => Ok(Self::Shared),
            other => Err(ConfigurationError::UnknownWorkdirMode(other.to_string())),
        }
    }
}

impl fmt::Display for WorkdirMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Separate => write!(f, "separate"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

/// What to remove from the run's working directories once it is over
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Keep everything
    None,
    /// Remove everything except the directories of failed points
    #[default]
    KeepFailed,
    /// Remove everything
    All,
}

impl FromStr for CleanupPolicy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "keep-failed" => Ok(Self::KeepFailed),
            "all" => Ok(Self::All),
            other => Err(ConfigurationError::UnknownCleanupPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::KeepFailed => write!(f, "keep-failed"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Complete, validated configuration of a distributed function
///
/// Built once with [`RunConfigBuilder`]; read-only afterwards.
#[derive(Debug, Clone)]
pub struct RunConfig {
    wrapper: PathBuf,
    n_input: usize,
    n_output: usize,
    scheduler: Option<String>,
    hosts: HostRegistry,
    host_warnings: Vec<HostSpecWarning>,
    n_cores: usize,
    workdir_mode: WorkdirMode,
    cleanup: CleanupPolicy,
    tmpdir: Option<PathBuf>,
    remote_tmpdir: Option<PathBuf>,
    files_to_send: Vec<PathBuf>,
    user_data: serde_json::Value,
}

impl RunConfig {
    pub fn builder(wrapper: impl Into<PathBuf>, n_input: usize, n_output: usize) -> RunConfigBuilder {
        RunConfigBuilder::new(wrapper, n_input, n_output)
    }

    /// Absolute path of the wrapper (computation source) file
    pub fn wrapper(&self) -> &Path {
        &self.wrapper
    }

    pub fn n_input(&self) -> usize {
        self.n_input
    }

    pub fn n_output(&self) -> usize {
        self.n_output
    }

    pub fn scheduler(&self) -> Option<&str> {
        self.scheduler.as_deref()
    }

    pub fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }

    /// Warnings raised while parsing the host list
    pub fn host_warnings(&self) -> &[HostSpecWarning] {
        &self.host_warnings
    }

    /// Cores per host, 0 meaning auto-detect
    pub fn n_cores(&self) -> usize {
        self.n_cores
    }

    pub fn workdir_mode(&self) -> WorkdirMode {
        self.workdir_mode
    }

    pub fn cleanup(&self) -> CleanupPolicy {
        self.cleanup
    }

    pub fn tmpdir(&self) -> Option<&Path> {
        self.tmpdir.as_deref()
    }

    /// Root for local working directories
    pub fn local_tmpdir(&self) -> PathBuf {
        self.tmpdir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Root for working directories on remote hosts (defaults to `tmpdir`)
    pub fn remote_tmpdir(&self) -> Option<&Path> {
        self.remote_tmpdir.as_deref().or(self.tmpdir.as_deref())
    }

    pub fn files_to_send(&self) -> &[PathBuf] {
        &self.files_to_send
    }

    /// Opaque payload forwarded to every evaluation
    pub fn user_data(&self) -> &serde_json::Value {
        &self.user_data
    }

    /// Scheduler set or explicit hosts given
    pub fn is_distributed(&self) -> bool {
        self.scheduler.is_some() || !self.hosts.is_empty()
    }
}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  Wrapper: {}", self.wrapper.display())?;
        writeln!(f, "  Dimensions: {} -> {}", self.n_input, self.n_output)?;
        match &self.scheduler {
            Some(s) => writeln!(f, "  Scheduler: {}", s)?,
            None => writeln!(f, "  Hosts: {}", self.hosts)?,
        }
        if self.n_cores == 0 {
            writeln!(f, "  Cores per host: auto")?;
        } else {
            writeln!(f, "  Cores per host: {}", self.n_cores)?;
        }
        writeln!(f, "  Workdir: {}, cleanup={}", self.workdir_mode, self.cleanup)?;
        writeln!(f, "  Tmpdir: {}", self.local_tmpdir().display())?;
        if let Some(remote) = self.remote_tmpdir() {
            writeln!(f, "  Remote tmpdir: {}", remote.display())?;
        }
        writeln!(f, "  Files to send: {}", self.files_to_send.len())?;
        Ok(())
    }
}

/// Builder for [`RunConfig`]
///
/// Nothing is checked until [`build`](Self::build), which validates every
/// field and fails with a [`ConfigurationError`] before anything is
/// dispatched.
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    wrapper: PathBuf,
    n_input: usize,
    n_output: usize,
    hosts: Vec<String>,
    scheduler: Option<String>,
    n_cores: usize,
    workdir_mode: WorkdirMode,
    cleanup: String,
    tmpdir: Option<PathBuf>,
    remote_tmpdir: Option<PathBuf>,
    files_to_send: Vec<PathBuf>,
    user_data: serde_json::Value,
}

impl RunConfigBuilder {
    pub fn new(wrapper: impl Into<PathBuf>, n_input: usize, n_output: usize) -> Self {
        Self {
            wrapper: wrapper.into(),
            n_input,
            n_output,
            hosts: Vec::new(),
            scheduler: None,
            n_cores: 0,
            workdir_mode: WorkdirMode::default(),
            cleanup: CleanupPolicy::default().to_string(),
            tmpdir: None,
            remote_tmpdir: None,
            files_to_send: Vec::new(),
            user_data: serde_json::Value::Null,
        }
    }

    /// Host specifications, `"name"` or `"name:weight"`
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    /// Scheduler whose reservation supersedes the explicit host list
    pub fn scheduler(mut self, scheduler: Option<String>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn n_cores(mut self, n_cores: usize) -> Self {
        self.n_cores = n_cores;
        self
    }

    pub fn workdir_mode(mut self, mode: WorkdirMode) -> Self {
        self.workdir_mode = mode;
        self
    }

    /// `true` shares one workdir between all points
    pub fn analytical(self, analytical: bool) -> Self {
        self.workdir_mode(if analytical {
            WorkdirMode::Shared
        } else {
            WorkdirMode::Separate
        })
    }

    /// Cleanup policy literal: `none`, `keep-failed` or `all`
    pub fn cleanup(mut self, cleanup: impl Into<String>) -> Self {
        self.cleanup = cleanup.into();
        self
    }

    pub fn cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup = policy.to_string();
        self
    }

    pub fn tmpdir(mut self, tmpdir: Option<PathBuf>) -> Self {
        self.tmpdir = tmpdir;
        self
    }

    pub fn remote_tmpdir(mut self, remote_tmpdir: Option<PathBuf>) -> Self {
        self.remote_tmpdir = remote_tmpdir;
        self
    }

    pub fn file_to_send(mut self, file: impl Into<PathBuf>) -> Self {
        self.files_to_send.push(file.into());
        self
    }

    pub fn files_to_send<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files_to_send.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn user_data(mut self, user_data: serde_json::Value) -> Self {
        self.user_data = user_data;
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<RunConfig, ConfigurationError> {
        validator::validate_dimensions(self.n_input, self.n_output)?;
        let wrapper = validator::validate_wrapper(&self.wrapper)?;
        validator::validate_files_to_send(&self.files_to_send)?;
        let cleanup: CleanupPolicy = self.cleanup.parse()?;

        let mut hosts = HostRegistry::new();
        let host_warnings = hosts.add(&self.hosts);

        Ok(RunConfig {
            wrapper,
            n_input: self.n_input,
            n_output: self.n_output,
            scheduler: self.scheduler.filter(|s| !s.is_empty()),
            hosts,
            host_warnings,
            n_cores: self.n_cores,
            workdir_mode: self.workdir_mode,
            cleanup,
            tmpdir: self.tmpdir.map(|p| validator::strip_trailing_separator(&p)),
            remote_tmpdir: self.remote_tmpdir.map(|p| validator::strip_trailing_separator(&p)),
            files_to_send: self.files_to_send,
            user_data: self.user_data,
        })
    }
}
