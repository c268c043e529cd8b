//! TOML run file parsing
//!
//! ```toml
//! wrapper = "model.sh"
//! n_input = 3
//! n_output = 1
//! hosts = ["node-1", "node-3:2"]
//! cleanup = "keep-failed"
//! files_to_send = ["mesh.dat"]
//!
//! [user_data]
//! scale = 2.5
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use super::cli::Cli;
use super::cli_convert::{parse_host_list, parse_user_data, toml_to_json};
use super::RunConfigBuilder;
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Contents of a run file; every field optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfigFile {
    pub wrapper: Option<PathBuf>,
    pub n_input: Option<usize>,
    pub n_output: Option<usize>,
    #[serde(default)]
    pub hosts: Vec<String>,
    pub scheduler: Option<String>,
    pub n_cores: Option<usize>,
    #[serde(default)]
    pub analytical: bool,
    pub cleanup: Option<String>,
    pub tmpdir: Option<PathBuf>,
    pub remote_tmpdir: Option<PathBuf>,
    #[serde(default)]
    pub files_to_send: Vec<PathBuf>,
    pub user_data: Option<::toml::Value>,
}

impl RunConfigFile {
    fn resolve_paths(mut self, base: &Path) -> Self {
        let resolve = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.wrapper = self.wrapper.map(resolve);
        self.files_to_send = self.files_to_send.into_iter().map(resolve).collect();
        self
    }

    /// Builder from file values alone
    pub fn into_builder(self) -> Result<RunConfigBuilder, ConfigurationError> {
        let wrapper = self.wrapper.ok_or(ConfigurationError::MissingWrapper)?;
        let n_input = self.n_input.ok_or(ConfigurationError::MissingField("n_input"))?;
        let n_output = self.n_output.ok_or(ConfigurationError::MissingField("n_output"))?;

        let mut builder = RunConfigBuilder::new(wrapper, n_input, n_output)
            .hosts(self.hosts)
            .scheduler(self.scheduler)
            .n_cores(self.n_cores.unwrap_or(0))
            .analytical(self.analytical)
            .tmpdir(self.tmpdir)
            .remote_tmpdir(self.remote_tmpdir)
            .files_to_send(self.files_to_send);
        if let Some(cleanup) = self.cleanup {
            builder = builder.cleanup(cleanup);
        }
        if let Some(user_data) = self.user_data {
            builder = builder.user_data(toml_to_json(user_data)?);
        }
        Ok(builder)
    }
}

/// Parse a TOML run file
pub fn parse_toml_file(path: &Path) -> Result<RunConfigFile, ConfigurationError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigurationError::ConfigFile {
        path: path.to_path_buf(),
        source,
    })?;

    let file = parse_toml_string(&contents)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(file.resolve_paths(base))
}

/// Parse a TOML run file from a string
pub fn parse_toml_string(contents: &str) -> Result<RunConfigFile, ConfigurationError> {
    Ok(::toml::from_str(contents)?)
}

/// Merge CLI arguments with a run file (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut file: RunConfigFile) -> Result<RunConfigBuilder, ConfigurationError> {
    if let Some(ref wrapper) = cli.wrapper {
        file.wrapper = Some(wrapper.clone());
    }
    if cli.n_input.is_some() {
        file.n_input = cli.n_input;
    }
    if cli.n_output.is_some() {
        file.n_output = cli.n_output;
    }
    if let Some(ref hosts) = cli.hosts {
        file.hosts = parse_host_list(hosts);
    }
    if cli.scheduler.is_some() {
        file.scheduler = cli.scheduler.clone();
    }
    if cli.cores.is_some() {
        file.n_cores = cli.cores;
    }
    if cli.analytical {
        file.analytical = true;
    }
    if cli.cleanup.is_some() {
        file.cleanup = cli.cleanup.clone();
    }
    if cli.tmpdir.is_some() {
        file.tmpdir = cli.tmpdir.clone();
    }
    if cli.remote_tmpdir.is_some() {
        file.remote_tmpdir = cli.remote_tmpdir.clone();
    }
    file.files_to_send.extend(cli.files.iter().cloned());

    let user_data = match cli.user_data {
        Some(ref json) => Some(parse_user_data(json)?),
        None => None,
    };

    let mut builder = file.into_builder()?;
    if let Some(user_data) = user_data {
        builder = builder.user_data(user_data);
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CleanupPolicy, WorkdirMode};
    use clap::Parser;

    const RUN_FILE: &str = r#"
wrapper = "model.sh"
n_input = 3
n_output = 2
hosts = ["node-1", "node-3:2"]
n_cores = 4
cleanup = "all"
files_to_send = ["mesh.dat"]

[user_data]
scale = 2.5
"#;

    fn write_run_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.sh"), "#!/bin/sh\n").unwrap();
        fs::write(dir.path().join("mesh.dat"), "").unwrap();
        fs::write(dir.path().join("run.toml"), RUN_FILE).unwrap();
        dir
    }

    #[test]
    fn test_parse_toml_string() {
        let file = parse_toml_string(RUN_FILE).unwrap();
        assert_eq!(file.wrapper, Some(PathBuf::from("model.sh")));
        assert_eq!(file.n_input, Some(3));
        assert_eq!(file.hosts, vec!["node-1", "node-3:2"]);
        assert_eq!(file.cleanup.as_deref(), Some("all"));
        assert!(!file.analytical);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_toml_string("wrapper = \"a\"\nthreads = 4\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigSyntax(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = parse_toml_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFile { .. }));
    }

    #[test]
    fn test_file_paths_resolved_and_built() {
        let dir = write_run_dir();
        let file = parse_toml_file(&dir.path().join("run.toml")).unwrap();
        assert_eq!(file.wrapper, Some(dir.path().join("model.sh")));

        let config = file.into_builder().unwrap().build().unwrap();
        assert_eq!(config.n_output(), 2);
        assert_eq!(config.n_cores(), 4);
        assert_eq!(config.cleanup(), CleanupPolicy::All);
        assert_eq!(config.hosts().len(), 2);
        assert_eq!(config.files_to_send().len(), 1);
        assert_eq!(config.user_data()["scale"], 2.5);
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = write_run_dir();
        let file = parse_toml_file(&dir.path().join("run.toml")).unwrap();
        let cli = Cli::try_parse_from([
            "distfunc",
            "--hosts",
            "solo:3",
            "--cleanup",
            "none",
            "--analytical",
            "--user-data",
            "{\"scale\": 1}",
            "--dry-run",
        ])
        .unwrap();

        let config = merge_cli_with_config(&cli, file).unwrap().build().unwrap();
        assert_eq!(config.hosts().pairs(), vec![("solo".to_string(), 3)]);
        assert_eq!(config.cleanup(), CleanupPolicy::None);
        assert_eq!(config.workdir_mode(), WorkdirMode::Shared);
        assert_eq!(config.user_data()["scale"], 1);
    }

    #[test]
    fn test_missing_dimension_reported() {
        let cli = Cli::try_parse_from(["distfunc", "--wrapper", "model.sh", "--dry-run"]).unwrap();
        let err = merge_cli_with_config(&cli, RunConfigFile::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingField("n_input")));
    }
}
