//! Per-run working directories
//!
//! Layout: `<tmpdir>/<run basename>/` is the run root. In separate mode each
//! point gets `point_<index>/` below it with its own copy of the staged
//! files; in shared mode the files are staged once into the root and every
//! point runs there.

use crate::config::{CleanupPolicy, RunConfig, WorkdirMode};
use crate::run_id::RunIdentity;
use crate::Result;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const POINT_PREFIX: &str = "point_";

/// Working directories of one run
#[derive(Debug)]
pub struct Workdirs {
    root: PathBuf,
    mode: WorkdirMode,
    cleanup: CleanupPolicy,
    files_to_send: Vec<PathBuf>,
}

impl Workdirs {
    /// Create the run root (and stage files into it in shared mode)
    pub fn create(config: &RunConfig, run: &RunIdentity) -> Result<Self> {
        let root = config.local_tmpdir().join(run.basename());
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create workdir {}", root.display()))?;
        debug!(root = %root.display(), "run workdir created");

        let workdirs = Self {
            root,
            mode: config.workdir_mode(),
            cleanup: config.cleanup(),
            files_to_send: config.files_to_send().to_vec(),
        };
        if workdirs.mode == WorkdirMode::Shared {
            stage_files(&workdirs.files_to_send, &workdirs.root)?;
        }
        Ok(workdirs)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a point runs in
    pub fn point_dir(&self, index: usize) -> PathBuf {
        match self.mode {
            WorkdirMode::Separate => self.root.join(format!("{}{}", POINT_PREFIX, index)),
            WorkdirMode::Shared => self.root.clone(),
        }
    }

    /// Create the point directory and stage files into it
    pub fn prepare_point(&self, index: usize) -> Result<PathBuf> {
        let dir = self.point_dir(index);
        if self.mode == WorkdirMode::Separate {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create workdir {}", dir.display()))?;
            stage_files(&self.files_to_send, &dir)?;
        }
        Ok(dir)
    }

    /// Apply the cleanup policy once every point is settled
    pub fn finish(self, failed: &[usize]) -> Result<()> {
        match self.cleanup {
            CleanupPolicy::None => Ok(()),
            CleanupPolicy::All => remove_tree(&self.root),
            CleanupPolicy::KeepFailed => self.remove_succeeded(failed),
        }
    }

    fn remove_succeeded(&self, failed: &[usize]) -> Result<()> {
        if self.mode == WorkdirMode::Shared {
            return if failed.is_empty() {
                remove_tree(&self.root)
            } else {
                Ok(())
            };
        }

        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list workdir {}", self.root.display()))?;
        for entry in entries {
            let entry = entry?;
            let index = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(POINT_PREFIX))
                .and_then(|i| i.parse::<usize>().ok());
            match index {
                Some(i) if failed.contains(&i) => {}
                Some(_) => remove_tree(&entry.path())?,
                None => {}
            }
        }

        let empty = fs::read_dir(&self.root)?.next().is_none();
        if empty {
            fs::remove_dir(&self.root)
                .with_context(|| format!("Failed to remove workdir {}", self.root.display()))?;
        } else {
            warn!(root = %self.root.display(), "workdirs of failed points kept");
        }
        Ok(())
    }
}

fn stage_files(files: &[PathBuf], dir: &Path) -> Result<()> {
    for file in files {
        let name = file
            .file_name()
            .with_context(|| format!("Cannot stage {}: no file name", file.display()))?;
        fs::copy(file, dir.join(name))
            .with_context(|| format!("Failed to stage {} into {}", file.display(), dir.display()))?;
    }
    Ok(())
}

fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
