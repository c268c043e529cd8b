//! External program computation
//!
//! The wrapper is started once per point, inside the point workdir, with the
//! point values as arguments:
//!
//! ```text
//! <wrapper> 0.5 1 -3.25
//! ```
//!
//! Environment:
//! - `DISTFUNC_POINT_INDEX`: index of the point in the sample
//! - `DISTFUNC_USER_DATA`: user payload as JSON
//!
//! The output point is read from stdout, values separated by whitespace or
//! commas. A non-zero exit status fails the point with stderr attached.
//!
//! On Unix the wrapper leads its own process group. Cancelling a point kills
//! the whole group, so solvers started by a wrapper script go down with it.

use super::{Computation, PointContext};
use crate::Result;
use anyhow::{bail, Context};
use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
#[cfg(unix)]
use tracing::debug;

pub const ENV_POINT_INDEX: &str = "DISTFUNC_POINT_INDEX";
pub const ENV_USER_DATA: &str = "DISTFUNC_USER_DATA";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs an external program per point
#[derive(Debug, Clone)]
pub struct CommandComputation {
    program: PathBuf,
}

impl CommandComputation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Computation for CommandComputation {
    fn evaluate(&self, point: &[f64], ctx: &PointContext<'_>) -> Result<Vec<f64>> {
        let mut command = Command::new(&self.program);
        command
            .args(point.iter().map(|v| v.to_string()))
            .current_dir(ctx.workdir)
            .env(ENV_POINT_INDEX, ctx.index.to_string())
            .env(ENV_USER_DATA, ctx.user_data.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program.display()))?;

        // Read pipes concurrently so a chatty child never blocks on a full pipe
        let stdout = collect(child.stdout.take());
        let stderr = collect(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    kill(&mut child, stdout, stderr);
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to wait for {}", self.program.display())));
                }
            }
            if ctx.cancel.is_cancelled() {
                kill(&mut child, stdout, stderr);
                bail!(crate::error::DispatchError::Cancelled);
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stdout = join_output(stdout);
        let stderr = join_output(stderr);

        if !status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                stderr.trim()
            );
        }

        parse_output(&stdout)
    }
}

fn collect<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    })
}

fn join_output(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Kill the wrapper with its process group and release the pipe readers
fn kill(child: &mut Child, stdout: Option<JoinHandle<String>>, stderr: Option<JoinHandle<String>>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
            debug!(pid = child.id(), error = %e, "killpg failed, killing the wrapper only");
        }
    }
    let _ = child.kill();
    let _ = child.wait();

    // Every writer is gone now, so the readers see end of file
    join_output(stdout);
    join_output(stderr);
}

/// Parse a program's stdout into an output point
pub fn parse_output(stdout: &str) -> Result<Vec<f64>> {
    stdout
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .with_context(|| format!("Invalid output value '{}'", s))
        })
        .collect()
}
