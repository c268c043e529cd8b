//! In-process dispatcher
//!
//! Runs every host of the run as a lane of worker threads inside this
//! process. Points are assigned to hosts by weight up front
//! ([`assign::assign_points`]); each host gets its own queue and `cores`
//! workers pulling from it.
//!
//! The first failing point stops the hand-out of further points: workers
//! finish what they are evaluating, the remaining queue is dropped and the
//! sample fails with [`DispatchError::PointFailed`]. A computation that
//! panics fails its point the same way, so workdir cleanup still runs.

use super::assign::{self, Lane};
use super::workdir::Workdirs;
use super::{DispatchRequest, DispatchSample, Dispatcher};
use crate::cancel::CancelToken;
use crate::compute::{CommandComputation, Computation, PointContext};
use crate::config::RunConfig;
use crate::error::{DispatchError, SampleError};
use crate::logs::{LogEntry, LogSink};
use crate::util::panic_message;
use crate::util::time::format_duration;
use crate::Result;
use crossbeam::channel::{self, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Evaluates samples on local worker threads, one lane per host
pub struct ThreadDispatcher {
    computation: Arc<dyn Computation>,
    active: Mutex<Option<CancelToken>>,
}

impl ThreadDispatcher {
    pub fn new<C: Computation + 'static>(computation: C) -> Self {
        Self {
            computation: Arc::new(computation),
            active: Mutex::new(None),
        }
    }

    /// Dispatcher over a plain function
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&[f64], &PointContext<'_>) -> Result<Vec<f64>> + Send + Sync + 'static,
    {
        Self::new(f)
    }

    /// Dispatcher running `program` once per point
    pub fn command(program: impl Into<PathBuf>) -> Self {
        Self::new(CommandComputation::new(program))
    }

    fn set_active(&self, token: Option<CancelToken>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

/// Shared state of one sample evaluation
struct SampleRun<'a> {
    config: &'a RunConfig,
    sample: &'a DispatchSample<'a>,
    sink: &'a LogSink,
    cancel: &'a CancelToken,
    workdirs: &'a Workdirs,
    computation: &'a dyn Computation,
    halt: AtomicBool,
    failure: Mutex<Option<DispatchError>>,
    failed: Mutex<Vec<usize>>,
}

impl<'a> SampleRun<'a> {
    /// Worker loop: evaluate queued points until the queue is empty or the
    /// run halts
    fn work(&self, lane: &Lane, queue: Receiver<usize>, done: Sender<(usize, Vec<f64>)>) {
        while let Ok(index) = queue.recv() {
            if self.halt.load(Ordering::Acquire) || self.cancel.is_cancelled() {
                break;
            }
            let Some(point) = self.sample.point(index) else {
                continue;
            };

            self.sink
                .append(LogEntry::debug(format!("Point {} started on {}", index, lane.host)));
            let start = Instant::now();

            // A panicking computation fails its point like an error would
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(lane, index, point)))
                .unwrap_or_else(|payload| {
                    Err(anyhow::anyhow!("computation panicked: {}", panic_message(payload.as_ref())))
                });

            match outcome {
                Ok(output) => {
                    let elapsed = start.elapsed();
                    self.sink.append(LogEntry::point_event(
                        index,
                        elapsed.as_secs_f64(),
                        format!(
                            "Point {} done on {} in {}",
                            index,
                            lane.host,
                            format_duration(elapsed)
                        ),
                    ));
                    let _ = done.send((index, output));
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    self.sink.append(LogEntry::error(index, message.clone()));
                    self.record_failure(index, &lane.host, message);
                    break;
                }
            }
        }
    }

    fn evaluate(&self, lane: &Lane, index: usize, point: &[f64]) -> Result<Vec<f64>> {
        let workdir = self.workdirs.prepare_point(index)?;
        let ctx = PointContext {
            index,
            host: &lane.host,
            workdir: &workdir,
            user_data: self.config.user_data(),
            cancel: self.cancel,
        };
        let output = self.computation.evaluate(point, &ctx)?;

        if output.len() != self.config.n_output() {
            return Err(SampleError::DimensionMismatch {
                index,
                expected: self.config.n_output(),
                actual: output.len(),
            }
            .into());
        }
        Ok(output)
    }

    fn record_failure(&self, index: usize, host: &str, message: String) {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(index);

        // Only the first failure is reported
        if !self.halt.swap(true, Ordering::AcqRel) {
            *self.failure.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(DispatchError::PointFailed {
                    index,
                    host: host.to_string(),
                    message,
                });
        }
    }
}

impl Dispatcher for ThreadDispatcher {
    fn exec_sample(&self, request: DispatchRequest<'_>) -> Result<Vec<Vec<f64>>> {
        let DispatchRequest {
            config,
            run,
            sample,
            sink,
            cancel,
        } = request;

        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled.into());
        }
        self.set_active(Some(cancel.clone()));

        let lanes = assign::resolve_lanes(config);
        let weights: Vec<u32> = lanes.iter().map(|l| l.weight).collect();
        let plan = assign::assign_points(&weights, sample.len());
        let queues = assign::partition(&plan, lanes.len());

        info!(
            run = %run,
            points = sample.len(),
            hosts = lanes.len(),
            "dispatching sample"
        );
        for (lane, queue) in lanes.iter().zip(&queues) {
            debug!(host = %lane.host, weight = lane.weight, cores = lane.cores, points = queue.len(), "host lane");
        }

        let workdirs = match Workdirs::create(config, run) {
            Ok(w) => w,
            Err(e) => {
                self.set_active(None);
                return Err(e);
            }
        };

        let state = SampleRun {
            config,
            sample: &sample,
            sink: &sink,
            cancel: &cancel,
            workdirs: &workdirs,
            computation: self.computation.as_ref(),
            halt: AtomicBool::new(false),
            failure: Mutex::new(None),
            failed: Mutex::new(Vec::new()),
        };

        let (done_tx, done_rx) = channel::unbounded();
        let spawned = std::thread::scope(|s| -> Result<()> {
            for (lane, points) in lanes.iter().zip(queues) {
                let (tx, rx) = channel::unbounded();
                for index in points {
                    let _ = tx.send(index);
                }
                drop(tx);

                for core in 0..lane.cores {
                    let rx = rx.clone();
                    let done = done_tx.clone();
                    let state = &state;
                    let spawned = std::thread::Builder::new()
                        .name(format!("distfunc-{}-{}", lane.host, core))
                        .spawn_scoped(s, move || state.work(lane, rx, done));
                    if let Err(e) = spawned {
                        state.halt.store(true, Ordering::Release);
                        return Err(anyhow::Error::new(e)
                            .context(format!("Failed to start worker for host {}", lane.host)));
                    }
                }
            }
            Ok(())
        });
        drop(done_tx);
        self.set_active(None);

        let failed = std::mem::take(&mut *state.failed.lock().unwrap_or_else(PoisonError::into_inner));
        let failure = state
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(state);

        if let Err(e) = workdirs.finish(&failed) {
            warn!(run = %run, "Failed to clean up workdirs: {:#}", e);
        }

        spawned?;
        if let Some(failure) = failure {
            return Err(failure.into());
        }
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled.into());
        }

        let mut outputs: Vec<Option<Vec<f64>>> = vec![None; sample.len()];
        for (index, output) in done_rx.try_iter() {
            if let Some(slot) = outputs.get_mut(index) {
                *slot = Some(output);
            }
        }
        outputs
            .into_iter()
            .enumerate()
            .map(|(index, output)| output.ok_or_else(|| DispatchError::MissingResult { index }.into()))
            .collect()
    }

    fn stop(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = active.as_ref() {
            if token.cancel() {
                info!("in-process workers asked to stop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_id::RunIdentity;
    use std::collections::HashSet;
    use std::fs;
    use std::time::Duration;

    struct Run {
        dir: tempfile::TempDir,
        config: RunConfig,
    }

    fn run_with(hosts: &[&str], n_output: usize, cores: usize) -> Run {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f.sh"), "").unwrap();
        fs::create_dir(dir.path().join("tmp")).unwrap();
        let config = RunConfig::builder(dir.path().join("f.sh"), 1, n_output)
            .hosts(hosts.iter().copied())
            .n_cores(cores)
            .tmpdir(Some(dir.path().join("tmp")))
            .cleanup("none")
            .build()
            .unwrap();
        Run { dir, config }
    }

    fn exec(
        dispatcher: &ThreadDispatcher,
        run: &Run,
        points: Vec<Vec<f64>>,
        cancel: CancelToken,
    ) -> (Result<Vec<Vec<f64>>>, Arc<LogSink>) {
        let id = RunIdentity::generate(run.config.wrapper());
        let sink = Arc::new(LogSink::new());
        let result = dispatcher.exec_sample(DispatchRequest {
            config: &run.config,
            run: &id,
            sample: DispatchSample::Detached(points),
            sink: sink.clone(),
            cancel,
        });
        (result, sink)
    }

    fn drain(sink: &LogSink) -> Vec<LogEntry> {
        std::iter::from_fn(|| sink.poll_next()).collect()
    }

    #[test]
    fn test_outputs_in_input_order() {
        let run = run_with(&["a", "b:2"], 1, 2);
        let dispatcher = ThreadDispatcher::from_fn(|p: &[f64], _ctx: &PointContext<'_>| Ok(vec![p[0] * 2.0]));
        let points: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();

        let (result, sink) = exec(&dispatcher, &run, points, CancelToken::new());
        let outputs = result.unwrap();
        assert_eq!(outputs.len(), 20);
        for (i, out) in outputs.iter().enumerate() {
            assert_eq!(out, &vec![2.0 * i as f64]);
        }

        let events = drain(&sink)
            .into_iter()
            .filter(|e| e.severity() == crate::logs::Severity::PointEvent)
            .count();
        assert_eq!(events, 20);
    }

    #[test]
    fn test_points_follow_host_weights() {
        let run = run_with(&["a", "b:3"], 1, 1);
        let dispatcher = ThreadDispatcher::from_fn(|_p: &[f64], ctx: &PointContext<'_>| {
            Ok(vec![if ctx.host == "b" { 1.0 } else { 0.0 }])
        });
        let (result, _) = exec(&dispatcher, &run, vec![vec![0.0]; 8], CancelToken::new());
        let on_b = result.unwrap().iter().filter(|o| o[0] == 1.0).count();
        assert_eq!(on_b, 6);
    }

    #[test]
    fn test_separate_workdirs_per_point() {
        let run = run_with(&[], 1, 2);
        let dispatcher = ThreadDispatcher::from_fn(|_p: &[f64], ctx: &PointContext<'_>| {
            fs::write(ctx.workdir.join("out.txt"), ctx.index.to_string())?;
            Ok(vec![ctx.index as f64])
        });
        let (result, _) = exec(&dispatcher, &run, vec![vec![0.0]; 4], CancelToken::new());
        assert_eq!(result.unwrap().len(), 4);

        // cleanup "none" keeps the point directories
        let tmp = run.dir.path().join("tmp");
        let root = fs::read_dir(&tmp).unwrap().next().unwrap().unwrap().path();
        let dirs: HashSet<String> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(dirs.len(), 4);
        assert!(dirs.contains("point_3"));
    }

    #[test]
    fn test_first_failure_reported() {
        let run = run_with(&["a"], 1, 1);
        let dispatcher = ThreadDispatcher::from_fn(|p: &[f64], _ctx: &PointContext<'_>| {
            if p[0] == 2.0 {
                anyhow::bail!("diverged");
            }
            Ok(vec![p[0]])
        });
        let points: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();

        let (result, sink) = exec(&dispatcher, &run, points, CancelToken::new());
        let err = result.unwrap_err();
        match err.downcast_ref::<DispatchError>() {
            Some(DispatchError::PointFailed { index, host, message }) => {
                assert_eq!(*index, 2);
                assert_eq!(host, "a");
                assert!(message.contains("diverged"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let entries = drain(&sink);
        assert!(entries.iter().any(|e| e.point() == Some(2) && e.severity() == crate::logs::Severity::Error));
        // Single core: nothing after the failing point was started
        assert!(!entries.iter().any(|e| e.text().contains("Point 3 started")));
    }

    #[test]
    fn test_panicking_point_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f.sh"), "").unwrap();
        fs::create_dir(dir.path().join("tmp")).unwrap();
        let config = RunConfig::builder(dir.path().join("f.sh"), 1, 1)
            .n_cores(2)
            .tmpdir(Some(dir.path().join("tmp")))
            .cleanup("all")
            .build()
            .unwrap();
        let run = Run { dir, config };

        let dispatcher = ThreadDispatcher::from_fn(|p: &[f64], _ctx: &PointContext<'_>| {
            let lookup = [10.0, 20.0];
            Ok(vec![lookup[p[0] as usize]])
        });
        let (result, _) = exec(&dispatcher, &run, vec![vec![0.0], vec![5.0], vec![1.0]], CancelToken::new());

        match result.unwrap_err().downcast_ref::<DispatchError>() {
            Some(DispatchError::PointFailed { index, message, .. }) => {
                assert_eq!(*index, 1);
                assert!(message.contains("computation panicked"));
                assert!(message.contains("index out of bounds"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let leftovers = fs::read_dir(run.dir.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);

        // The dispatcher no longer tracks the finished run
        assert!(dispatcher.active.lock().unwrap().is_none());
    }

    #[test]
    fn test_output_dimension_checked() {
        let run = run_with(&[], 2, 1);
        let dispatcher = ThreadDispatcher::from_fn(|p: &[f64], _ctx: &PointContext<'_>| Ok(vec![p[0]]));
        let (result, _) = exec(&dispatcher, &run, vec![vec![1.0]], CancelToken::new());
        let err = result.unwrap_err();
        match err.downcast_ref::<DispatchError>() {
            Some(DispatchError::PointFailed { message, .. }) => assert!(message.contains("expected 2")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let run = run_with(&[], 1, 1);
        let dispatcher = ThreadDispatcher::from_fn(|p: &[f64], _ctx: &PointContext<'_>| Ok(vec![p[0]]));
        let cancel = CancelToken::new();
        cancel.cancel();
        let (result, _) = exec(&dispatcher, &run, vec![vec![1.0]], cancel);
        assert!(matches!(
            result.unwrap_err().downcast_ref::<DispatchError>(),
            Some(DispatchError::Cancelled)
        ));
    }

    #[test]
    fn test_stop_cancels_running_sample() {
        let run = run_with(&[], 1, 1);
        let dispatcher = ThreadDispatcher::from_fn(|p: &[f64], ctx: &PointContext<'_>| {
            while !ctx.cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(vec![p[0]])
        });

        std::thread::scope(|s| {
            let handle = s.spawn(|| exec(&dispatcher, &run, vec![vec![1.0]; 3], CancelToken::new()).0);
            while !handle.is_finished() {
                dispatcher.stop();
                std::thread::sleep(Duration::from_millis(10));
            }
            let result = handle.join().unwrap();
            assert!(matches!(
                result.unwrap_err().downcast_ref::<DispatchError>(),
                Some(DispatchError::Cancelled)
            ));
        });

        // Stopping an idle dispatcher is harmless
        dispatcher.stop();
    }
}
