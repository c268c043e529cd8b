//! Evaluation coordinator
//!
//! [`EvaluationCoordinator`] drives one sample evaluation at a time:
//!
//! ```text
//! Idle -> Preparing -> Dispatching -> Draining -> Done
//!                          |
//!                          +-> Stopping -> Draining -> Done   (failure / interrupt)
//! ```
//!
//! While the dispatcher runs, a [`DrainLoop`] renders the log entries it
//! produces. Distributed runs (scheduler set or explicit hosts) also get a
//! [`SignalGuard`](crate::signal::SignalGuard) from the coordinator's
//! [`InterruptSource`] ([`CtrlC`] unless replaced), so an interrupt stops the
//! outstanding work instead of leaving it running on the hosts.
//!
//! Stopping is idempotent: whichever of the interrupt handler, a failing
//! dispatcher or an explicit [`EvaluationCoordinator::stop_now`] comes first
//! performs the stop; later requests are no-ops.

use crate::cancel::CancelToken;
use crate::config::{RunConfig, WorkdirMode};
use crate::dispatch::{DispatchRequest, DispatchSample, Dispatcher};
use crate::error::{DispatchFailure, RunError, SampleError};
use crate::logs::{DrainCadence, DrainHandle, DrainLoop, DrainStopper, LogRenderer, LogSink, TracingRenderer};
use crate::run_id::RunIdentity;
use crate::signal::{CtrlC, InterruptSource};
use crate::util::panic_message;
use crate::util::time::{format_duration, point_rate};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle of one `evaluate` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Preparing,
    Dispatching,
    Draining,
    Stopping,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Preparing => "preparing",
            RunPhase::Dispatching => "dispatching",
            RunPhase::Draining => "draining",
            RunPhase::Stopping => "stopping",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct PhaseCell(Mutex<RunPhase>);

impl PhaseCell {
    fn set(&self, next: RunPhase) {
        let mut phase = lock(&self.0);
        if *phase != next {
            debug!("run phase: {} -> {}", *phase, next);
            *phase = next;
        }
    }

    fn get(&self) -> RunPhase {
        *lock(&self.0)
    }
}

/// Stop controls of the run in flight
///
/// Shared with the interrupt listener thread.
struct RunControl<D> {
    stopped: AtomicBool,
    cancel: CancelToken,
    drain: Option<DrainStopper>,
    dispatcher: Arc<D>,
    phase: Arc<PhaseCell>,
}

impl<D: Dispatcher> RunControl<D> {
    /// Returns whether this call performed the stop
    fn stop_now(&self) -> bool {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.phase.set(RunPhase::Stopping);
        self.cancel.cancel();
        error!("Start stopping children.");
        self.dispatcher.stop();
        if let Some(drain) = &self.drain {
            drain.request_stop();
        }
        error!("Children stopped.");
        true
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Orchestrates sample evaluation over a [`Dispatcher`]
///
/// One `evaluate` call at a time; a concurrent call fails with
/// [`RunError::AlreadyRunning`]. The coordinator is `Sync`, so
/// [`stop_now`](Self::stop_now) can be called from another thread while a
/// run is in flight.
pub struct EvaluationCoordinator<D: Dispatcher> {
    config: Arc<RunConfig>,
    dispatcher: Arc<D>,
    renderer: Arc<dyn LogRenderer>,
    interrupts: Arc<dyn InterruptSource>,
    busy: AtomicBool,
    phase: Arc<PhaseCell>,
    active: Mutex<Option<Arc<RunControl<D>>>>,
}

impl<D: Dispatcher + 'static> EvaluationCoordinator<D> {
    pub fn new(config: RunConfig, dispatcher: D) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            renderer: Arc::new(TracingRenderer),
            interrupts: Arc::new(CtrlC),
            busy: AtomicBool::new(false),
            phase: Arc::new(PhaseCell::default()),
            active: Mutex::new(None),
        }
    }

    /// Render drained log entries with `renderer` instead of `tracing`
    pub fn with_renderer(mut self, renderer: Arc<dyn LogRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Take the interrupts of distributed runs from `source` instead of CTRL-C
    pub fn with_interrupt_source(mut self, source: Arc<dyn InterruptSource>) -> Self {
        self.interrupts = source;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn phase(&self) -> RunPhase {
        self.phase.get()
    }

    /// Evaluate every point of `sample`
    ///
    /// Returns one output point per input point, in input order. An empty
    /// sample returns immediately without reaching the dispatcher.
    pub fn evaluate<P: AsRef<[f64]>>(&self, sample: &[P]) -> Result<Vec<Vec<f64>>, DispatchFailure> {
        if sample.is_empty() {
            return Ok(Vec::new());
        }

        let distributed = self.config.is_distributed();
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DispatchFailure::new(RunError::AlreadyRunning.into(), distributed, false));
        }

        let result = self.run(sample, distributed);
        self.busy.store(false, Ordering::Release);
        result
    }

    /// Evaluate a single point
    pub fn evaluate_point(&self, point: &[f64]) -> Result<Vec<f64>, DispatchFailure> {
        let distributed = self.config.is_distributed();
        self.evaluate(&[point])?.into_iter().next().ok_or_else(|| {
            DispatchFailure::new(
                RunError::OutputLength {
                    expected: 1,
                    actual: 0,
                }
                .into(),
                distributed,
                false,
            )
        })
    }

    /// Stop the run in flight, if any
    ///
    /// Cancels the run's token, asks the dispatcher to stop and lets the log
    /// drain finish. Only the first call of a run has any effect; returns
    /// whether this call performed the stop.
    pub fn stop_now(&self) -> bool {
        let control = lock(&self.active).clone();
        match control {
            Some(control) => control.stop_now(),
            None => false,
        }
    }

    fn run<P: AsRef<[f64]>>(&self, sample: &[P], distributed: bool) -> Result<Vec<Vec<f64>>, DispatchFailure> {
        self.phase.set(RunPhase::Preparing);
        let start = Instant::now();

        if let Err(e) = self.check_inputs(sample) {
            error!("Error during sample evaluation: {}", e);
            self.phase.set(RunPhase::Done);
            return Err(DispatchFailure::new(e.into(), distributed, false));
        }

        let run = RunIdentity::generate(self.config.wrapper());
        let points = if !distributed && self.config.workdir_mode() == WorkdirMode::Shared {
            DispatchSample::Shared(sample.iter().map(|p| p.as_ref()).collect())
        } else {
            DispatchSample::Detached(sample.iter().map(|p| p.as_ref().to_vec()).collect())
        };

        let sink = Arc::new(LogSink::new());
        let drain = match DrainLoop::spawn(sink.clone(), self.renderer.clone(), DrainCadence::for_run(distributed)) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to start log drain thread, logs are rendered after the run: {}", e);
                None
            }
        };

        let control = Arc::new(RunControl {
            stopped: AtomicBool::new(false),
            cancel: CancelToken::new(),
            drain: drain.as_ref().map(DrainHandle::stopper),
            dispatcher: self.dispatcher.clone(),
            phase: self.phase.clone(),
        });
        *lock(&self.active) = Some(control.clone());

        let guard = if distributed {
            let control = control.clone();
            Some(self.interrupts.arm(Box::new(move || {
                control.stop_now();
            })))
        } else {
            None
        };

        self.phase.set(RunPhase::Dispatching);
        let request = DispatchRequest {
            config: &self.config,
            run: &run,
            sample: points,
            sink: sink.clone(),
            cancel: control.cancel.clone(),
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatcher.exec_sample(request)))
            .unwrap_or_else(|payload| Err(RunError::DispatcherPanicked(panic_message(payload.as_ref())).into()))
            .and_then(|outputs| {
                if control.is_stopped() {
                    Err(RunError::Interrupted.into())
                } else {
                    self.check_outputs(sample.len(), outputs)
                }
            });

        let result = match outcome {
            Ok(outputs) => {
                if let Some(guard) = guard {
                    guard.restore();
                }
                self.phase.set(RunPhase::Draining);
                self.finish_drain(drain, &sink);
                let elapsed = start.elapsed();
                info!(
                    run = %run,
                    "finished computing sample ({} points) in {} ({:.1} points/s).",
                    outputs.len(),
                    format_duration(elapsed),
                    point_rate(outputs.len(), elapsed)
                );
                Ok(outputs)
            }
            Err(cause) => {
                error!(run = %run, "Error during sample evaluation: {:?}", cause);
                if distributed {
                    control.stop_now();
                }
                if let Some(guard) = guard {
                    guard.restore();
                }
                self.phase.set(RunPhase::Draining);
                self.finish_drain(drain, &sink);
                Err(DispatchFailure::new(cause, distributed, control.is_stopped()))
            }
        };

        *lock(&self.active) = None;
        self.phase.set(RunPhase::Done);
        result
    }

    fn check_inputs<P: AsRef<[f64]>>(&self, sample: &[P]) -> Result<(), SampleError> {
        let expected = self.config.n_input();
        match sample.iter().position(|p| p.as_ref().len() != expected) {
            Some(index) => Err(SampleError::DimensionMismatch {
                index,
                expected,
                actual: sample[index].as_ref().len(),
            }),
            None => Ok(()),
        }
    }

    fn check_outputs(&self, n_points: usize, outputs: Vec<Vec<f64>>) -> crate::Result<Vec<Vec<f64>>> {
        if outputs.len() != n_points {
            return Err(RunError::OutputLength {
                expected: n_points,
                actual: outputs.len(),
            }
            .into());
        }
        let expected = self.config.n_output();
        if let Some(index) = outputs.iter().position(|o| o.len() != expected) {
            return Err(SampleError::DimensionMismatch {
                index,
                expected,
                actual: outputs[index].len(),
            }
            .into());
        }
        Ok(outputs)
    }

    /// Flush every queued entry before handing control back to the caller
    fn finish_drain(&self, drain: Option<DrainHandle>, sink: &LogSink) {
        match drain {
            Some(handle) => {
                let rendered = handle.finish();
                debug!(rendered, "log drain finished");
            }
            None => {
                while let Some(entry) = sink.poll_next() {
                    self.renderer.render(&entry);
                }
            }
        }
    }
}
