//! Log drain loop
//!
//! A background thread that renders run log entries while the dispatcher is
//! busy. It polls the [`LogSink`] until empty, then sleeps for an adaptive
//! interval before polling again. The interval starts at
//! [`DrainCadence::initial`] and grows by [`DrainCadence::step`] after every
//! sleep, capped at [`DrainCadence::max`].
//!
//! Stopping is cooperative: [`DrainStopper::request_stop`] wakes the loop,
//! which drains whatever is still queued and exits. Every entry appended
//! before the stop request is rendered before [`DrainHandle::finish`] returns.
//!
//! # Example
//!
//! ```
//! use distfunc::logs::{DrainCadence, DrainLoop, LogEntry, LogSink, TracingRenderer};
//! use std::sync::Arc;
//!
//! let sink = Arc::new(LogSink::new());
//! let handle = DrainLoop::spawn(sink.clone(), Arc::new(TracingRenderer), DrainCadence::local())
//!     .unwrap();
//!
//! sink.append(LogEntry::debug("point 0 started"));
//! let rendered = handle.finish();
//! assert_eq!(rendered, 1);
//! ```

use super::entry::LogEntry;
use super::sink::LogSink;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Destination of drained entries
pub trait LogRenderer: Send + Sync {
    fn render(&self, entry: &LogEntry);
}

/// Renders entries through `tracing`, one level per severity
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRenderer;

impl LogRenderer for TracingRenderer {
    fn render(&self, entry: &LogEntry) {
        let time = entry.time_str();
        match entry {
            LogEntry::Debug { message, .. } => debug!("{} - {}", time, message),
            LogEntry::Warn { message, .. } => warn!("{} - {}", time, message),
            LogEntry::Error { point, message, .. } => {
                error!(point, "{} - Point {} encountered an error ({})", time, point, message)
            }
            LogEntry::PointEvent {
                point,
                elapsed_secs,
                message,
                ..
            } => info!(point, elapsed_secs, "{} - {}", time, message),
        }
    }
}

/// Polling interval schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainCadence {
    pub initial: Duration,
    pub max: Duration,
    pub step: Duration,
}

impl DrainCadence {
    /// In-process runs: logs show up almost immediately
    pub fn local() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            step: Duration::from_millis(200),
        }
    }

    /// Remote runs: log propagation takes a while anyway
    pub fn distributed() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(2),
            step: Duration::from_millis(200),
        }
    }

    pub fn for_run(distributed: bool) -> Self {
        if distributed {
            Self::distributed()
        } else {
            Self::local()
        }
    }

    /// Interval following `current`
    pub fn next(&self, current: Duration) -> Duration {
        if current < self.max {
            (current + self.step).min(self.max)
        } else {
            current
        }
    }
}

impl Default for DrainCadence {
    fn default() -> Self {
        Self::local()
    }
}

/// Requests the drain loop to stop after a final flush
///
/// Cheap to clone and safe to call from any thread, any number of times.
#[derive(Debug, Clone)]
pub struct DrainStopper {
    requested: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl DrainStopper {
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::Release);
        // A full channel already holds a wake-up
        let _ = self.wake.try_send(());
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Background consumer of a [`LogSink`]
pub struct DrainLoop {
    sink: Arc<LogSink>,
    renderer: Arc<dyn LogRenderer>,
    cadence: DrainCadence,
    requested: Arc<AtomicBool>,
    wake: Receiver<()>,
}

impl DrainLoop {
    /// Start draining `sink` on a dedicated thread
    pub fn spawn(
        sink: Arc<LogSink>,
        renderer: Arc<dyn LogRenderer>,
        cadence: DrainCadence,
    ) -> std::io::Result<DrainHandle> {
        let (wake_tx, wake_rx) = channel::bounded(1);
        let requested = Arc::new(AtomicBool::new(false));

        let drain = DrainLoop {
            sink,
            renderer,
            cadence,
            requested: requested.clone(),
            wake: wake_rx,
        };

        let join = std::thread::Builder::new()
            .name("distfunc-logs".to_string())
            .spawn(move || drain.run())?;

        Ok(DrainHandle {
            stopper: DrainStopper {
                requested,
                wake: wake_tx,
            },
            join: Some(join),
        })
    }

    fn run(self) -> u64 {
        let mut rendered = 0u64;
        let mut sleep = self.cadence.initial;

        loop {
            rendered += self.drain_once();

            if self.requested.load(Ordering::Acquire) {
                // Entries appended right before the stop request
                rendered += self.drain_once();
                break;
            }

            match self.wake.recv_timeout(sleep) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Every stopper is gone, nobody can ask us to stop anymore
                    rendered += self.drain_once();
                    break;
                }
            }

            sleep = self.cadence.next(sleep);
        }

        rendered
    }

    fn drain_once(&self) -> u64 {
        let mut count = 0;
        while let Some(entry) = self.sink.poll_next() {
            self.renderer.render(&entry);
            count += 1;
        }
        count
    }
}

/// Owner of a running drain loop
///
/// Dropping the handle stops and joins the loop as well.
pub struct DrainHandle {
    stopper: DrainStopper,
    join: Option<JoinHandle<u64>>,
}

impl DrainHandle {
    pub fn stopper(&self) -> DrainStopper {
        self.stopper.clone()
    }

    /// Stop the loop, wait for the final flush, and return the number of
    /// entries rendered
    pub fn finish(mut self) -> u64 {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> u64 {
        self.stopper.request_stop();
        match self.join.take() {
            Some(join) => match join.join() {
                Ok(rendered) => rendered,
                Err(_) => {
                    warn!("log drain thread panicked");
                    0
                }
            },
            None => 0,
        }
    }
}

impl Drop for DrainHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.stop_and_join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct CollectingRenderer {
        entries: Mutex<Vec<LogEntry>>,
    }

    impl LogRenderer for CollectingRenderer {
        fn render(&self, entry: &LogEntry) {
            self.entries.lock().unwrap().push(entry.clone());
        }
    }

    fn fast_cadence() -> DrainCadence {
        DrainCadence {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
            step: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_cadence_growth_is_capped() {
        let cadence = DrainCadence::local();
        let mut current = cadence.initial;
        let mut steps = vec![current];
        for _ in 0..8 {
            current = cadence.next(current);
            steps.push(current);
        }
        assert_eq!(steps[1], Duration::from_millis(300));
        assert_eq!(steps[4], Duration::from_millis(900));
        assert_eq!(steps[5], Duration::from_secs(1));
        assert_eq!(*steps.last().unwrap(), cadence.max);
    }

    #[test]
    fn test_cadence_for_run() {
        assert_eq!(DrainCadence::for_run(false), DrainCadence::local());
        assert_eq!(DrainCadence::for_run(true).initial, Duration::from_secs(1));
        assert_eq!(DrainCadence::for_run(true).max, Duration::from_secs(2));
    }

    #[test]
    fn test_finish_flushes_queued_entries() {
        let sink = Arc::new(LogSink::new());
        let renderer = Arc::new(CollectingRenderer::default());
        let handle = DrainLoop::spawn(sink.clone(), renderer.clone(), DrainCadence::distributed())
            .unwrap();

        for i in 0..50 {
            sink.append(LogEntry::debug(format!("entry {}", i)));
        }
        sink.append(LogEntry::error(3, "bad point"));

        let start = Instant::now();
        let rendered = handle.finish();

        // Wake-up does not wait for the 1s distributed interval
        assert!(start.elapsed() < Duration::from_millis(900));
        assert_eq!(rendered, 51);

        let entries = renderer.entries.lock().unwrap();
        assert_eq!(entries.len(), 51);
        assert_eq!(entries[0].text(), "entry 0");
        assert_eq!(entries[50].point(), Some(3));
    }

    #[test]
    fn test_renders_while_running() {
        let sink = Arc::new(LogSink::new());
        let renderer = Arc::new(CollectingRenderer::default());
        let handle = DrainLoop::spawn(sink.clone(), renderer.clone(), fast_cadence()).unwrap();

        sink.append(LogEntry::warn("early"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while renderer.entries.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(renderer.entries.lock().unwrap().len(), 1);

        handle.finish();
    }

    #[test]
    fn test_stop_from_other_thread() {
        let sink = Arc::new(LogSink::new());
        let renderer = Arc::new(CollectingRenderer::default());
        let handle = DrainLoop::spawn(sink.clone(), renderer.clone(), fast_cadence()).unwrap();
        let stopper = handle.stopper();

        let producer = {
            let sink = sink.clone();
            std::thread::spawn(move || {
                for i in 0..20 {
                    sink.append(LogEntry::point_event(i, 0.0, format!("Point {} done", i)));
                }
                stopper.request_stop();
                stopper.request_stop();
            })
        };
        producer.join().unwrap();

        assert_eq!(handle.finish(), 20);
        assert_eq!(renderer.entries.lock().unwrap().len(), 20);
    }

    #[test]
    fn test_drop_joins_loop() {
        let sink = Arc::new(LogSink::new());
        let renderer = Arc::new(CollectingRenderer::default());
        {
            let _handle = DrainLoop::spawn(sink.clone(), renderer.clone(), fast_cadence()).unwrap();
            sink.append(LogEntry::debug("last words"));
        }
        assert_eq!(renderer.entries.lock().unwrap().len(), 1);
    }
}
