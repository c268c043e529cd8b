//! Interrupt routing for distributed runs
//!
//! [`SignalGuard`] listens for an interrupt on a dedicated thread (a
//! current-thread tokio runtime) and turns it into a call to the supplied
//! callback, normally the coordinator's stop request. Only distributed runs
//! arm it; local runs leave process-wide interrupt handling alone.
//!
//! The coordinator gets its guards from an [`InterruptSource`]. [`CtrlC`] is
//! the process's SIGINT; tests hand in their own source.
//!
//! On Unix the SIGINT handler is installed with `sigaction` and the previous
//! disposition is saved. [`SignalGuard::restore`] puts it back once the last
//! guard of the process is released, so CTRL-C terminates the process again
//! between runs.
//!
//! Installation is best effort. If the handler, the listener thread or its
//! runtime cannot be set up, or the listener fails, a warning is logged and
//! the run goes on without interrupt-based cancellation.

use std::future::Future;
use std::io;
#[cfg(unix)]
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Where the interrupts of a run come from
pub trait InterruptSource: Send + Sync {
    /// Route the next interrupt to `on_interrupt` until the guard is restored
    fn arm(&self, on_interrupt: Box<dyn FnOnce() + Send>) -> SignalGuard;
}

/// CTRL-C of the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct CtrlC;

impl InterruptSource for CtrlC {
    fn arm(&self, on_interrupt: Box<dyn FnOnce() + Send>) -> SignalGuard {
        SignalGuard::install(on_interrupt)
    }
}

/// Installed interrupt listener
pub struct SignalGuard {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    #[cfg(unix)]
    hook: Option<Arc<hook::SigintHook>>,
}

impl SignalGuard {
    /// Route CTRL-C to `on_interrupt` until [`restore`](Self::restore) is called
    #[cfg(unix)]
    pub fn install<F>(on_interrupt: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let hook = match hook::SigintHook::install() {
            Ok(hook) => Arc::new(hook),
            Err(e) => {
                warn!(error = %e, "Failed to setup sigint interrupt handler. Remote compute will not be properly stopped when CTRL-C is pressed.");
                return Self::degraded();
            }
        };

        let listener = hook.clone();
        let mut guard = Self::install_with(move || async move { listener.wait().await }, on_interrupt);
        if guard.is_armed() {
            guard.hook = Some(hook);
        }
        guard
    }

    /// Route CTRL-C to `on_interrupt` until [`restore`](Self::restore) is called
    #[cfg(not(unix))]
    pub fn install<F>(on_interrupt: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::install_with(|| async { tokio::signal::ctrl_c().await }, on_interrupt)
    }

    /// Same as [`install`](Self::install) with an injected signal source
    ///
    /// `listener` is called on the listener thread and must resolve when the
    /// interrupt arrives.
    pub fn install_with<L, Fut, F>(listener: L, on_interrupt: F) -> Self
    where
        L: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>>,
        F: FnOnce() + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = crossbeam::channel::bounded::<io::Result<()>>(1);

        let spawned = std::thread::Builder::new()
            .name("distfunc-sigint".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => {
                        let _ = ready_tx.send(Ok(()));
                        rt
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                runtime.block_on(async move {
                    tokio::select! {
                        result = listener() => match result {
                            Ok(()) => {
                                error!("Sigint received.");
                                on_interrupt();
                            }
                            Err(e) => {
                                warn!(error = %e, "Failed to listen for sigint. Remote compute will not be properly stopped when CTRL-C is pressed.");
                            }
                        },
                        _ = shutdown_rx => {}
                    }
                });
            });

        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                warn!(error = %e, "Failed to setup sigint interrupt handler. Remote compute will not be properly stopped when CTRL-C is pressed.");
                return Self::degraded();
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!("sigint handler installed");
                Self {
                    shutdown: Some(shutdown_tx),
                    join: Some(join),
                    #[cfg(unix)]
                    hook: None,
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to setup sigint interrupt handler. Remote compute will not be properly stopped when CTRL-C is pressed.");
                let _ = join.join();
                Self::degraded()
            }
            Err(_) => {
                warn!("Failed to setup sigint interrupt handler. Remote compute will not be properly stopped when CTRL-C is pressed.");
                let _ = join.join();
                Self::degraded()
            }
        }
    }

    fn degraded() -> Self {
        Self {
            shutdown: None,
            join: None,
            #[cfg(unix)]
            hook: None,
        }
    }

    /// Whether a listener is active
    pub fn is_armed(&self) -> bool {
        self.join.is_some()
    }

    /// Stop listening for interrupts and reinstate the previous handler
    pub fn restore(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The listener may already be gone after an interrupt
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Failed to reset sigint interrupt handler.");
            } else {
                debug!("sigint handler restored");
            }
        }
        // The listener thread held the other reference
        #[cfg(unix)]
        drop(self.hook.take());
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

#[cfg(unix)]
mod hook {
    use nix::libc::c_int;
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;
    use tracing::{debug, warn};

    const POLL_INTERVAL: Duration = Duration::from_millis(25);

    /// SIGINTs received while the handler was installed
    static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);

    static HOOK: Mutex<HookState> = Mutex::new(HookState {
        users: 0,
        previous: None,
    });

    struct HookState {
        users: usize,
        previous: Option<SigAction>,
    }

    extern "C" fn on_sigint(_: c_int) {
        INTERRUPTS.fetch_add(1, Ordering::SeqCst);
    }

    /// One user of the process-wide SIGINT handler
    ///
    /// The first user installs the handler, the last one to drop reinstates
    /// whatever was there before.
    pub(super) struct SigintHook {
        seen: usize,
    }

    impl SigintHook {
        pub(super) fn install() -> nix::Result<Self> {
            let mut state = HOOK.lock().unwrap_or_else(PoisonError::into_inner);
            if state.users == 0 {
                let action = SigAction::new(SigHandler::Handler(on_sigint), SaFlags::SA_RESTART, SigSet::empty());
                // SAFETY: the handler only increments an atomic counter
                let previous = unsafe { sigaction(Signal::SIGINT, &action) }?;
                state.previous = Some(previous);
            }
            state.users += 1;
            Ok(Self {
                seen: INTERRUPTS.load(Ordering::SeqCst),
            })
        }

        fn interrupted(&self) -> bool {
            INTERRUPTS.load(Ordering::SeqCst) != self.seen
        }

        /// Resolves on the first SIGINT after installation
        pub(super) async fn wait(&self) -> io::Result<()> {
            let mut tick = tokio::time::interval(POLL_INTERVAL);
            loop {
                tick.tick().await;
                if self.interrupted() {
                    return Ok(());
                }
            }
        }
    }

    impl Drop for SigintHook {
        fn drop(&mut self) {
            let mut state = HOOK.lock().unwrap_or_else(PoisonError::into_inner);
            state.users = state.users.saturating_sub(1);
            if state.users > 0 {
                return;
            }
            if let Some(previous) = state.previous.take() {
                // SAFETY: reinstates the disposition saved at installation
                match unsafe { sigaction(Signal::SIGINT, &previous) } {
                    Ok(_) => debug!("previous sigint disposition reinstated"),
                    Err(e) => warn!(error = %e, "Failed to reset sigint interrupt handler."),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_interrupt_invokes_callback() {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let guard = SignalGuard::install_with(
            || async { Ok(()) },
            move || {
                tx.send(()).unwrap();
            },
        );

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        guard.restore();
    }

    #[test]
    fn test_restore_without_interrupt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let guard = SignalGuard::install_with(
            || std::future::pending::<io::Result<()>>(),
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(guard.is_armed());
        guard.restore();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_error_is_not_fatal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let guard = SignalGuard::install_with(
            || async { Err(io::Error::new(io::ErrorKind::Other, "no signals here")) },
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        guard.restore();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_releases_listener() {
        let guard = SignalGuard::install_with(|| std::future::pending::<io::Result<()>>(), || {});
        drop(guard);
    }

    #[cfg(unix)]
    const SIGINT_CHILD_ENV: &str = "DISTFUNC_SIGINT_CHILD";

    /// Body of the child process: a routed SIGINT reaches the callback, and
    /// once the guard is restored SIGINT terminates the process again
    #[cfg(unix)]
    fn sigint_child() -> ! {
        use nix::sys::signal::{raise, Signal};

        let (tx, rx) = crossbeam::channel::bounded(1);
        let guard = CtrlC.arm(Box::new(move || {
            let _ = tx.send(());
        }));
        assert!(guard.is_armed());

        raise(Signal::SIGINT).unwrap();
        if rx.recv_timeout(Duration::from_secs(5)).is_err() {
            std::process::exit(3);
        }
        guard.restore();

        raise(Signal::SIGINT).unwrap();
        std::thread::sleep(Duration::from_millis(500));
        // Still alive: SIGINT is swallowed after restore
        std::process::exit(4);
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_reinstates_default_sigint() {
        use std::os::unix::process::ExitStatusExt;

        if std::env::var_os(SIGINT_CHILD_ENV).is_some() {
            sigint_child();
        }

        let status = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "signal::tests::test_restore_reinstates_default_sigint",
                "--test-threads=1",
                "--nocapture",
            ])
            .env(SIGINT_CHILD_ENV, "1")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap();

        assert_eq!(status.code(), None, "child exited normally: {:?}", status);
        assert_eq!(status.signal(), Some(nix::libc::SIGINT));
    }
}
