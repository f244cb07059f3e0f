use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::bridge::CallBridge;
use crate::error::RunError;
use crate::interpreter::{BindingInstaller, EngineControl, EvalError, GuestEngine, HostHandles};
use crate::interrupt::InterruptSignal;
use crate::panic_guard;
use crate::supervisor::ErrorReport;

/// The half of a script run shared between the worker, the supervisor, the
/// watchdog, and the termination ladder.
pub(crate) struct RunShared {
    running: AtomicBool,
    finished: AtomicBool,
    should_terminate: AtomicBool,
    timed_out: AtomicBool,
    started: Instant,
    error: Mutex<Option<String>>,
    control: Arc<EngineControl>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RunShared {
    fn new(control: Arc<EngineControl>) -> Self {
        Self {
            running: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            should_terminate: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            started: Instant::now(),
            error: Mutex::new(None),
            control,
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Terminal transition; also reachable from outside the worker during
    /// forced teardown, so it must be safe to hit more than once.
    pub(crate) fn mark_finished(&self) {
        self.running.store(false, Ordering::Release);
        self.finished.store(true, Ordering::Release);
    }

    pub(crate) fn request_terminate(&self) {
        self.should_terminate.store(true, Ordering::Release);
    }

    pub(crate) fn set_timed_out(&self) {
        self.timed_out.store(true, Ordering::Release);
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    // First recorded error wins; later writers (e.g. the worker observing the
    // abort a stopper already explained) keep the original message.
    pub(crate) fn record_error(&self, message: String) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(message);
        }
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn control(&self) -> &Arc<EngineControl> {
        &self.control
    }

    pub(crate) fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker.lock().unwrap().take()
    }

    fn store_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().unwrap() = Some(handle);
    }
}

/// One in-flight script run: the shared state above plus ownership of the
/// worker thread. At most one exists at a time, enforced by the supervisor's
/// run slot.
pub(crate) struct ExecutionContext {
    shared: Arc<RunShared>,
}

impl ExecutionContext {
    pub(crate) fn spawn(
        source: String,
        bridge: Arc<CallBridge>,
        interrupt: Arc<InterruptSignal>,
        installer: Option<BindingInstaller>,
        error_report: Option<ErrorReport>,
    ) -> Result<Self, RunError> {
        let control = Arc::new(EngineControl::new(Arc::clone(&interrupt)));
        let shared = Arc::new(RunShared::new(Arc::clone(&control)));
        shared.running.store(true, Ordering::Release);

        let handles = HostHandles { bridge, interrupt, control };
        let worker_shared = Arc::clone(&shared);
        let builder = thread::Builder::new().name("script-worker".to_string());
        let handle = builder
            .spawn(move || run_worker(worker_shared, source, handles, installer, error_report))
            .map_err(|err| {
                shared.mark_finished();
                RunError::SpawnFailed(err.to_string())
            })?;
        shared.store_worker(handle);
        Ok(Self { shared })
    }

    pub(crate) fn shared(&self) -> Arc<RunShared> {
        Arc::clone(&self.shared)
    }

    /// Joins a worker that has already finished. A worker detached during
    /// forced teardown has no handle left and there is nothing to do.
    pub(crate) fn reap(self) {
        if let Some(handle) = self.shared.take_worker() {
            if handle.join().is_err() {
                // the recovery anchor already captured the fault text
                debug!("script worker terminated by panic");
            }
        }
    }
}

fn run_worker(
    shared: Arc<RunShared>,
    source: String,
    handles: HostHandles,
    installer: Option<BindingInstaller>,
    error_report: Option<ErrorReport>,
) {
    let outcome = panic_guard::run_protected(|| {
        let engine = GuestEngine::new(Arc::clone(shared.control()), &handles, installer.as_ref());
        engine.eval(&source)
    });
    match outcome {
        Ok(Ok(())) => debug!("script completed in {:.3}s", shared.elapsed().as_secs_f64()),
        Ok(Err(EvalError::Interrupted)) => {
            debug!("script interrupted");
            shared.record_error("script interrupted".to_string());
        }
        Ok(Err(EvalError::Script(message))) => {
            warn!("script error: {message}");
            shared.record_error(message);
        }
        Err(fault) => {
            error!("fatal interpreter fault: {}", fault.message);
            shared.record_error(format!("fatal interpreter fault: {}", fault.message));
            if let Some(report) = error_report {
                // best effort: the bridge may already be gone during teardown
                let message = fault.message;
                handles.bridge.submit_async(move || report(message));
            }
        }
    }
    // the engine is gone; anything still holding the control block must see
    // the handle as torn down
    shared.control().close();
    shared.mark_finished();
}
