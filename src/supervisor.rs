use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::bridge::CallBridge;
use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::error::RunError;
use crate::interpreter::BindingInstaller;
use crate::interrupt::InterruptSignal;
use crate::terminate::{stop_run, StopTrigger, StopWindows};
use crate::watchdog::Watchdog;

/// Invoked on the owner thread (via the bridge) when a fatal interpreter
/// fault was recovered, so the host can display the failure.
pub type ErrorReport = Arc<dyn Fn(String) + Send + Sync>;

struct ActiveRun {
    context: Option<ExecutionContext>,
    watchdog: Option<Watchdog>,
}

/// Owns everything a script run needs: the interrupt signal, the single
/// active-run slot, the watchdog, and a reference to the call bridge. One
/// script runs at a time; a second start while a run is active fails rather
/// than queue.
pub struct ScriptRuntime {
    bridge: Arc<CallBridge>,
    interrupt: Arc<InterruptSignal>,
    config: RuntimeConfig,
    installer: Option<BindingInstaller>,
    error_report: Option<ErrorReport>,
    active: Mutex<ActiveRun>,
}

impl ScriptRuntime {
    pub fn new(bridge: Arc<CallBridge>, config: RuntimeConfig) -> Self {
        Self {
            bridge,
            interrupt: Arc::new(InterruptSignal::new()),
            config,
            installer: None,
            error_report: None,
            active: Mutex::new(ActiveRun { context: None, watchdog: None }),
        }
    }

    pub fn set_bindings(&mut self, installer: BindingInstaller) {
        self.installer = Some(installer);
    }

    pub fn set_error_report(&mut self, report: ErrorReport) {
        self.error_report = Some(report);
    }

    pub fn interrupt(&self) -> Arc<InterruptSignal> {
        Arc::clone(&self.interrupt)
    }

    pub fn bridge(&self) -> Arc<CallBridge> {
        Arc::clone(&self.bridge)
    }

    /// Starts a sandboxed run of `source` on a fresh worker thread with a
    /// fresh interpreter. Fails while a previous run occupies the slot, even
    /// a finished one that has not been reaped by `cleanup_if_finished`.
    pub fn run_script(&self, source: &str) -> Result<(), RunError> {
        let mut active = self.active.lock().unwrap();
        if active.context.is_some() {
            return Err(RunError::AlreadyRunning);
        }
        self.interrupt.reset();
        let context = ExecutionContext::spawn(
            source.to_string(),
            Arc::clone(&self.bridge),
            Arc::clone(&self.interrupt),
            self.installer.clone(),
            self.error_report.clone(),
        )?;
        active.watchdog = Watchdog::start(
            context.shared(),
            Arc::clone(&self.interrupt),
            self.config.watchdog_timeout(),
            self.config.watchdog_poll(),
            StopWindows::from(&self.config.stop),
        );
        active.context = Some(context);
        info!("script run started");
        Ok(())
    }

    /// Cooperative-then-forced stop of the current run. Returns within the
    /// configured grace and join windows regardless of worker behavior; a
    /// no-op when nothing is running.
    pub fn stop_current_run(&self) {
        let shared = {
            let active = self.active.lock().unwrap();
            active.context.as_ref().map(|context| context.shared())
        };
        if let Some(shared) = shared {
            stop_run(&shared, &self.interrupt, &StopWindows::from(&self.config.stop), StopTrigger::User);
        }
    }

    pub fn is_running(&self) -> bool {
        let active = self.active.lock().unwrap();
        active.context.as_ref().map_or(false, |context| context.shared().is_running())
    }

    pub fn is_finished(&self) -> bool {
        let active = self.active.lock().unwrap();
        active.context.as_ref().map_or(false, |context| context.shared().is_finished())
    }

    pub fn last_error(&self) -> Option<String> {
        let active = self.active.lock().unwrap();
        active.context.as_ref().and_then(|context| context.shared().last_error())
    }

    /// Whether the current (un-reaped) run was ended by the watchdog.
    pub fn timed_out(&self) -> bool {
        let active = self.active.lock().unwrap();
        active.context.as_ref().map_or(false, |context| context.shared().timed_out())
    }

    /// Polls until the current run finishes or `timeout` elapses. Returns
    /// `true` when no run is in flight afterwards.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let shared = {
            let active = self.active.lock().unwrap();
            active.context.as_ref().map(|context| context.shared())
        };
        let Some(shared) = shared else {
            return true;
        };
        let step = Duration::from_millis(self.config.stop.poll_step_ms.max(1));
        let deadline = Instant::now() + timeout;
        while !shared.is_finished() && Instant::now() < deadline {
            thread::sleep(step);
        }
        shared.is_finished()
    }

    /// Reaps a finished run (joins the worker, stops the watchdog, frees the
    /// slot) so the next `run_script` can proceed. Returns `false` while a
    /// run is still live, `true` once the slot is free.
    pub fn cleanup_if_finished(&self) -> bool {
        let mut active = self.active.lock().unwrap();
        let finished = match &active.context {
            None => return true,
            Some(context) => context.shared().is_finished(),
        };
        if !finished {
            return false;
        }
        if let Some(mut watchdog) = active.watchdog.take() {
            watchdog.stop();
        }
        if let Some(context) = active.context.take() {
            context.reap();
        }
        true
    }
}
