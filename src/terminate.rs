use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::StopConfig;
use crate::context::RunShared;
use crate::interrupt::InterruptSignal;

#[derive(Debug, Clone, Copy)]
pub(crate) struct StopWindows {
    pub(crate) grace: Duration,
    pub(crate) poll: Duration,
    pub(crate) join: Duration,
}

impl From<&StopConfig> for StopWindows {
    fn from(config: &StopConfig) -> Self {
        Self {
            grace: Duration::from_millis(config.grace_window_ms),
            poll: Duration::from_millis(config.poll_step_ms.max(1)),
            join: Duration::from_millis(config.detach_join_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopTrigger {
    User,
    Watchdog,
}

/// Escalation ladder shared by explicit stops and watchdog expiry:
/// cooperative interrupt, grace-window poll, forced interpreter close, then
/// bounded join with detach as the last resort. Total time is bounded by
/// `grace + join` plus poll slop regardless of what the worker is doing.
///
/// The watchdog skips the grace poll: its deadline already was the grace.
pub(crate) fn stop_run(shared: &RunShared, interrupt: &InterruptSignal, windows: &StopWindows, trigger: StopTrigger) {
    if shared.is_finished() {
        return;
    }

    // The watchdog's verdict is recorded up front so the run is labeled by
    // its real cause even if the worker notices the interrupt first.
    if trigger == StopTrigger::Watchdog {
        shared.set_timed_out();
        shared.record_error(format!("terminated by watchdog after {:.1}s", shared.elapsed().as_secs_f64()));
    }

    // stage 1: cooperative
    shared.request_terminate();
    interrupt.raise();

    // stage 2: grace window
    if trigger == StopTrigger::User {
        let deadline = Instant::now() + windows.grace;
        while !shared.is_finished() && Instant::now() < deadline {
            thread::sleep(windows.poll);
        }
    }

    // stage 3: forced teardown. Closing the control block is safe against a
    // worker still mid-eval; its next interpreter step fails loudly instead.
    if !shared.is_finished() {
        warn!("script did not stop cooperatively; forcing interpreter teardown");
        shared.control().close();
        if trigger == StopTrigger::User {
            shared.record_error("script terminated".to_string());
        }
        shared.mark_finished();
    }

    // stage 4: bounded join, then detach rather than hang. Abandoning a stuck
    // worker leaks a thread until it exits on its own; that is the accepted
    // cost of keeping the caller responsive.
    if let Some(handle) = shared.take_worker() {
        let deadline = Instant::now() + windows.join;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(windows.poll);
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                debug!("script worker ended in a captured fault");
            }
        } else {
            warn!("script worker still blocked after teardown; detaching thread");
            drop(handle);
        }
    }
}
