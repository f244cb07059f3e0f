use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::context::RunShared;
use crate::interrupt::InterruptSignal;
use crate::terminate::{stop_run, StopTrigger, StopWindows};

/// Timer thread bound 1:1 to the active run. Wakes every poll period, and on
/// deadline expiry drives the same forced-termination path as an explicit
/// stop. Exits on its own once the run finishes.
pub(crate) struct Watchdog {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    poll: Duration,
}

impl Watchdog {
    pub(crate) fn start(
        shared: Arc<RunShared>,
        interrupt: Arc<InterruptSignal>,
        timeout: Duration,
        poll: Duration,
        windows: StopWindows,
    ) -> Option<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let builder = thread::Builder::new().name("script-watchdog".to_string());
        let spawned = builder.spawn(move || {
            loop {
                if stop_flag.load(Ordering::Acquire) || shared.is_finished() {
                    break;
                }
                thread::sleep(poll);
                if stop_flag.load(Ordering::Acquire) || shared.is_finished() {
                    break;
                }
                if shared.elapsed() >= timeout {
                    warn!("script exceeded its {:.1}s budget; terminating", timeout.as_secs_f64());
                    stop_run(&shared, &interrupt, &windows, StopTrigger::Watchdog);
                    break;
                }
            }
        });
        match spawned {
            Ok(handle) => Some(Self { stop, thread: Some(handle), poll }),
            Err(err) => {
                error!("failed to spawn watchdog thread: {err}");
                None
            }
        }
    }

    /// Signals the timer thread and joins it with a bounded wait; detaches
    /// instead of blocking teardown if it will not exit in time.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let deadline = Instant::now() + self.poll + Duration::from_millis(250);
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("watchdog thread did not exit in time; detaching");
                drop(handle);
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
