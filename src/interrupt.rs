use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

/// Process-wide cooperative-cancellation flag.
///
/// `raise` bumps an epoch counter alongside the flag so the interpreter's
/// per-operation probe stays a single relaxed load; blocking host bindings
/// poll the full flag through `wait_interruptible` instead of sleeping
/// uninterruptibly. An optional host-provided emergency-shutdown flag is
/// folded into `is_raised` so a global shutdown cancels any in-flight script.
pub struct InterruptSignal {
    raised: AtomicBool,
    epoch: AtomicU64,
    emergency: OnceLock<Arc<AtomicBool>>,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self { raised: AtomicBool::new(false), epoch: AtomicU64::new(0), emergency: OnceLock::new() }
    }

    pub fn bind_emergency_shutdown(&self, flag: Arc<AtomicBool>) {
        if self.emergency.set(flag).is_err() {
            warn!("emergency shutdown flag already bound; ignoring rebind");
        }
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::Relaxed);
    }

    /// Rearms the signal for a new run. The emergency flag is host state and
    /// is deliberately left untouched.
    pub fn reset(&self) {
        self.raised.store(false, Ordering::Release);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    pub fn is_raised(&self) -> bool {
        if self.raised.load(Ordering::Acquire) {
            return true;
        }
        self.emergency.get().map_or(false, |flag| flag.load(Ordering::Acquire))
    }

    /// Sleeps for `total` in `step`-sized slices, bailing out as soon as the
    /// signal is raised. Returns `true` when the full wait elapsed
    /// uninterrupted.
    pub fn wait_interruptible(&self, total: Duration, step: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.is_raised() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(step));
        }
    }
}

impl Default for InterruptSignal {
    fn default() -> Self {
        Self::new()
    }
}
