use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult};
use thiserror::Error;
use tracing::debug;

use crate::bridge::CallBridge;
use crate::interrupt::InterruptSignal;

/// Shared control block for one interpreter instance. The engine itself is
/// confined to its worker thread; this block is the only part other threads
/// may touch. `close` is safe to call while the worker is mid-eval: the
/// progress hook and every well-behaved host binding observe it and fail the
/// current call instead of corrupting engine state.
pub struct EngineControl {
    closed: AtomicBool,
    armed_epoch: u64,
    interrupt: Arc<InterruptSignal>,
}

impl EngineControl {
    pub(crate) fn new(interrupt: Arc<InterruptSignal>) -> Self {
        Self { closed: AtomicBool::new(false), armed_epoch: interrupt.epoch(), interrupt }
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("interpreter handle closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn abort_requested(&self) -> bool {
        self.is_closed() || self.interrupt.is_raised()
    }

    // Per-operation probe: two relaxed loads on the fast path, with the full
    // flag check (which also covers emergency shutdown) every 64 operations.
    fn should_abort(&self, ops: u64) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return true;
        }
        if self.interrupt.epoch() != self.armed_epoch {
            return true;
        }
        (ops & 0x3f) == 0 && self.interrupt.is_raised()
    }
}

/// References a host binding needs to do its job: bridging work to the owner
/// thread, polling for cancellation, and checking its own engine's control
/// block.
#[derive(Clone)]
pub struct HostHandles {
    pub bridge: Arc<CallBridge>,
    pub interrupt: Arc<InterruptSignal>,
    pub control: Arc<EngineControl>,
}

/// Installs host functions into a fresh engine at run start.
pub type BindingInstaller = Arc<dyn Fn(&mut Engine, &HostHandles) + Send + Sync>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("script interrupted")]
    Interrupted,
    #[error("{0}")]
    Script(String),
}

/// One guest interpreter instance. Created fresh per run, never shared
/// between runs, and discarded wholesale after any fault.
pub struct GuestEngine {
    engine: Engine,
    control: Arc<EngineControl>,
}

impl GuestEngine {
    pub fn new(control: Arc<EngineControl>, handles: &HostHandles, installer: Option<&BindingInstaller>) -> Self {
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        let hook = Arc::clone(&control);
        engine.on_progress(move |ops| {
            if hook.should_abort(ops) {
                Some("aborted".into())
            } else {
                None
            }
        });
        if let Some(install) = installer {
            install(&mut engine, handles);
        }
        Self { engine, control }
    }

    pub fn control(&self) -> &Arc<EngineControl> {
        &self.control
    }

    /// Compiles and runs `source`. Syntax and runtime failures come back as
    /// `EvalError::Script`; an abort via the progress hook as
    /// `EvalError::Interrupted`.
    pub fn eval(&self, source: &str) -> Result<(), EvalError> {
        if self.control.is_closed() {
            return Err(EvalError::Interrupted);
        }
        match self.engine.eval::<Dynamic>(source) {
            Ok(_) => Ok(()),
            Err(err) => {
                if matches!(err.as_ref(), EvalAltResult::ErrorTerminated(..)) {
                    Err(EvalError::Interrupted)
                } else {
                    Err(EvalError::Script(err.to_string()))
                }
            }
        }
    }
}
