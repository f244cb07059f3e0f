use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

/// A fault the interpreter could not recover from on its own.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FatalFault {
    pub message: String,
}

/// Recovery anchor for interpreter execution: runs `f` and converts a panic
/// raised anywhere beneath it into a `FatalFault` instead of unwinding into
/// the caller. Installed once per run at the worker-thread root; after a
/// fault the interpreter instance must be discarded, never reused.
pub fn run_protected<T>(f: impl FnOnce() -> T) -> Result<T, FatalFault> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| FatalFault { message: panic_message(payload) })
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unrecoverable interpreter fault".to_string()
    }
}
