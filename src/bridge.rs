use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::error::SubmitError;
use crate::panic_guard;

enum CommandState {
    Pending,
    Done,
    Failed(String),
    Cancelled,
}

struct CommandSignal {
    state: Mutex<CommandState>,
    done: Condvar,
}

impl CommandSignal {
    fn new() -> Self {
        Self { state: Mutex::new(CommandState::Pending), done: Condvar::new() }
    }

    // First terminal state wins; a late completion after a cancel is a no-op.
    fn complete(&self, outcome: CommandState) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, CommandState::Pending) {
            *state = outcome;
        }
        drop(state);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<(), SubmitError> {
        let mut state = self.state.lock().unwrap();
        loop {
            match &*state {
                CommandState::Pending => state = self.done.wait(state).unwrap(),
                CommandState::Done => return Ok(()),
                CommandState::Failed(message) => return Err(SubmitError::Failed(message.clone())),
                CommandState::Cancelled => return Err(SubmitError::ShutDown),
            }
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<(), SubmitError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            match &*state {
                CommandState::Pending => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(SubmitError::Timeout);
                    }
                    let (next, _) = self.done.wait_timeout(state, remaining).unwrap();
                    state = next;
                }
                CommandState::Done => return Ok(()),
                CommandState::Failed(message) => return Err(SubmitError::Failed(message.clone())),
                CommandState::Cancelled => return Err(SubmitError::ShutDown),
            }
        }
    }
}

type Job = Box<dyn FnOnce() + Send>;

struct Command {
    job: Job,
    signal: Arc<CommandSignal>,
}

impl Command {
    fn execute(self) {
        let Command { job, signal } = self;
        match panic_guard::run_protected(job) {
            Ok(()) => signal.complete(CommandState::Done),
            Err(fault) => {
                warn!("bridged command failed: {}", fault.message);
                signal.complete(CommandState::Failed(fault.message));
            }
        }
    }

    fn cancel(self) {
        self.signal.complete(CommandState::Cancelled);
    }
}

struct BridgeState {
    queue: VecDeque<Command>,
    shut_down: bool,
}

/// FIFO queue that funnels work from arbitrary threads onto the single owner
/// thread. Any submit variant called from the owner thread runs the work
/// inline, so owner-side code can use the same entry points without
/// deadlocking or waiting for a drain.
pub struct CallBridge {
    state: Mutex<BridgeState>,
    pending: Condvar,
    owner: ThreadId,
    draining: AtomicBool,
}

impl CallBridge {
    /// Must be constructed on the owner thread; that thread's identity is the
    /// drain permission.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BridgeState { queue: VecDeque::new(), shut_down: false }),
            pending: Condvar::new(),
            owner: thread::current().id(),
            draining: AtomicBool::new(false),
        }
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().unwrap().shut_down
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Fire-and-forget submission. Silently a no-op once the bridge is shut
    /// down; runs inline when already on the owner thread.
    pub fn submit_async<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_owner_thread() {
            if self.is_shut_down() {
                return;
            }
            if let Err(fault) = panic_guard::run_protected(work) {
                warn!("inline command failed: {}", fault.message);
            }
            return;
        }
        let _ = self.enqueue(Box::new(work));
    }

    /// Runs `work` on the owner thread and blocks until it completes,
    /// returning its value. Inline (and non-blocking) when called from the
    /// owner thread itself.
    pub fn submit_blocking<R, F>(&self, work: F) -> Result<R, SubmitError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_owner_thread() {
            if self.is_shut_down() {
                return Err(SubmitError::ShutDown);
            }
            return Ok(work());
        }
        let slot: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));
        let signal = self.enqueue({
            let slot = Arc::clone(&slot);
            Box::new(move || {
                let value = work();
                *slot.lock().unwrap() = Some(value);
            })
        })?;
        signal.wait()?;
        let value = slot.lock().unwrap().take();
        value.ok_or_else(|| SubmitError::Failed("command completed without producing a result".to_string()))
    }

    /// Like `submit_blocking`, but gives up waiting after `timeout`. The
    /// command may still execute later; a timed-out caller must not assume it
    /// never ran.
    pub fn submit_blocking_with_timeout<R, F>(&self, work: F, timeout: Duration) -> Result<R, SubmitError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_owner_thread() {
            if self.is_shut_down() {
                return Err(SubmitError::ShutDown);
            }
            return Ok(work());
        }
        let slot: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));
        let signal = self.enqueue({
            let slot = Arc::clone(&slot);
            Box::new(move || {
                let value = work();
                *slot.lock().unwrap() = Some(value);
            })
        })?;
        signal.wait_timeout(timeout)?;
        let value = slot.lock().unwrap().take();
        value.ok_or_else(|| SubmitError::Failed("command completed without producing a result".to_string()))
    }

    fn enqueue(&self, job: Job) -> Result<Arc<CommandSignal>, SubmitError> {
        let mut state = self.state.lock().unwrap();
        if state.shut_down {
            return Err(SubmitError::ShutDown);
        }
        let signal = Arc::new(CommandSignal::new());
        state.queue.push_back(Command { job, signal: Arc::clone(&signal) });
        drop(state);
        self.pending.notify_all();
        Ok(signal)
    }

    /// Blocks the owner thread until a command is pending, the bridge shuts
    /// down, or `timeout` elapses. Returns whether work is pending.
    pub fn wait_pending(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        if !state.queue.is_empty() || state.shut_down {
            return !state.queue.is_empty();
        }
        let (state, _) = self.pending.wait_timeout(state, timeout).unwrap();
        !state.queue.is_empty()
    }

    /// Pops and executes queued commands until the queue is empty or shutdown
    /// is observed. A failing command is logged and never aborts the drain.
    pub fn drain_all(&self) {
        if !self.is_owner_thread() {
            error!("drain_all called off the owner thread; ignoring");
            return;
        }
        if self.draining.swap(true, Ordering::Acquire) {
            return;
        }
        loop {
            let command = {
                let mut state = self.state.lock().unwrap();
                if state.shut_down {
                    None
                } else {
                    state.queue.pop_front()
                }
            };
            match command {
                Some(command) => command.execute(),
                None => break,
            }
        }
        self.draining.store(false, Ordering::Release);
    }

    /// Executes at most one queued command; returns whether one ran. Useful
    /// for frame-budgeted processing on the owner thread.
    pub fn drain_one(&self) -> bool {
        if !self.is_owner_thread() {
            error!("drain_one called off the owner thread; ignoring");
            return false;
        }
        if self.draining.swap(true, Ordering::Acquire) {
            return false;
        }
        let command = {
            let mut state = self.state.lock().unwrap();
            if state.shut_down {
                None
            } else {
                state.queue.pop_front()
            }
        };
        let executed = match command {
            Some(command) => {
                command.execute();
                true
            }
            None => false,
        };
        self.draining.store(false, Ordering::Release);
        executed
    }

    /// Rejects all future submissions and cancels everything still queued so
    /// no blocked caller is left waiting. Idempotent.
    pub fn shutdown(&self) {
        let cancelled: Vec<Command> = {
            let mut state = self.state.lock().unwrap();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.queue.drain(..).collect()
        };
        let dropped = cancelled.len();
        for command in cancelled {
            command.cancel();
        }
        self.pending.notify_all();
        if dropped > 0 {
            warn!("bridge shut down with {dropped} queued commands discarded");
        }
    }
}

impl Default for CallBridge {
    fn default() -> Self {
        Self::new()
    }
}
