pub mod bridge;
pub mod cli;
pub mod config;
pub(crate) mod context;
pub mod error;
pub mod interpreter;
pub mod interrupt;
pub mod panic_guard;
pub mod supervisor;
pub(crate) mod terminate;
pub(crate) mod watchdog;

pub use bridge::CallBridge;
pub use config::{RuntimeConfig, RuntimeConfigOverrides};
pub use error::{RunError, SubmitError};
pub use interpreter::{BindingInstaller, EngineControl, HostHandles};
pub use interrupt::InterruptSignal;
pub use panic_guard::{run_protected, FatalFault};
pub use supervisor::{ErrorReport, ScriptRuntime};
