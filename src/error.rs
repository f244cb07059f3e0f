use thiserror::Error;

/// Failure modes for work handed to the owner thread.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("call bridge is shut down")]
    ShutDown,
    #[error("timed out waiting for the owner thread")]
    Timeout,
    #[error("command failed on the owner thread: {0}")]
    Failed(String),
}

/// Failure modes for starting a script run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("a script run is already active")]
    AlreadyRunning,
    #[error("failed to spawn script worker: {0}")]
    SpawnFailed(String),
}
