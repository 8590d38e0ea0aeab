use std::io;

use thiserror::Error;

/// Spawning a PTY process failed. This is the only error the adapter surfaces
/// to its caller; everything else is reported as a `false` result.
#[derive(Debug, Error)]
#[error("Failed to spawn PTY process: {message}")]
pub struct AllocationError {
    /// The underlying allocator's failure text, unmodified
    pub message: String,
}

impl AllocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for AllocationError {
    fn from(err: anyhow::Error) -> Self {
        // `{:#}` keeps the context chain on one line
        AllocationError::new(format!("{:#}", err))
    }
}

/// Errors writing to a terminal's input channel
#[derive(Debug, Error)]
pub enum WriteError {
    /// The child was already observed to have exited
    #[error("PTY process has exited")]
    ProcessExited,
    #[error("Failed to write to PTY: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the process terminator
#[derive(Debug, Error)]
pub enum TerminateError {
    #[error("No such process: {0}")]
    NotFound(u32),
    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },
    #[error("Process terminator unavailable: {0}")]
    Unavailable(String),
}

/// Errors from handle operations other than write
#[derive(Debug, Error)]
pub enum PtyError {
    /// The handle is not backed by a real pseudo-terminal
    #[error("Terminal handle has no PTY attached")]
    Detached,
    #[error("Failed to resize PTY: {0}")]
    ResizeFailed(String),
    #[error("Failed to read from PTY: {0}")]
    ReadFailed(String),
    #[error("Failed to wait for PTY process: {0}")]
    WaitFailed(String),
}
