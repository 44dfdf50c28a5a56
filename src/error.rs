//! Error types
//!
//! Each layer of the adapter reports failures through its own enum:
//!
//! - [`SessionError`]: lifecycle misuse and failures of session operations
//! - [`SurfaceError`]: the mount target refused or failed an operation
//! - [`EmulatorError`]: the screen buffer could not be (re)allocated
//! - [`SendError`]: a queued write was never flushed

use std::fmt;

use thiserror::Error;

/// Lifecycle state of a [`crate::TerminalSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not attached to any node
    Created,
    /// Rendering into a mount node
    Mounted,
    /// Released; no further operation is valid
    Disposed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Mounted => "mounted",
            LifecycleState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{operation} requires a mounted session (session is {state})")]
    NotMounted {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("Session is already mounted")]
    AlreadyMounted,

    #[error("Session has been disposed")]
    Disposed,

    #[error("Mount target error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("Screen buffer error: {0}")]
    Emulator(#[from] EmulatorError),
}

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("Mount target already hosts a terminal")]
    AlreadyHosting,

    #[error("Mount target is not attached")]
    NotAttached,

    #[error("Failed to draw to the console: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    #[error("Invalid terminal size {cols}x{rows}")]
    InvalidSize { cols: u16, rows: u16 },

    #[error("Screen buffer of {cols}x{rows} exceeds the limit of {limit} cells")]
    BufferTooLarge { cols: u16, rows: u16, limit: usize },
}

/// Outcome of a write that did not complete
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("Session disposed before the write was flushed")]
    Disposed,

    #[error("Write was abandoned without being flushed")]
    Abandoned,
}

pub type Result<T> = std::result::Result<T, SessionError>;
