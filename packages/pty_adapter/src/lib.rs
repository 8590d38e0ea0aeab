//! PTY Adapter - spawn, write to and terminate PTY-backed processes
//!
//! A thin layer over a native pseudo-terminal allocator and a process-tree
//! terminator. It keeps no per-process state: each [`TerminalHandle`] belongs
//! to the caller. Spawn failures are returned as [`AllocationError`]; write and
//! terminate failures are logged and reported as `false`.
//!
//! # Example
//!
//! ```no_run
//! use pty_adapter::{PtyAdapter, SpawnRequest, TerminateSignal};
//!
//! #[tokio::main]
//! async fn main() {
//!     let adapter = PtyAdapter::new();
//!
//!     let request = SpawnRequest::new("/bin/bash")
//!         .cwd("/tmp")
//!         .inherit_env()
//!         .label("shell");
//!
//!     let mut handle = adapter.spawn(request).unwrap();
//!
//!     adapter.write(&mut handle, "echo hello\n", "shell");
//!
//!     adapter
//!         .terminate(&handle, "shell", TerminateSignal::Term)
//!         .await;
//! }
//! ```

mod adapter;
mod diagnostics;
mod error;
mod handle;
mod request;
mod terminator;

pub use adapter::{PtyAdapter, kill_pty_process, spawn_pty_process, write_to_pty};
pub use diagnostics::{Diagnostics, TracingDiagnostics};
pub use error::{AllocationError, PtyError, TerminateError, WriteError};
pub use handle::{ENCODING, TerminalHandle};
pub use portable_pty::ExitStatus;
pub use request::{DEFAULT_COLS, DEFAULT_ROWS, SpawnRequest, TERMINAL_NAME, TerminalSize};
pub use terminator::{ProcessTerminator, TerminateOptions, TerminateSignal, TreeTerminator};
