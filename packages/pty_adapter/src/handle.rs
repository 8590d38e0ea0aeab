use portable_pty::{Child, ExitStatus, MasterPty, PtySize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{PtyError, WriteError};
use crate::request::TerminalSize;

/// Text encoding of everything written to and read from the terminal
pub const ENCODING: &str = "utf-8";

/// The OS-side halves of a real pseudo-terminal
pub(crate) struct PtyParts {
    pub(crate) master: Box<dyn MasterPty + Send>,
    pub(crate) child: Box<dyn Child + Send + Sync>,
}

/// One live PTY-backed process.
///
/// Owned by whoever spawned it. The pid is fixed at construction and is
/// meaningless once the process has been terminated.
pub struct TerminalHandle {
    pid: Option<u32>,
    writer: Box<dyn Write + Send>,
    pty: Option<PtyParts>,
    size: TerminalSize,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    exit_status: Option<ExitStatus>,
}

impl fmt::Debug for TerminalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalHandle")
            .field("pid", &self.pid)
            .field("size", &self.size)
            .field("cwd", &self.cwd)
            .field("attached", &self.pty.is_some())
            .field("exit_status", &self.exit_status)
            .finish_non_exhaustive()
    }
}

impl TerminalHandle {
    pub(crate) fn attached(
        parts: PtyParts,
        writer: Box<dyn Write + Send>,
        size: TerminalSize,
        cwd: PathBuf,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            pid: parts.child.process_id(),
            writer,
            pty: Some(parts),
            size,
            cwd: Some(cwd),
            env,
            exit_status: None,
        }
    }

    /// Build a handle that is not backed by a pseudo-terminal. Writes go to
    /// `writer`; resize, read and wait report [`PtyError::Detached`].
    pub fn from_parts(pid: Option<u32>, writer: Box<dyn Write + Send>, size: TerminalSize) -> Self {
        Self {
            pid,
            writer,
            pty: None,
            size,
            cwd: None,
            env: BTreeMap::new(),
            exit_status: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn size(&self) -> TerminalSize {
        self.size
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn encoding(&self) -> &'static str {
        ENCODING
    }

    /// Write `data` verbatim and flush. Returns the number of bytes written.
    pub fn write_str(&mut self, data: &str) -> Result<usize, WriteError> {
        if self.try_wait().is_some() {
            return Err(WriteError::ProcessExited);
        }
        self.writer.write_all(data.as_bytes())?;
        self.writer.flush()?;
        Ok(data.len())
    }

    /// A blocking reader over the terminal's output. Hits EOF once the child
    /// and every process holding the slave side have exited.
    pub fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        let pty = self.pty.as_ref().ok_or(PtyError::Detached)?;
        pty.master
            .try_clone_reader()
            .map_err(|e| PtyError::ReadFailed(e.to_string()))
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let size = TerminalSize::new(cols, rows);
        if !size.is_valid() {
            return Err(PtyError::ResizeFailed(format!(
                "invalid size {}x{}",
                cols, rows
            )));
        }
        let pty = self.pty.as_ref().ok_or(PtyError::Detached)?;
        pty.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;
        self.size = size;
        Ok(())
    }

    /// Non-blocking exit check. The first observed status is kept.
    pub fn try_wait(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_none() {
            if let Some(pty) = self.pty.as_mut() {
                if let Ok(Some(status)) = pty.child.try_wait() {
                    self.exit_status = Some(status);
                }
            }
        }
        self.exit_status.clone()
    }

    pub fn has_exited(&mut self) -> bool {
        self.try_wait().is_some()
    }

    /// Block until the child exits and return its exit code.
    pub fn wait(&mut self) -> Result<u32, PtyError> {
        if let Some(status) = &self.exit_status {
            return Ok(status.exit_code());
        }
        let pty = self.pty.as_mut().ok_or(PtyError::Detached)?;
        let status = pty
            .child
            .wait()
            .map_err(|e| PtyError::WaitFailed(e.to_string()))?;
        let code = status.exit_code();
        self.exit_status = Some(status);
        Ok(code)
    }
}
