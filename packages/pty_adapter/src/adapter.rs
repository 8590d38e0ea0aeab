use anyhow::Context;
use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use std::path::MAIN_SEPARATOR;

use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::error::AllocationError;
use crate::handle::{PtyParts, TerminalHandle};
use crate::request::{SpawnRequest, TERMINAL_NAME};
use crate::terminator::{ProcessTerminator, TerminateOptions, TerminateSignal, TreeTerminator};

/// Searched for bare command names when neither the request nor this process has `PATH`
const FALLBACK_PATH: &str = "/usr/bin:/bin";

/// Spawns, writes to and terminates PTY-backed processes.
///
/// Holds no per-process state: every [`TerminalHandle`] it returns belongs to
/// the caller, and operations on different handles never interact.
#[derive(Clone, Debug, Default)]
pub struct PtyAdapter<T = TreeTerminator, D = TracingDiagnostics> {
    terminator: T,
    diagnostics: D,
}

impl PtyAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: ProcessTerminator, D: Diagnostics> PtyAdapter<T, D> {
    pub fn with_parts(terminator: T, diagnostics: D) -> Self {
        Self {
            terminator,
            diagnostics,
        }
    }

    pub fn terminator(&self) -> &T {
        &self.terminator
    }

    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    /// Open a pseudo-terminal and start `request.command` on its slave side.
    ///
    /// Failures are logged and returned as-is; nothing is retried.
    pub fn spawn(&self, request: SpawnRequest) -> Result<TerminalHandle, AllocationError> {
        match allocate(&request) {
            Ok(handle) => {
                let pid = handle
                    .pid()
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                self.diagnostics.debug(
                    &request.label,
                    &format!("PTY process spawned with PID: {}", pid),
                );
                Ok(handle)
            }
            Err(err) => {
                self.diagnostics.warn(&request.label, &err.to_string(), None);
                Err(err)
            }
        }
    }

    /// Forward `data` to the terminal's input. A closed channel or an exited
    /// process yields `false`, never an error.
    ///
    /// The write blocks while the pty input buffer is full, which happens when
    /// the child stops reading its input.
    pub fn write(&self, handle: &mut TerminalHandle, data: &str, label: &str) -> bool {
        match handle.write_str(data) {
            Ok(_) => {
                self.diagnostics.debug(
                    label,
                    &format!("Wrote to PTY: {} chars", data.chars().count()),
                );
                true
            }
            Err(err) => {
                let pid = handle
                    .pid()
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                self.diagnostics.warn(
                    label,
                    &format!("Failed to write to PTY process {}", pid),
                    Some(&err),
                );
                false
            }
        }
    }

    /// Terminate the handle's process and its whole descendant tree.
    ///
    /// Resolves once the terminator has delivered (or failed to deliver) the
    /// signal. A handle without a pid is reported as a failure.
    pub async fn terminate(
        &self,
        handle: &TerminalHandle,
        label: &str,
        signal: TerminateSignal,
    ) -> bool {
        let Some(pid) = handle.pid() else {
            self.diagnostics.warn(
                label,
                "Attempted to kill PTY process, but PID is undefined.",
                None,
            );
            return false;
        };

        match self
            .terminator
            .terminate(pid, TerminateOptions::tree(signal))
            .await
        {
            Ok(()) => {
                self.diagnostics
                    .debug(label, &format!("Kill sent ({}) to {}", signal, pid));
                true
            }
            Err(err) => {
                self.diagnostics
                    .warn(label, "Process tree kill failed", Some(&err));
                false
            }
        }
    }

    /// [`PtyAdapter::terminate`] with the graceful signal
    pub async fn terminate_default(&self, handle: &TerminalHandle, label: &str) -> bool {
        self.terminate(handle, label, TerminateSignal::default())
            .await
    }
}

fn allocate(request: &SpawnRequest) -> Result<TerminalHandle, AllocationError> {
    if !request.size.is_valid() {
        return Err(AllocationError::new("columns and rows must be positive"));
    }

    // portable-pty would silently fall back to $HOME
    match std::fs::metadata(&request.cwd) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(AllocationError::new(format!(
                "{}: Not a directory",
                request.cwd.display()
            )));
        }
        Err(err) => {
            return Err(AllocationError::new(format!(
                "{}: {}",
                request.cwd.display(),
                err
            )));
        }
    }

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: request.size.rows,
            cols: request.size.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("Failed to open PTY")?;

    let mut cmd = CommandBuilder::new(resolve_command(request));
    cmd.args(&request.args);
    cmd.cwd(&request.cwd);
    cmd.env_clear();
    for (key, value) in &request.env {
        cmd.env(key, value);
    }
    cmd.env("TERM", TERMINAL_NAME);

    let child = pair.slave.spawn_command(cmd)?;
    // Only the child keeps the slave open, so readers see EOF when it exits
    drop(pair.slave);

    let writer = pair.master.take_writer()?;

    Ok(TerminalHandle::attached(
        PtyParts {
            master: pair.master,
            child,
        },
        writer,
        request.size,
        request.cwd.clone(),
        request.env.clone(),
    ))
}

/// With the environment replaced, the pty library only searches the request's
/// own `PATH`. Bare names are looked up here instead when the request has none.
fn resolve_command(request: &SpawnRequest) -> String {
    if request.env.contains_key("PATH") || request.command.contains(MAIN_SEPARATOR) {
        return request.command.clone();
    }
    let own_path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&own_path)
        .chain(std::env::split_paths(FALLBACK_PATH))
        .map(|dir| dir.join(&request.command))
        .find(|candidate| candidate.is_file())
        .map(|found| found.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.command.clone())
}

/// Spawn with a default adapter
pub fn spawn_pty_process(request: SpawnRequest) -> Result<TerminalHandle, AllocationError> {
    PtyAdapter::new().spawn(request)
}

/// Write with a default adapter
pub fn write_to_pty(handle: &mut TerminalHandle, data: &str, label: &str) -> bool {
    PtyAdapter::new().write(handle, data, label)
}

/// Terminate with a default adapter
pub async fn kill_pty_process(
    handle: &TerminalHandle,
    label: &str,
    signal: TerminateSignal,
) -> bool {
    PtyAdapter::new().terminate(handle, label, signal).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TerminateError;
    use crate::request::TerminalSize;
    use std::error::Error;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingDiagnostics {
        entries: Mutex<Vec<(&'static str, String, String)>>,
    }

    impl RecordingDiagnostics {
        fn entries(&self) -> Vec<(&'static str, String, String)> {
            self.entries.lock().unwrap().clone()
        }
    }

    impl Diagnostics for RecordingDiagnostics {
        fn debug(&self, label: &str, message: &str) {
            self.entries
                .lock()
                .unwrap()
                .push(("debug", label.to_string(), message.to_string()));
        }

        fn warn(&self, label: &str, message: &str, error: Option<&(dyn Error + 'static)>) {
            let message = match error {
                Some(err) => format!("{}: {}", message, err),
                None => message.to_string(),
            };
            self.entries
                .lock()
                .unwrap()
                .push(("warn", label.to_string(), message));
        }
    }

    #[derive(Default)]
    struct MockTerminator {
        calls: Mutex<Vec<(u32, TerminateOptions)>>,
        fail: bool,
    }

    impl ProcessTerminator for MockTerminator {
        async fn terminate(
            &self,
            pid: u32,
            options: TerminateOptions,
        ) -> Result<(), TerminateError> {
            self.calls.lock().unwrap().push((pid, options));
            if self.fail {
                Err(TerminateError::NotFound(pid))
            } else {
                Ok(())
            }
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pty closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn adapter() -> PtyAdapter<MockTerminator, Arc<RecordingDiagnostics>> {
        PtyAdapter::with_parts(
            MockTerminator::default(),
            Arc::new(RecordingDiagnostics::default()),
        )
    }

    fn detached(pid: Option<u32>, writer: impl Write + Send + 'static) -> TerminalHandle {
        TerminalHandle::from_parts(pid, Box::new(writer), TerminalSize::default())
    }

    #[test]
    fn write_logs_char_count() {
        let adapter = adapter();
        let mut handle = detached(Some(7), io::sink());

        assert!(adapter.write(&mut handle, "héllo\n", "session"));

        let entries = adapter.diagnostics().entries();
        assert_eq!(
            entries,
            vec![("debug", "session".to_string(), "Wrote to PTY: 6 chars".to_string())]
        );
    }

    #[test]
    fn empty_write_succeeds() {
        let adapter = adapter();
        let mut handle = detached(Some(7), io::sink());
        assert!(adapter.write(&mut handle, "", "session"));
    }

    #[test]
    fn failed_write_returns_false_with_pid() {
        let adapter = adapter();
        let mut handle = detached(Some(1234), BrokenPipe);

        assert!(!adapter.write(&mut handle, "echo hi\n", "session"));

        let entries = adapter.diagnostics().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "warn");
        assert!(entries[0].2.contains("Failed to write to PTY process 1234"));
        assert!(entries[0].2.contains("pty closed"));
    }

    #[tokio::test]
    async fn terminate_without_pid_skips_terminator() {
        let adapter = adapter();
        let handle = detached(None, io::sink());

        assert!(!adapter.terminate_default(&handle, "session").await);

        assert!(adapter.terminator().calls.lock().unwrap().is_empty());
        let entries = adapter.diagnostics().entries();
        assert_eq!(entries[0].0, "warn");
        assert!(entries[0].2.contains("PID is undefined"));
    }

    #[tokio::test]
    async fn terminate_passes_signal_kind_through() {
        let adapter = adapter();
        let handle = detached(Some(4321), io::sink());

        assert!(adapter.terminate(&handle, "a", TerminateSignal::Kill).await);
        assert!(adapter.terminate(&handle, "b", TerminateSignal::Term).await);
        assert!(adapter.terminate_default(&handle, "c").await);

        let calls = adapter.terminator().calls.lock().unwrap().clone();
        let forced: Vec<bool> = calls.iter().map(|(_, o)| o.force_kill).collect();
        assert_eq!(forced, vec![true, false, false]);
        assert!(calls
            .iter()
            .all(|(pid, o)| *pid == 4321 && o.include_descendant_tree));

        let entries = adapter.diagnostics().entries();
        assert_eq!(entries[0].2, "Kill sent (SIGKILL) to 4321");
        assert_eq!(entries[1].2, "Kill sent (SIGTERM) to 4321");
    }

    #[tokio::test]
    async fn terminator_failure_returns_false() {
        let adapter = PtyAdapter::with_parts(
            MockTerminator {
                fail: true,
                ..Default::default()
            },
            Arc::new(RecordingDiagnostics::default()),
        );
        let handle = detached(Some(99), io::sink());

        assert!(!adapter.terminate_default(&handle, "session").await);

        let entries = adapter.diagnostics().entries();
        assert_eq!(entries[0].0, "warn");
        assert!(entries[0].2.contains("No such process: 99"));
    }

    #[test]
    fn spawn_rejects_missing_cwd() {
        let adapter = adapter();
        let err = adapter
            .spawn(SpawnRequest::new("/bin/sh").cwd("/definitely/not/here"))
            .unwrap_err();

        assert!(err.message.starts_with("/definitely/not/here: "));
        assert!(err.to_string().starts_with("Failed to spawn PTY process: "));
        assert_eq!(adapter.diagnostics().entries()[0].0, "warn");
    }

    #[test]
    fn spawn_rejects_file_as_cwd() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = allocate(&SpawnRequest::new("/bin/sh").cwd(file.path())).unwrap_err();
        assert!(err.message.ends_with("Not a directory"));
    }

    #[cfg(unix)]
    #[test]
    fn bare_command_resolves_without_request_path() {
        let resolved = resolve_command(&SpawnRequest::new("sh"));
        assert!(resolved.ends_with("/sh"), "resolved to {resolved}");
        assert!(std::path::Path::new(&resolved).is_file());
    }

    #[test]
    fn request_path_or_explicit_path_is_left_alone() {
        let with_path = SpawnRequest::new("sh").env("PATH", "/opt/tools");
        assert_eq!(resolve_command(&with_path), "sh");

        let explicit = SpawnRequest::new("/bin/sh");
        assert_eq!(resolve_command(&explicit), "/bin/sh");
    }

    #[test]
    fn spawn_rejects_zero_size() {
        let adapter = adapter();
        let err = adapter
            .spawn(SpawnRequest::new("/bin/sh").size(0, 24).label("sized"))
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to spawn PTY process: columns and rows must be positive"
        );
        let entries = adapter.diagnostics().entries();
        assert_eq!(entries[0].0, "warn");
        assert_eq!(entries[0].1, "sized");
    }
}
