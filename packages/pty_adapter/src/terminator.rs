use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use crate::error::TerminateError;

/// Which termination signal to deliver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TerminateSignal {
    /// Ask the process to exit, letting it clean up
    #[default]
    Term,
    /// End the process immediately
    Kill,
}

impl TerminateSignal {
    pub fn is_forceful(self) -> bool {
        matches!(self, TerminateSignal::Kill)
    }
}

impl fmt::Display for TerminateSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminateSignal::Term => write!(f, "SIGTERM"),
            TerminateSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

impl FromStr for TerminateSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TERM" | "SIGTERM" => Ok(TerminateSignal::Term),
            "KILL" | "SIGKILL" => Ok(TerminateSignal::Kill),
            other => Err(format!("Unsupported signal: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TerminateOptions {
    /// Signal every descendant of the process as well
    pub include_descendant_tree: bool,
    /// Hard kill instead of a graceful terminate
    pub force_kill: bool,
}

impl TerminateOptions {
    /// Whole-tree termination with the given signal
    pub fn tree(signal: TerminateSignal) -> Self {
        Self {
            include_descendant_tree: true,
            force_kill: signal.is_forceful(),
        }
    }
}

/// Delivers termination signals to a process (and optionally its descendants).
/// Resolves once delivery has succeeded or failed; it does not wait for the
/// processes to actually exit.
pub trait ProcessTerminator: Send + Sync {
    fn terminate(
        &self,
        pid: u32,
        options: TerminateOptions,
    ) -> impl Future<Output = Result<(), TerminateError>> + Send;
}

/// Signals a process tree found by walking the OS process table
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeTerminator;

impl ProcessTerminator for TreeTerminator {
    async fn terminate(&self, pid: u32, options: TerminateOptions) -> Result<(), TerminateError> {
        tokio::task::spawn_blocking(move || signal_tree(pid, options))
            .await
            .map_err(|e| TerminateError::Unavailable(e.to_string()))?
    }
}

fn signal_tree(pid: u32, options: TerminateOptions) -> Result<(), TerminateError> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let root = Pid::from_u32(pid);
    if system.process(root).is_none() {
        return Err(TerminateError::NotFound(pid));
    }

    let targets = if options.include_descendant_tree {
        collect_tree(&system, root)
    } else {
        vec![root]
    };

    for (index, target) in targets.iter().enumerate() {
        if let Err(message) = send_signal(&system, *target, options.force_kill) {
            if index == 0 {
                return Err(TerminateError::Signal { pid, message });
            }
            // Descendants routinely exit on their own once the root goes
            debug!("Skipping descendant {} of {}: {}", target, pid, message);
        }
    }

    Ok(())
}

/// `root` followed by its descendants, breadth-first
pub(crate) fn collect_tree(system: &System, root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut tree = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if tree.contains(&pid) {
            continue;
        }
        tree.push(pid);
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }
    tree
}

#[cfg(unix)]
fn send_signal(_system: &System, pid: Pid, force: bool) -> Result<(), String> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid as NixPid;

    let signal = if force {
        Signal::SIGKILL
    } else {
        Signal::SIGTERM
    };
    kill(NixPid::from_raw(pid.as_u32() as i32), signal).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn send_signal(system: &System, pid: Pid, force: bool) -> Result<(), String> {
    let process = system
        .process(pid)
        .ok_or_else(|| "no such process".to_string())?;
    let signal = if force {
        sysinfo::Signal::Kill
    } else {
        sysinfo::Signal::Term
    };
    match process.kill_with(signal) {
        Some(true) => Ok(()),
        Some(false) => Err(format!("{:?} was not delivered", signal)),
        // Platform has no such signal; fall back to a plain kill
        None if process.kill() => Ok(()),
        None => Err("kill failed".to_string()),
    }
}
