use anyhow::{Context, Result};
use clap::Parser;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use pty_adapter::{DEFAULT_COLS, DEFAULT_ROWS, PtyAdapter, SpawnRequest, TerminateSignal};

#[derive(Parser)]
#[command(name = "pty_run")]
#[command(about = "Run a command inside a pseudo-terminal and tear down its process tree")]
struct Args {
    /// Command to run
    command: String,

    /// Arguments for the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Working directory (defaults to the current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Terminal width in columns
    #[arg(long, default_value_t = DEFAULT_COLS)]
    cols: u16,

    /// Terminal height in rows
    #[arg(long, default_value_t = DEFAULT_ROWS)]
    rows: u16,

    /// Label attached to log lines
    #[arg(short, long, default_value = "pty_run")]
    label: String,

    /// Terminate the process tree after this many seconds
    #[arg(long)]
    kill_after: Option<u64>,

    /// Use SIGKILL instead of SIGTERM when terminating
    #[arg(long)]
    force: bool,

    /// Text written to the terminal once the process is up
    #[arg(short, long)]
    input: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the terminal output
    let default_filter = if args.debug {
        "pty_adapter=debug,pty_run=debug"
    } else {
        "pty_adapter=info,pty_run=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut request = SpawnRequest::new(&args.command)
        .args(&args.args)
        .inherit_env()
        .label(&args.label)
        .size(args.cols, args.rows);
    if let Some(cwd) = &args.cwd {
        request = request.cwd(cwd);
    }

    let adapter = PtyAdapter::new();
    let mut handle = adapter
        .spawn(request)
        .with_context(|| format!("Failed to start {}", args.command))?;
    info!("Running {} {:?} (pid {:?})", args.command, args.args, handle.pid());

    let mut reader = handle
        .try_clone_reader()
        .context("Failed to attach to PTY output")?;
    let (eof_tx, eof_rx) = oneshot::channel::<()>();

    // Blocking copy of PTY output to stdout
    std::thread::spawn(move || {
        let mut stdout = std::io::stdout();
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if stdout
                        .write_all(&buffer[..n])
                        .and_then(|_| stdout.flush())
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    // EIO once the slave side closes on Linux
                    debug!("PTY output ended: {}", e);
                    break;
                }
            }
        }
        let _ = eof_tx.send(());
    });

    if let Some(input) = &args.input {
        adapter.write(&mut handle, input, &args.label);
    }

    let deadline = async {
        match args.kill_after {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    let reason = tokio::select! {
        _ = eof_rx => None,
        _ = tokio::signal::ctrl_c() => Some("Interrupted"),
        _ = deadline => Some("Timed out"),
    };

    match reason {
        None => {
            let code = tokio::task::block_in_place(|| handle.wait())
                .context("Failed to collect exit status")?;
            info!("Process exited with code {}", code);
            std::process::exit(code as i32);
        }
        Some(reason) => {
            let signal = if args.force {
                TerminateSignal::Kill
            } else {
                TerminateSignal::Term
            };
            info!("{}; sending {} to process tree", reason, signal);
            if !adapter.terminate(&handle, &args.label, signal).await {
                warn!("Process tree could not be terminated");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
