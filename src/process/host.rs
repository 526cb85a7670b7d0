//! OS-facing primitives the locator and supervisor are built on.

use std::{
    ffi::OsString,
    future::Future,
    io,
    path::PathBuf,
    process::{Output, Stdio},
    time::Duration,
};

use tokio::{process::Command, time::timeout};

use super::error::{ProcessError, ProcessResult};
use crate::logging::{ClientLog, LogStream};

/// What to launch and where its output goes.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub log_file: PathBuf,
}

impl LaunchSpec {
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

pub trait ProcessHost: Send + Sync + 'static {
    /// Cheap liveness check for an image name.
    fn is_alive(&self, image: &str) -> impl Future<Output = ProcessResult<bool>> + Send;

    /// Raw process-table output listing PIDs for `image`.
    fn query_pids(&self, image: &str) -> impl Future<Output = ProcessResult<String>> + Send;

    /// Forced termination of every process with this image name.
    fn terminate(&self, image: &str) -> impl Future<Output = ProcessResult<()>> + Send;

    /// Spawn detached from the caller; returns the new PID when known.
    fn launch(&self, spec: &LaunchSpec) -> impl Future<Output = ProcessResult<Option<u32>>> + Send;
}

/// Host backed by the platform's process utilities.
#[derive(Debug, Clone)]
pub struct SystemHost {
    command_timeout: Duration,
}

impl SystemHost {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<Output, CommandFailure> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        hide_window(&mut command);

        match timeout(self.command_timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => Err(CommandFailure::Io(error)),
            Err(_) => Err(CommandFailure::TimedOut(self.command_timeout)),
        }
    }
}

enum CommandFailure {
    Io(io::Error),
    TimedOut(Duration),
}

impl CommandFailure {
    fn into_lookup(self, command: String) -> ProcessError {
        match self {
            CommandFailure::Io(error) => ProcessError::Lookup {
                command,
                detail: error.to_string(),
            },
            CommandFailure::TimedOut(waited) => ProcessError::CommandTimeout { command, waited },
        }
    }

    fn into_terminate(self, command: String) -> ProcessError {
        match self {
            CommandFailure::Io(error) => ProcessError::Terminate {
                command,
                detail: error.to_string(),
            },
            CommandFailure::TimedOut(waited) => ProcessError::CommandTimeout { command, waited },
        }
    }
}

fn describe(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exit status {}", output.status)
    } else {
        stderr
    }
}

#[cfg(windows)]
impl ProcessHost for SystemHost {
    async fn is_alive(&self, image: &str) -> ProcessResult<bool> {
        let filter = format!("IMAGENAME eq {image}");
        let args = ["/FI", filter.as_str(), "/FO", "CSV", "/NH"];
        let output = self
            .run("tasklist", &args)
            .await
            .map_err(|failure| failure.into_lookup(describe("tasklist", &args)))?;
        if !output.status.success() {
            return Err(ProcessError::Lookup {
                command: describe("tasklist", &args),
                detail: failure_detail(&output),
            });
        }
        let listing = String::from_utf8_lossy(&output.stdout).to_ascii_lowercase();
        Ok(listing.contains(&image.to_ascii_lowercase()))
    }

    async fn query_pids(&self, image: &str) -> ProcessResult<String> {
        let filter = format!("name='{image}'");
        let args = ["process", "where", filter.as_str(), "get", "ProcessId"];
        let output = self
            .run("wmic", &args)
            .await
            .map_err(|failure| failure.into_lookup(describe("wmic", &args)))?;
        if !output.status.success() {
            return Err(ProcessError::Lookup {
                command: describe("wmic", &args),
                detail: failure_detail(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn terminate(&self, image: &str) -> ProcessResult<()> {
        let args = ["/F", "/IM", image];
        let output = self
            .run("taskkill", &args)
            .await
            .map_err(|failure| failure.into_terminate(describe("taskkill", &args)))?;
        if !output.status.success() {
            return Err(ProcessError::Terminate {
                command: describe("taskkill", &args),
                detail: failure_detail(&output),
            });
        }
        Ok(())
    }

    async fn launch(&self, spec: &LaunchSpec) -> ProcessResult<Option<u32>> {
        spawn_detached(spec).await
    }
}

#[cfg(not(windows))]
impl ProcessHost for SystemHost {
    async fn is_alive(&self, image: &str) -> ProcessResult<bool> {
        let args = ["-x", image];
        let output = self
            .run("pgrep", &args)
            .await
            .map_err(|failure| failure.into_lookup(describe("pgrep", &args)))?;
        // pgrep: 0 = matched, 1 = no match, anything else is a real failure.
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(ProcessError::Lookup {
                command: describe("pgrep", &args),
                detail: failure_detail(&output),
            }),
        }
    }

    async fn query_pids(&self, image: &str) -> ProcessResult<String> {
        let args = ["-o", "-x", image];
        let output = self
            .run("pgrep", &args)
            .await
            .map_err(|failure| failure.into_lookup(describe("pgrep", &args)))?;
        match output.status.code() {
            Some(0) | Some(1) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            _ => Err(ProcessError::Lookup {
                command: describe("pgrep", &args),
                detail: failure_detail(&output),
            }),
        }
    }

    async fn terminate(&self, image: &str) -> ProcessResult<()> {
        let args = ["-KILL", "-x", image];
        let output = self
            .run("pkill", &args)
            .await
            .map_err(|failure| failure.into_terminate(describe("pkill", &args)))?;
        match output.status.code() {
            // 1: nothing matched, the process is already gone.
            Some(0) | Some(1) => Ok(()),
            _ => Err(ProcessError::Terminate {
                command: describe("pkill", &args),
                detail: failure_detail(&output),
            }),
        }
    }

    async fn launch(&self, spec: &LaunchSpec) -> ProcessResult<Option<u32>> {
        spawn_detached(spec).await
    }
}

async fn spawn_detached(spec: &LaunchSpec) -> ProcessResult<Option<u32>> {
    let log_error = |source: io::Error| ProcessError::LogFile {
        path: spec.log_file.clone(),
        source,
    };
    let log = ClientLog::open(&spec.log_file).map_err(log_error)?;
    let command_line = spec.command_line();

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(log.stdio().map_err(log_error)?)
        .stderr(log.stdio().map_err(log_error)?);
    hide_window(&mut command);

    log.marker(LogStream::Started, &command_line)
        .map_err(log_error)?;

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    let pid = child.id();

    tracing::info!(pid = ?pid, log = %log.path().display(), command = %command_line, "tunnel client started");

    // Reap in the background so the log handle is released when the client exits.
    tokio::spawn(async move {
        let message = match child.wait().await {
            Ok(status) => exit_message(&status),
            Err(error) => format!("wait failed: {error}"),
        };
        tracing::info!(pid = ?pid, %message, "tunnel client exited");
        if let Err(error) = log.marker(LogStream::Exited, &message) {
            tracing::warn!(%error, "failed to record tunnel client exit");
        }
    });

    Ok(pid)
}

#[cfg(windows)]
fn hide_window(command: &mut Command) {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_window(_command: &mut Command) {}

fn exit_message(status: &std::process::ExitStatus) -> String {
    if let Some(code) = status.code() {
        format!("exited with code {code}")
    } else if let Some(signal) = exit_signal(status) {
        format!("terminated by signal {signal}")
    } else {
        "process exited".to_string()
    }
}

fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }

    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}
