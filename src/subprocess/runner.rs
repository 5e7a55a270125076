use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;

use super::error::ProcessError;

/// A shell command line to launch. Command lines may contain redirections
/// and pipes, so they are handed to `sh -c` rather than being split into
/// argument words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub line: String,
    pub working_dir: Option<PathBuf>,
}

impl ProcessCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            working_dir: None,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "0"),
            ExitStatus::Error(code) => write!(f, "{code}"),
            ExitStatus::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Launches external commands and waits for their exit. Execution is
/// strictly sequential: `run` resolves only once the process has exited
/// and its output has been collected.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        tracing::debug!(line = %command.line, "launching subprocess");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command.line).stdin(Stdio::null());
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|source| ProcessError::Spawn {
            command: command.line.clone(),
            source,
        })?;

        let status = convert_exit_status(output.status);
        tracing::debug!(line = %command.line, %status, "subprocess exited");

        Ok(ProcessOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn convert_exit_status(status: std::process::ExitStatus) -> ExitStatus {
    if status.success() {
        return ExitStatus::Success;
    }
    if let Some(code) = status.code() {
        return ExitStatus::Error(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatus::Signal(signal);
        }
    }
    ExitStatus::Error(-1)
}
