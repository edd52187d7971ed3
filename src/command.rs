//! Execution of shell commands inside an elevated shell session.
//!
//! [`PrivilegedRunner`] allows swapping the real elevated shell
//! ([`SuRunner`]) with a mock in tests. The MAC change workflow only ever
//! talks to the operating system through this trait, which makes the whole
//! sequence testable on a machine without root access, `ip` or `svc`.
//!
//! Each call to [`PrivilegedRunner::run`] spawns one elevated shell, feeds it
//! the command followed by `exit`, collects what it printed and reaps it.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use thiserror::Error;
use tracing::{trace, warn};

/// Prefix added to every line read from the standard error of the shell.
pub const STDERR_PREFIX: &str = "STDERR: ";

/// Result of one elevated shell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit status of the shell, `None` when it was terminated by a signal.
    pub exit_status: Option<i32>,
    /// Standard output followed by the standard error lines (each prefixed
    /// with [`STDERR_PREFIX`]), trimmed.
    pub output: String,
}

impl CommandResult {
    /// Build a result from its parts.
    pub fn new(exit_status: Option<i32>, output: impl Into<String>) -> Self {
        Self {
            exit_status,
            output: output.into(),
        }
    }

    /// `true` when the shell exited with status 0.
    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0)
    }
}

#[derive(Debug, Error)]
/// Failure to run a command at all, as opposed to the command itself failing.
pub enum CommandError {
    /// The configured elevation command is empty.
    #[error("Elevation command is empty")]
    EmptyElevationCommand,
    /// The configured elevation command could not be split into words.
    #[error("Invalid elevation command: {0}")]
    InvalidElevationCommand(#[from] shell_words::ParseError),
    /// The elevated shell could not be started.
    #[error("Cannot run program \"{program}\": {source}")]
    Spawn {
        /// program used to obtain the elevated shell
        program: String,
        /// spawn failure
        #[source]
        source: io::Error,
    },
    /// A standard stream of the child was not captured.
    #[error("No {0} pipe to the elevated shell")]
    MissingPipe(&'static str),
    #[allow(missing_docs)]
    #[error("I/O error while talking to the elevated shell: {0}")]
    Io(#[from] io::Error),
}

/// Trait for running commands with elevated privileges.
#[cfg_attr(test, mockall::automock)]
pub trait PrivilegedRunner: Send + Sync {
    /// Probe whether an elevated shell can be obtained.
    ///
    /// Never fails: any problem (missing binary, permission denied, user
    /// declining the request) is reported as `false`.
    fn is_available(&self) -> bool;

    /// Run `command` in a fresh elevated shell and return what it printed.
    fn run(&self, command: &str) -> Result<CommandResult, CommandError>;
}

/// Default implementation spawning `su` (or any configured elevation command).
#[derive(Debug, Clone)]
pub struct SuRunner {
    program: String,
    args: Vec<String>,
}

impl SuRunner {
    /// Create a runner from a shell-words elevation command such as `su`,
    /// `/system/xbin/su` or `sudo sh`.
    pub fn new(elevation_command: &str) -> Result<Self, CommandError> {
        let mut words = shell_words::split(elevation_command)?.into_iter();
        let program = words.next().ok_or(CommandError::EmptyElevationCommand)?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    fn spawn(&self, capture: bool) -> Result<Child, CommandError> {
        let output = || {
            if capture {
                Stdio::piped()
            } else {
                Stdio::null()
            }
        };
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(output())
            .stderr(output())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: self.program.clone(),
                source,
            })
    }

    fn probe(&self) -> Result<bool, CommandError> {
        let mut child = self.spawn(false)?;
        let written = child
            .stdin
            .take()
            .ok_or(CommandError::MissingPipe("stdin"))
            .and_then(|mut stdin| {
                stdin.write_all(b"exit\n")?;
                stdin.flush()?;
                Ok(())
            });
        // The shell is always reaped, even when it closed its input early.
        let status = child.wait()?;
        written?;
        Ok(status.success())
    }
}

impl PrivilegedRunner for SuRunner {
    fn is_available(&self) -> bool {
        match self.probe() {
            Ok(available) => available,
            Err(e) => {
                warn!("Elevated shell probe failed: {}", e);
                false
            }
        }
    }

    fn run(&self, command: &str) -> Result<CommandResult, CommandError> {
        trace!(command, "Spawning elevated shell");
        let mut child = self.spawn(true)?;
        match communicate(&mut child, command) {
            Ok(result) => {
                trace!(command, exit_status = ?result.exit_status, "Elevated shell reaped");
                Ok(result)
            }
            Err(e) => {
                // Do not leave a half-driven shell behind.
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }
}

/// Send `command` then `exit` to the shell, drain stdout, then stderr, then
/// wait for termination.
fn communicate(child: &mut Child, command: &str) -> Result<CommandResult, CommandError> {
    let mut stdin = child.stdin.take().ok_or(CommandError::MissingPipe("stdin"))?;
    stdin.write_all(format!("{command}\nexit\n").as_bytes())?;
    stdin.flush()?;
    drop(stdin);

    let mut output = String::new();
    let stdout = child
        .stdout
        .take()
        .ok_or(CommandError::MissingPipe("stdout"))?;
    drain_lines(stdout, "", &mut output)?;
    let stderr = child
        .stderr
        .take()
        .ok_or(CommandError::MissingPipe("stderr"))?;
    drain_lines(stderr, STDERR_PREFIX, &mut output)?;

    let status = child.wait()?;
    Ok(CommandResult::new(status.code(), output.trim()))
}

fn drain_lines(stream: impl Read, prefix: &str, output: &mut String) -> io::Result<()> {
    for line in BufReader::new(stream).split(b'\n') {
        let line = line?;
        output.push_str(prefix);
        output.push_str(String::from_utf8_lossy(&line).trim_end_matches('\r'));
        output.push('\n');
    }
    Ok(())
}
