//! Subprocess execution for the VCS adapters.
//!
//! Every VCS interaction goes through [`CommandRunner`], which logs the
//! command line, refuses to start new processes once the run has been
//! interrupted, and classifies failures into typed [`VcsError`]s. Processes
//! already running when an interrupt arrives are left to finish.

use std::path::Path;
use std::process::Command;
use std::thread;

use log::{debug, error, info, warn};

use super::{VcsError, VcsResult};
use crate::context::{InterruptFlag, RetryPolicy};

/// Captured result of one subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Rendered command line, for error messages.
    pub command: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Trimmed stdout when the command succeeded.
    pub fn stdout_if_success(&self) -> Option<String> {
        if self.success {
            Some(self.stdout.trim().to_string())
        } else {
            None
        }
    }

    /// Turn a failed local command into a structural error.
    pub fn check(self) -> VcsResult<CommandOutput> {
        if self.success {
            Ok(self)
        } else {
            Err(VcsError::Command {
                command: self.command,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    /// Turn a failed network command into an error, flagging connectivity
    /// problems as transient so they can be retried.
    pub fn check_network(self) -> VcsResult<CommandOutput> {
        if self.success {
            return Ok(self);
        }
        let stderr = self.stderr.trim().to_string();
        if is_network_failure(&stderr) {
            Err(VcsError::Unavailable {
                command: self.command,
                message: stderr,
            })
        } else if is_auth_failure(&stderr) {
            Err(VcsError::Command {
                command: self.command,
                stderr: format!(
                    "Authentication failed. Make sure you have access to the repository \
                     (SSH agent, credential helper or access token).\nError: {}",
                    stderr
                ),
            })
        } else {
            Err(VcsError::Command {
                command: self.command,
                stderr,
            })
        }
    }
}

/// Runs VCS command-line tools.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    interrupt: InterruptFlag,
}

impl CommandRunner {
    pub fn new(interrupt: InterruptFlag) -> Self {
        Self { interrupt }
    }

    /// Run `program args...` in `cwd`. Only spawn failures and interrupts
    /// are errors here; the exit status is reported in the output.
    pub fn output<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        cwd: &Path,
    ) -> VcsResult<CommandOutput> {
        self.output_with_env(program, args, cwd, &[])
    }

    /// Like [`CommandRunner::output`], with extra environment variables set
    /// for this one process only.
    pub fn output_with_env<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        cwd: &Path,
        env: &[(&str, &str)],
    ) -> VcsResult<CommandOutput> {
        if self.interrupt.is_set() {
            return Err(VcsError::Interrupted);
        }

        let command = render(program, args);
        info!("{}$ {}", cwd.display(), command);

        let output = Command::new(program)
            .args(args.iter().map(|a| a.as_ref()))
            .current_dir(cwd)
            .envs(env.iter().copied())
            .output()
            .map_err(|e| VcsError::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        let result = CommandOutput {
            command,
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success {
            debug!(
                "Command \"{}$ {}\" exited with {}",
                cwd.display(),
                result.command,
                output.status
            );
        }

        Ok(result)
    }

    /// Run a command that must succeed.
    pub fn run<S: AsRef<str>>(&self, program: &str, args: &[S], cwd: &Path) -> VcsResult<String> {
        let output = self.output(program, args, cwd)?;
        if !output.success {
            error!(
                "Command \"{}$ {}\" failed\n--- Error summary ---\n{}",
                cwd.display(),
                output.command,
                output.stderr.trim()
            );
        }
        Ok(output.check()?.stdout)
    }

    /// Run a network command (clone, fetch, pull) that must succeed.
    pub fn run_network<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        cwd: &Path,
    ) -> VcsResult<String> {
        Ok(self.output(program, args, cwd)?.check_network()?.stdout)
    }
}

/// Retry `op` while it fails with a transient error, sleeping with
/// exponential backoff between attempts.
pub fn with_retry<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> VcsResult<T>
where
    F: FnMut() -> VcsResult<T>,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what, attempt, attempts, delay, e
                );
                thread::sleep(delay);
                delay = (delay * 2).min(policy.max_backoff);
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn render<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string());
    for arg in args.iter().map(|a| a.as_ref()) {
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            parts.push(format!("'{}'", arg));
        } else {
            parts.push(arg.to_string());
        }
    }
    parts.join(" ")
}

const NETWORK_MARKERS: &[&str] = &[
    "Could not resolve host",
    "Connection timed out",
    "Connection refused",
    "Connection reset",
    "Operation timed out",
    "early EOF",
    "RPC failed",
    "The remote end hung up unexpectedly",
    "Temporary failure in name resolution",
    "Network is unreachable",
    "abort: error: ",
];

/// Whether stderr of a failed network command points at connectivity
/// rather than at the request itself.
pub fn is_network_failure(stderr: &str) -> bool {
    NETWORK_MARKERS.iter().any(|m| stderr.contains(m))
}

fn is_auth_failure(stderr: &str) -> bool {
    stderr.contains("Authentication failed")
        || stderr.contains("Permission denied")
        || stderr.contains("Could not read from remote repository")
}
