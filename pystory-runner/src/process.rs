// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Child process execution.
//!
//! All interpreter and tooling invocations go through a [`ProcessExecutor`] so that the story
//! runner can be driven by a scripted executor in tests.

use crate::errors::ProcessExecutionError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    ffi::OsString,
    process::ExitStatus,
    time::{Duration, Instant},
};
use tracing::{debug, trace};

/// How often a running child is polled while waiting on a timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A program plus leading arguments that can be invoked with further arguments.
///
/// `pip`, for example, is usually `python -m pip`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocable {
    program: Utf8PathBuf,
    args: Vec<String>,
}

impl Invocable {
    /// Creates an invocable that runs `program` with no leading arguments.
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds a leading argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Returns the program.
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// Returns the leading arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Creates an invocation with `args` appended to the leading arguments.
    pub fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all_args = self.args.clone();
        all_args.extend(args.into_iter().map(Into::into));
        Invocation {
            program: self.program.clone(),
            args: all_args,
            cwd: None,
            env: Vec::new(),
        }
    }
}

/// A fully specified child process invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    program: Utf8PathBuf,
    args: Vec<String>,
    cwd: Option<Utf8PathBuf>,
    env: Vec<(String, String)>,
}

impl Invocation {
    /// Sets the working directory.
    pub fn current_dir(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Returns the program.
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// Returns the arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the working directory, if set.
    pub fn cwd(&self) -> Option<&Utf8Path> {
        self.cwd.as_deref()
    }

    /// Returns the environment overrides.
    pub fn envs(&self) -> &[(String, String)] {
        &self.env
    }

    /// Returns a shell-quoted rendering of the command line, for messages.
    pub fn command_line(&self) -> String {
        shell_words::join(
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)),
        )
    }

    /// Converts the invocation to a [`duct::Expression`].
    pub fn to_expression(&self) -> duct::Expression {
        let mut expression = duct::cmd(
            self.program.as_std_path(),
            self.args.iter().map(OsString::from),
        );
        if let Some(cwd) = &self.cwd {
            expression = expression.dir(cwd.as_std_path());
        }
        for (key, value) in &self.env {
            expression = expression.env(key, value);
        }
        expression
    }
}

/// Captured output of a successful process execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

/// Runs child processes.
pub trait ProcessExecutor {
    /// Runs the invocation to completion, capturing its output.
    ///
    /// A nonzero exit is reported as [`ProcessExecutionError::NonZeroExit`] with the captured
    /// output attached.
    fn execute(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessExecutionError>;

    /// Runs the invocation with standard streams inherited from the current process.
    fn execute_inherited(&self, invocation: &Invocation) -> Result<(), ProcessExecutionError>;
}

/// The default [`ProcessExecutor`], backed by [`duct`].
#[derive(Clone, Debug, Default)]
pub struct DuctExecutor {
    timeout: Option<Duration>,
}

impl DuctExecutor {
    /// Creates a new executor. Children running longer than `timeout` are killed.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn wait(
        &self,
        invocation: &Invocation,
        handle: duct::Handle,
    ) -> Result<std::process::Output, ProcessExecutionError> {
        let command = invocation.command_line();
        let Some(timeout) = self.timeout else {
            return handle
                .into_output()
                .map_err(|error| ProcessExecutionError::Wait { command, error });
        };

        let start = Instant::now();
        loop {
            match handle.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {}
                Err(error) => return Err(ProcessExecutionError::Wait { command, error }),
            }
            if start.elapsed() >= timeout {
                debug!("killing `{command}` after {:?}", start.elapsed());
                // The child may have exited between the poll and the kill.
                _ = handle.kill();
                return Err(ProcessExecutionError::Timeout { command, timeout });
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        handle
            .into_output()
            .map_err(|error| ProcessExecutionError::Wait { command, error })
    }
}

impl ProcessExecutor for DuctExecutor {
    fn execute(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessExecutionError> {
        let expression = invocation.to_expression();
        trace!("executing command: {:?}", expression);
        let handle = expression
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .start()
            .map_err(|error| ProcessExecutionError::Spawn {
                command: invocation.command_line(),
                error,
            })?;
        let output = self.wait(invocation, handle)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            debug!("`{}` failed with {}", invocation.command_line(), output.status);
            debug!("stdout:\n{stdout}");
            debug!("stderr:\n{stderr}");
            return Err(non_zero_exit(invocation, output.status, stdout, stderr));
        }
        Ok(ProcessOutput { stdout, stderr })
    }

    fn execute_inherited(&self, invocation: &Invocation) -> Result<(), ProcessExecutionError> {
        let expression = invocation.to_expression();
        trace!("executing command with inherited stdio: {:?}", expression);
        let handle = expression
            .unchecked()
            .start()
            .map_err(|error| ProcessExecutionError::Spawn {
                command: invocation.command_line(),
                error,
            })?;
        let output = self.wait(invocation, handle)?;
        if !output.status.success() {
            return Err(non_zero_exit(
                invocation,
                output.status,
                String::new(),
                String::new(),
            ));
        }
        Ok(())
    }
}

fn non_zero_exit(
    invocation: &Invocation,
    status: ExitStatus,
    stdout: String,
    stderr: String,
) -> ProcessExecutionError {
    ProcessExecutionError::NonZeroExit {
        command: invocation.command_line(),
        status,
        stdout,
        stderr,
    }
}
