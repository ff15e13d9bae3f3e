// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs Python code fragments in a provisioned interpreter.
//!
//! Each run writes a wrapper script, [`SCRIPT_FILE_NAME`], into the scratch directory and
//! executes it. The wrapper runs the setup fragment, prints [`OUTPUT_MARKER`], then runs the
//! code. Only output after the marker is captured, so setup output never reaches expectations.
//!
//! When exceptions are captured, the wrapper catches any exception raised by the code and
//! describes it in [`RESULT_FILE_NAME`] as JSON: `null` if nothing was raised, otherwise
//! `{"type": .., "message": ..}`.
//!
//! The wrapper is valid under both Python 2 and Python 3.

use crate::{
    errors::{CodeRunError, ProcessExecutionError},
    process::{Invocable, ProcessExecutor},
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use swrite::{SWrite, swriteln};
use tracing::debug;

/// The name of the wrapper script written into the scratch directory.
pub const SCRIPT_FILE_NAME: &str = "examplepythoncode.py";

/// Printed by the wrapper between setup and code.
#[doc(hidden)]
pub const OUTPUT_MARKER: &str = "--pystory-output-begins-8d0e4c2a--";

/// The file the wrapper describes a captured exception in.
#[doc(hidden)]
pub const RESULT_FILE_NAME: &str = ".pystory-result.json";

/// The result of running a code fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedResult {
    /// Everything the code printed to standard output.
    pub output: String,
    /// The exception the code raised, if exceptions were captured and one was raised.
    pub exception: Option<ExceptionDescriptor>,
}

/// A raised exception, decomposed.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ExceptionDescriptor {
    /// The exception type: the bare class name for builtins and exceptions defined by the code
    /// itself, `module.ClassName` otherwise.
    #[serde(rename = "type")]
    pub type_name: String,
    /// The exception message, `str(exception)`.
    pub message: String,
}

/// Runs code fragments in a scratch directory with a given interpreter.
pub struct CodeRunner<'a> {
    executor: &'a dyn ProcessExecutor,
    python: Invocable,
    state_dir: Utf8PathBuf,
    setup_code: String,
    cprofile: Option<Utf8PathBuf>,
}

impl<'a> CodeRunner<'a> {
    /// Creates a runner that executes `python` in `state_dir`.
    pub fn new(
        executor: &'a dyn ProcessExecutor,
        python: Invocable,
        state_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            executor,
            python,
            state_dir: state_dir.into(),
            setup_code: String::new(),
            cprofile: None,
        }
    }

    /// Runs `setup_code` before every fragment, with its output suppressed.
    pub fn with_setup_code(mut self, setup_code: impl Into<String>) -> Self {
        self.setup_code = setup_code.into();
        self
    }

    /// Profiles every fragment (but not the setup) with cProfile, dumping stats to `path`.
    pub fn with_cprofile(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.cprofile = Some(path.into());
        self
    }

    /// The path of the wrapper script.
    pub fn script_path(&self) -> Utf8PathBuf {
        self.state_dir.join(SCRIPT_FILE_NAME)
    }

    fn result_path(&self) -> Utf8PathBuf {
        self.state_dir.join(RESULT_FILE_NAME)
    }

    /// Runs `code`.
    ///
    /// With `capture_exceptions` false, an exception raised by `code` fails the run with
    /// [`CodeRunError::CodeFailed`]. With it true, the exception is returned in the result.
    pub fn run(
        &self,
        code: &str,
        capture_exceptions: bool,
    ) -> Result<CapturedResult, CodeRunError> {
        let script_path = self.script_path();
        let result_path = self.result_path();
        let script = self.wrapper_script(code, capture_exceptions, &result_path);
        std::fs::write(&script_path, script).map_err(|error| CodeRunError::WriteScript {
            path: script_path.clone(),
            error,
        })?;
        // A result left over from a previous fragment must not be mistaken for this one's.
        if let Err(error) = std::fs::remove_file(&result_path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                return Err(CodeRunError::ReadResult {
                    path: result_path,
                    error,
                });
            }
        }

        let invocation = self
            .python
            .invocation([script_path.as_str()])
            .current_dir(&self.state_dir)
            .env("PYTHONIOENCODING", "utf-8");
        debug!("running code fragment via {}", invocation.command_line());

        let output = match self.executor.execute(&invocation) {
            Ok(output) => output,
            Err(ProcessExecutionError::NonZeroExit { stdout, stderr, .. }) => {
                return Err(match split_output(&stdout) {
                    Some(output) => CodeRunError::CodeFailed {
                        output: output.to_owned(),
                        stderr,
                    },
                    None => CodeRunError::SetupFailed { stderr },
                });
            }
            Err(error) => return Err(CodeRunError::Process(error)),
        };

        let Some(captured) = split_output(&output.stdout) else {
            // The interpreter exited successfully without reaching the code.
            return Err(CodeRunError::SetupFailed {
                stderr: output.stderr,
            });
        };

        let exception = if capture_exceptions {
            let contents = std::fs::read_to_string(&result_path).map_err(|error| {
                CodeRunError::ReadResult {
                    path: result_path.clone(),
                    error,
                }
            })?;
            serde_json::from_str::<Option<ExceptionDescriptor>>(&contents).map_err(|error| {
                CodeRunError::ParseResult {
                    path: result_path,
                    error,
                }
            })?
        } else {
            None
        };

        Ok(CapturedResult {
            output: captured.to_owned(),
            exception,
        })
    }

    fn wrapper_script(
        &self,
        code: &str,
        capture_exceptions: bool,
        result_path: &Utf8Path,
    ) -> String {
        let mut script = String::new();
        swriteln!(script, "# -*- coding: utf-8 -*-");
        swriteln!(script, "import json");
        swriteln!(script, "import sys");
        script.push('\n');
        swriteln!(script, "_SETUP = {}", py_str(&self.setup_code));
        swriteln!(script, "_CODE = {}", py_str(code));
        swriteln!(script, "_MARKER = {}", py_str(OUTPUT_MARKER));
        swriteln!(script, "_RESULT = {}", py_str(result_path.as_str()));
        swriteln!(
            script,
            "_PROFILE = {}",
            self.cprofile
                .as_deref()
                .map_or_else(|| "None".to_owned(), |path| py_str(path.as_str()))
        );
        swriteln!(
            script,
            "_CAPTURE = {}",
            if capture_exceptions { "True" } else { "False" }
        );
        script.push_str(WRAPPER_BODY);
        script
    }
}

// Compiled with dont_inherit so the wrapper's own flags never leak into the fragments.
const WRAPPER_BODY: &str = r#"
_globals = {"__name__": "__main__", "__file__": "examplepythoncode.py"}
exec(compile(_SETUP, "<setup>", "exec", 0, True), _globals)
sys.stdout.write(_MARKER + "\n")
sys.stdout.flush()


def _run():
    compiled = compile(_CODE, "examplepythoncode.py", "exec", 0, True)
    if _PROFILE is None:
        exec(compiled, _globals)
        return
    import cProfile
    profiler = cProfile.Profile()
    profiler.enable()
    try:
        exec(compiled, _globals)
    finally:
        profiler.disable()
        profiler.dump_stats(_PROFILE)


def _describe(error):
    cls = type(error)
    if cls.__module__ in ("builtins", "exceptions", "__main__"):
        name = cls.__name__
    else:
        name = cls.__module__ + "." + cls.__name__
    if sys.version_info[0] == 2:
        message = unicode(error)
    else:
        message = str(error)
    return {"type": name, "message": message}


if _CAPTURE:
    try:
        _run()
    except Exception as error:
        _result = _describe(error)
    else:
        _result = None
    sys.stdout.flush()
    with open(_RESULT, "w") as _file:
        _file.write(json.dumps(_result))
else:
    _run()
"#;

/// Renders `value` as a Python unicode string literal, valid under Python 2 and 3.
fn py_str(value: &str) -> String {
    // JSON string escapes are a subset of Python's.
    format!("u{}", serde_json::Value::String(value.to_owned()))
}

/// Returns the output after the marker line, if the marker was printed.
fn split_output(stdout: &str) -> Option<&str> {
    let (_, after) = stdout.split_once(OUTPUT_MARKER)?;
    Some(after.strip_prefix("\r\n").or_else(|| after.strip_prefix('\n')).unwrap_or(after))
}
