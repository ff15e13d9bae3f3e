// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by pystory.

use camino::Utf8PathBuf;
use itertools::Itertools;
use std::{fmt, process::ExitStatus, time::Duration};
use thiserror::Error;

/// Displays an error along with every error in its `source()` chain.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: std::error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: std::error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        if source.is_some() {
            write!(f, "\n  caused by:")?;
        }
        while let Some(err) = source {
            // Multi-line messages are indented so they stay under their bullet.
            let message = err.to_string().replace('\n', "\n    ");
            write!(f, "\n  - {message}")?;
            source = err.source();
        }
        Ok(())
    }
}

/// A single violation found while validating a story against its schema.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("at {path}: {kind}")]
pub struct SchemaError {
    path: String,
    kind: SchemaErrorKind,
}

impl SchemaError {
    pub(crate) fn new(path: impl Into<String>, kind: SchemaErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Returns the path to the offending field, e.g. `"Story".steps[1].run.code`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the kind of violation.
    pub fn kind(&self) -> &SchemaErrorKind {
        &self.kind
    }
}

/// The kind of a [`SchemaError`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaErrorKind {
    /// A required field was not present.
    #[error("missing required field `{field}`")]
    MissingField {
        /// The name of the field.
        field: &'static str,
    },

    /// A field not declared by the schema was present.
    #[error("unknown field `{field}` (known fields: {})", .known.join(", "))]
    UnknownField {
        /// The name of the field.
        field: String,
        /// The fields declared by the schema.
        known: Vec<&'static str>,
    },

    /// A field had the wrong type.
    #[error("expected {expected}, found {found}")]
    WrongType {
        /// A description of the expected type.
        expected: &'static str,
        /// The TOML type name that was found.
        found: &'static str,
    },

    /// A per-version mapping did not have exactly the two version keys.
    #[error(
        "per-version mapping must have exactly the keys \"in python 2\" and \"in python 3\" \
         (found: {})",
        .found.iter().map(|k| format!("{k:?}")).join(", ")
    )]
    InvalidVersionKeys {
        /// The keys that were found.
        found: Vec<String>,
    },

    /// A step table did not have exactly one key.
    #[error(
        "a step must have exactly one kind (found {}: {})",
        .found.len(),
        .found.join(", ")
    )]
    StepKindCount {
        /// The keys that were found.
        found: Vec<String>,
    },

    /// A step kind was not recognized.
    #[error("unknown step kind `{kind}` (known kinds: {})", .known.join(", "))]
    UnknownStepKind {
        /// The kind that was found.
        kind: String,
        /// The known kinds.
        known: Vec<&'static str>,
    },
}

/// An error that occurred while loading a story file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoryLoadError {
    /// The story file could not be read.
    #[error("failed to read story file `{path}`")]
    Read {
        /// The path to the story file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The story file was not valid TOML.
    #[error("failed to parse story file `{path}`")]
    Parse {
        /// The path to the story file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: toml_edit::TomlError,
    },

    /// The story file did not conform to the story schema.
    #[error(
        "story file `{path}` failed validation:\n{}",
        .errors.iter().map(|error| format!("  - {error}")).join("\n")
    )]
    Schema {
        /// The path to the story file.
        path: Utf8PathBuf,
        /// The violations that were found.
        errors: Vec<SchemaError>,
    },
}

/// An error that occurred while writing a story file back to disk.
#[derive(Debug, Error)]
#[error("failed to write story file `{path}`")]
pub struct StorySaveError {
    path: Utf8PathBuf,
    #[source]
    error: atomicwrites::Error<std::io::Error>,
}

impl StorySaveError {
    pub(crate) fn new(path: Utf8PathBuf, error: atomicwrites::Error<std::io::Error>) -> Self {
        Self { path, error }
    }
}

/// An error that occurred while updating a step in a loaded story file.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("story {story_index} step {step_index} does not exist or has the wrong kind")]
pub struct StepUpdateError {
    story_index: usize,
    step_index: usize,
}

impl StepUpdateError {
    pub(crate) fn new(story_index: usize, step_index: usize) -> Self {
        Self {
            story_index,
            step_index,
        }
    }
}

/// An error that occurred while reading `pystory.toml` or `personalsettings.toml`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read `{path}`")]
    Read {
        /// The path to the file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The file could not be deserialized.
    #[error("failed to parse `{path}`")]
    Parse {
        /// The path to the file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: toml::de::Error,
    },

    /// A default settings file could not be created.
    #[error("failed to write default settings to `{path}`")]
    WriteDefault {
        /// The path to the file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A configured version string was invalid.
    #[error("invalid version in `{path}`")]
    InvalidVersion {
        /// The path to the file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: RuntimeVersionParseError,
    },
}

/// An error that occurred while parsing a runtime version string.
#[derive(Debug, Error)]
#[error("invalid Python version `{input}`")]
pub struct RuntimeVersionParseError {
    input: String,
    #[source]
    error: semver::Error,
}

impl RuntimeVersionParseError {
    pub(crate) fn new(input: impl Into<String>, error: semver::Error) -> Self {
        Self {
            input: input.into(),
            error,
        }
    }
}

/// An error that occurred while provisioning an interpreter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// No interpreter could be found for the version.
    #[error(
        "no Python {version} interpreter found (searched: {})",
        .searched.join(", ")
    )]
    NotFound {
        /// The requested version.
        version: String,
        /// The locations that were searched.
        searched: Vec<String>,
    },

    /// The `PATH` environment variable could not be read.
    #[error("PATH contains a non-UTF-8 entry")]
    NonUtf8Path,
}

/// An error that occurred while executing a child process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProcessExecutionError {
    /// The process could not be started.
    #[error("failed to spawn `{command}`")]
    Spawn {
        /// The command line.
        command: String,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Waiting on the process failed.
    #[error("failed to wait on `{command}`")]
    Wait {
        /// The command line.
        command: String,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The process exited unsuccessfully.
    #[error("`{command}` failed with {status}")]
    NonZeroExit {
        /// The command line.
        command: String,
        /// The exit status.
        status: ExitStatus,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The process ran longer than the configured timeout and was killed.
    #[error(
        "`{command}` timed out after {}",
        humantime::format_duration(.timeout.to_owned())
    )]
    Timeout {
        /// The command line.
        command: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },
}

/// An error that occurred while running a code fragment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodeRunError {
    /// The wrapper script could not be written.
    #[error("failed to write wrapper script `{path}`")]
    WriteScript {
        /// The path to the script.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The interpreter could not be run, or was killed.
    #[error("failed to execute code")]
    Process(#[source] ProcessExecutionError),

    /// The setup fragment raised an exception.
    #[error("setup code failed:\n{stderr}")]
    SetupFailed {
        /// Captured standard error.
        stderr: String,
    },

    /// The code raised an exception that was not expected.
    #[error("code raised an unexpected exception:\n{stderr}")]
    CodeFailed {
        /// Output printed by the code before it failed.
        output: String,
        /// Captured standard error, including the traceback.
        stderr: String,
    },

    /// The exception result file could not be read.
    #[error("failed to read exception result `{path}`")]
    ReadResult {
        /// The path to the result file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The exception result file could not be parsed.
    #[error("failed to parse exception result `{path}`")]
    ParseResult {
        /// The path to the result file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurred while computing or recording a file-set fingerprint.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MonitorError {
    /// A watch pattern was not a valid glob.
    #[error("invalid watch pattern `{pattern}`")]
    Glob {
        /// The pattern.
        pattern: String,
        /// The underlying error.
        #[source]
        error: globset::Error,
    },

    /// Walking a watched directory failed.
    #[error("failed to walk `{path}`")]
    Walk {
        /// The directory being walked.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },

    /// A watched file could not be read.
    #[error("failed to read watched file `{path}`")]
    Read {
        /// The path to the file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The fingerprint record could not be written.
    #[error("failed to write fingerprint `{path}`")]
    Write {
        /// The path to the fingerprint record.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// Actual text did not conform to an expected template.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("actual text did not match the expected template")]
pub struct NonMatching {
    expected: String,
    actual: String,
}

impl NonMatching {
    pub(crate) fn new(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// The normalized expected template.
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// The normalized actual text.
    pub fn actual(&self) -> &str {
        &self.actual
    }
}

/// The field of a raised exception being compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionField {
    /// The exception type name.
    Type,
    /// The exception message.
    Message,
}

impl fmt::Display for ExceptionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type => write!(f, "type"),
            Self::Message => write!(f, "message"),
        }
    }
}

/// A raised exception did not match the expected one.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub struct ExpectedExceptionMismatch {
    field: ExceptionField,
    expected: String,
    actual: String,
    differential: bool,
}

impl ExpectedExceptionMismatch {
    pub(crate) fn new(
        field: ExceptionField,
        expected: impl Into<String>,
        actual: impl Into<String>,
        differential: bool,
    ) -> Self {
        Self {
            field,
            expected: expected.into(),
            actual: actual.into(),
            differential,
        }
    }

    /// Which field mismatched.
    pub fn field(&self) -> ExceptionField {
        self.field
    }

    /// The expected value.
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// The actual value.
    pub fn actual(&self) -> &str {
        &self.actual
    }

    /// Whether the expected value was selected from a per-version mapping.
    pub fn is_differential(&self) -> bool {
        self.differential
    }
}

impl fmt::Display for ExpectedExceptionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected exception {} did not match", self.field)?;
        if self.differential {
            write!(f, " (differs by Python version, cannot be rewritten)")?;
        }
        Ok(())
    }
}

/// An exception was expected but the code completed normally.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub struct NoExceptionRaised {
    expected_type: Option<String>,
}

impl NoExceptionRaised {
    pub(crate) fn new(expected_type: Option<String>) -> Self {
        Self { expected_type }
    }

    /// The exception type that was expected, if one was named.
    pub fn expected_type(&self) -> Option<&str> {
        self.expected_type.as_deref()
    }
}

impl fmt::Display for NoExceptionRaised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expected_type {
            Some(expected_type) => write!(
                f,
                "expected exception `{expected_type}`, but no exception was raised"
            ),
            None => write!(f, "expected an exception, but no exception was raised"),
        }
    }
}

/// Why a single step failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StepFailure {
    /// Output did not match `will-output`.
    #[error("output did not match")]
    OutputMismatch(#[source] NonMatching),

    /// A file's contents did not match `file-contents-will-be`.
    #[error("contents of `{filename}` did not match")]
    ContentsMismatch {
        /// The file that was compared.
        filename: String,
        /// The mismatch.
        #[source]
        mismatch: NonMatching,
    },

    /// The raised exception did not match.
    #[error(transparent)]
    ExceptionMismatch(ExpectedExceptionMismatch),

    /// No exception was raised.
    #[error(transparent)]
    NoExceptionRaised(NoExceptionRaised),

    /// The code could not be run or raised unexpectedly.
    #[error(transparent)]
    CodeRun(CodeRunError),

    /// A file named by `file-contents-will-be` could not be read.
    #[error("failed to read `{path}`")]
    ReadFile {
        /// The path to the file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A file named by `file-contents-will-be` was not valid UTF-8.
    #[error("`{path}` is not valid UTF-8")]
    DecodeFile {
        /// The path to the file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::string::FromUtf8Error,
    },
}

/// An error that occurred while preparing a story to run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SetUpError {
    /// The scratch directory could not be cleared or recreated.
    #[error("failed to reset scratch directory `{path}`")]
    ClearState {
        /// The scratch directory.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A declared script could not be written.
    #[error("failed to write script `{path}`")]
    WriteScript {
        /// The path to the script.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A declared file could not be written.
    #[error("failed to write file `{path}`")]
    WriteFile {
        /// The path to the file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The Python version could not be parsed.
    #[error(transparent)]
    Version(RuntimeVersionParseError),

    /// The profile directory could not be created.
    #[error("failed to create profile directory `{path}`")]
    ProfileDir {
        /// The profile directory.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// No interpreter could be provisioned.
    #[error("failed to provision interpreter")]
    Provision(#[source] ProvisionError),

    /// A tooling installation step failed.
    #[error("failed to install tooling `{name}`")]
    Tooling {
        /// The name of the tooling entry.
        name: String,
        /// The underlying error.
        #[source]
        error: ProcessExecutionError,
    },

    /// The change monitor failed.
    #[error("failed to check watched files for tooling `{name}`")]
    Monitor {
        /// The name of the tooling entry.
        name: String,
        /// The underlying error.
        #[source]
        error: MonitorError,
    },
}

/// Why a story failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoryFailure {
    /// The story could not be set up.
    #[error("set up failed")]
    SetUp(#[source] SetUpError),

    /// A step failed.
    #[error("step {} ({kind}) failed", .index + 1)]
    Step {
        /// The zero-based index of the step.
        index: usize,
        /// The step kind.
        kind: &'static str,
        /// The reason.
        #[source]
        failure: StepFailure,
    },

    /// A rewritten expectation could not be applied to the story file.
    #[error("failed to apply rewritten expectation")]
    Update(#[source] StepUpdateError),

    /// Rewritten expectations could not be saved.
    #[error("failed to save rewritten story")]
    Persist(#[source] StorySaveError),

    /// The profile statistics printer failed.
    #[error("failed to print profile statistics")]
    Profile(#[source] ProcessExecutionError),
}

/// An error that occurred while discovering or selecting stories.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoryCollectionError {
    /// The stories directory could not be walked.
    #[error("failed to discover stories under `{path}`")]
    Discover {
        /// The stories directory.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },

    /// A discovered path was not valid UTF-8.
    #[error("story path is not valid UTF-8: {path}")]
    NonUtf8Path {
        /// The lossy rendering of the path.
        path: String,
    },

    /// A story file failed to load.
    #[error(transparent)]
    Load(#[from] StoryLoadError),

    /// No story matched.
    #[error("no story matches `{}`", .keywords.join(" "))]
    NoMatch {
        /// The keywords searched for.
        keywords: Vec<String>,
    },

    /// More than one story matched.
    #[error(
        "more than one story matches `{}`:\n{}",
        .keywords.join(" "),
        .candidates.iter().map(|c| format!("  - {c}")).join("\n")
    )]
    MultipleMatches {
        /// The keywords searched for.
        keywords: Vec<String>,
        /// The candidates that matched.
        candidates: Vec<String>,
    },

    /// No story file had the given name.
    #[error("no story file named `{filename}`")]
    FileNotFound {
        /// The requested filename.
        filename: String,
    },
}
