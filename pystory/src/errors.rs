// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use pystory_runner::errors::{
    ConfigError, ProcessExecutionError, ProvisionError, RuntimeVersionParseError,
    StoryCollectionError,
};
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Process exit codes returned by `pystory`.
pub struct PystoryExitCode;

impl PystoryExitCode {
    /// Every selected story passed.
    pub const OK: i32 = 0;

    /// No stories matched the selection.
    pub const NO_STORIES: i32 = 101;

    /// One or more stories failed.
    pub const STORY_RUN_FAILED: i32 = 100;

    /// Configuration, settings or story files could not be loaded.
    pub const SETUP_ERROR: i32 = 96;

    /// Re-running the last example script failed.
    pub const RERUN_FAILED: i32 = 104;

    /// Writing to the terminal failed.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}

// The #[error()] strings are placeholders: errors are meant to be printed with
// display_to_stderr, which styles them.

/// An error that `pystory` reports to the user and exits with.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("failed to load configuration")]
    ConfigLoad {
        #[source]
        err: ConfigError,
    },
    #[error("failed to collect stories")]
    StoryCollection {
        #[source]
        err: StoryCollectionError,
    },
    #[error("invalid --python-version")]
    InvalidPythonVersion {
        #[source]
        err: RuntimeVersionParseError,
    },
    #[error("no stories to run")]
    NoStoriesSelected,
    #[error("story run failed")]
    StoryRunFailed,
    #[error("failed to provision interpreter")]
    Provision {
        #[source]
        err: ProvisionError,
    },
    #[error("no example script to re-run")]
    RerunScriptMissing { path: Utf8PathBuf },
    #[error("re-run failed")]
    RerunFailed {
        #[source]
        err: ProcessExecutionError,
    },
    #[error("failed to write report")]
    WriteReport {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn config_load(err: ConfigError) -> Self {
        Self::ConfigLoad { err }
    }

    pub(crate) fn story_collection(err: StoryCollectionError) -> Self {
        Self::StoryCollection { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::StoryCollection { err } if selects_nothing(err) => PystoryExitCode::NO_STORIES,
            Self::NoStoriesSelected => PystoryExitCode::NO_STORIES,
            Self::ConfigLoad { .. }
            | Self::StoryCollection { .. }
            | Self::InvalidPythonVersion { .. }
            | Self::Provision { .. } => PystoryExitCode::SETUP_ERROR,
            Self::StoryRunFailed => PystoryExitCode::STORY_RUN_FAILED,
            Self::RerunScriptMissing { .. } | Self::RerunFailed { .. } => {
                PystoryExitCode::RERUN_FAILED
            }
            Self::WriteReport { .. } => PystoryExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::ConfigLoad { err } => {
                error!("{err}");
                err.source()
            }
            Self::StoryCollection { err } => {
                error!("{err}");
                err.source()
            }
            Self::InvalidPythonVersion { err } => {
                error!("{err}");
                err.source()
            }
            Self::NoStoriesSelected => {
                error!("no stories to run");
                None
            }
            Self::StoryRunFailed => {
                error!("story run failed");
                None
            }
            Self::Provision { err } => {
                error!("{err}");
                err.source()
            }
            Self::RerunScriptMissing { path } => {
                error!(
                    "no example script at `{}`\n({}: run a story first)",
                    path.style(styles.bold),
                    "hint".style(styles.warning_text),
                );
                None
            }
            Self::RerunFailed { err } => {
                error!("re-run failed");
                Some(err as &dyn Error)
            }
            Self::WriteReport { err } => {
                error!("failed to write report to stderr");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING, "\nCaused by:\n  {err}");
            next_error = err.source();
        }
    }
}

fn selects_nothing(err: &StoryCollectionError) -> bool {
    matches!(
        err,
        StoryCollectionError::NoMatch { .. } | StoryCollectionError::FileNotFound { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(
        ExpectedError::story_collection(StoryCollectionError::NoMatch {
            keywords: vec!["missing".to_owned()],
        }),
        PystoryExitCode::NO_STORIES
        ; "no match"
    )]
    #[test_case(
        ExpectedError::story_collection(StoryCollectionError::MultipleMatches {
            keywords: vec!["a".to_owned()],
            candidates: vec!["one a".to_owned(), "two a".to_owned()],
        }),
        PystoryExitCode::SETUP_ERROR
        ; "ambiguous"
    )]
    #[test_case(ExpectedError::StoryRunFailed, PystoryExitCode::STORY_RUN_FAILED ; "run failed")]
    #[test_case(
        ExpectedError::RerunScriptMissing { path: "state/examplepythoncode.py".into() },
        PystoryExitCode::RERUN_FAILED
        ; "rerun missing"
    )]
    fn exit_codes(error: ExpectedError, expected: i32) {
        assert_eq!(error.process_exit_code(), expected);
    }
}
