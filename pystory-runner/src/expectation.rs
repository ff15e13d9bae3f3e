// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Checks each step's results against its expectations.
//!
//! Every step moves through [`StepState::Pending`] and [`StepState::Running`] to exactly one of
//! [`StepState::Matched`], [`StepState::Rewritten`] or [`StepState::Failed`].
//!
//! With [`EngineSettings::rewrite`] on, a mismatched output template, file contents, or
//! exception message is not a failure: the step is reported as [rewritten](StepOutcome::Rewritten)
//! with the corrected expectations, and the story runner persists them once the whole story has
//! passed. Exception types and missing exceptions are never rewritten, and neither is an exception
//! message when either the type or the message is selected from a per-version mapping.

use crate::{
    code_runner::CodeRunner,
    config::EngineSettings,
    errors::{
        ExceptionField, ExpectedExceptionMismatch, NoExceptionRaised, NonMatching, StepFailure,
    },
    story::{FileContentsStep, RunStep, Step, StepRewrite},
    template::{Template, assert_blob_eq, escape},
    version::RuntimeFamily,
};
use camino::Utf8PathBuf;
use std::fmt;
use tracing::{debug, info};

/// The state of a single step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepState {
    /// The step has not started.
    Pending,
    /// The step is running.
    Running,
    /// Every expectation matched.
    Matched,
    /// At least one expectation mismatched and was rewritten; the rest matched.
    Rewritten,
    /// The step failed.
    Failed,
}

impl StepState {
    /// True for the states a step can finish in.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Matched | Self::Rewritten | Self::Failed)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Matched => "matched",
            Self::Rewritten => "rewritten",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a step passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Every expectation matched.
    Matched,
    /// Some expectations were replaced by the actual values.
    Rewritten(Vec<StepRewrite>),
}

impl StepOutcome {
    /// The terminal state for this outcome.
    pub fn state(&self) -> StepState {
        match self {
            Self::Matched => StepState::Matched,
            Self::Rewritten(_) => StepState::Rewritten,
        }
    }

    fn from_rewrites(rewrites: Vec<StepRewrite>) -> Self {
        if rewrites.is_empty() {
            Self::Matched
        } else {
            Self::Rewritten(rewrites)
        }
    }
}

/// Runs steps and checks their expectations.
pub struct ExpectationEngine<'a> {
    runner: &'a CodeRunner<'a>,
    settings: EngineSettings,
    family: RuntimeFamily,
    state_dir: Utf8PathBuf,
}

impl<'a> ExpectationEngine<'a> {
    /// Creates an engine running code through `runner`, under `family`, with files read from
    /// `state_dir`.
    pub fn new(
        runner: &'a CodeRunner<'a>,
        settings: EngineSettings,
        family: RuntimeFamily,
        state_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            runner,
            settings,
            family,
            state_dir: state_dir.into(),
        }
    }

    /// Runs a single step.
    pub fn run_step(&self, step: &Step) -> Result<StepOutcome, StepFailure> {
        debug!("step {}: {} -> {}", step.kind(), StepState::Pending, StepState::Running);
        let result = match step {
            Step::Run(run) => self.run_code(run),
            Step::FileContentsWillBe(contents) => self.check_file_contents(contents),
        };
        let state = match &result {
            Ok(outcome) => outcome.state(),
            Err(_) => StepState::Failed,
        };
        debug!("step {}: {} -> {state}", step.kind(), StepState::Running);
        result
    }

    fn run_code(&self, run: &RunStep) -> Result<StepOutcome, StepFailure> {
        let raises = run.raises.as_ref();
        let expected_type = raises
            .and_then(|raises| raises.exception_type.as_ref())
            .map(|value| value.resolve(self.family));
        let expected_message = raises
            .and_then(|raises| raises.message.as_ref())
            .map(|value| value.resolve(self.family));
        // Any per-version field makes the whole expected exception version-specific.
        let differential = expected_type.as_ref().is_some_and(|r| r.differential)
            || expected_message.as_ref().is_some_and(|r| r.differential);

        let captured = self
            .runner
            .run(&run.code, raises.is_some())
            .map_err(StepFailure::CodeRun)?;

        let mut rewrites = Vec::new();
        if let Some(will_output) = &run.will_output {
            if let Err(mismatch) = Template::new(will_output).assert_match(&captured.output) {
                if !self.settings.rewrite {
                    return Err(StepFailure::OutputMismatch(mismatch));
                }
                info!("output differs, rewriting will-output");
                rewrites.push(StepRewrite::WillOutput(escape(mismatch.actual())));
            }
        }

        if raises.is_none() {
            return Ok(StepOutcome::from_rewrites(rewrites));
        }

        let Some(exception) = captured.exception else {
            return Err(StepFailure::NoExceptionRaised(NoExceptionRaised::new(
                expected_type.map(|resolved| resolved.value.to_owned()),
            )));
        };

        if let Some(expected) = expected_type {
            if expected.value != exception.type_name {
                return Err(StepFailure::ExceptionMismatch(ExpectedExceptionMismatch::new(
                    ExceptionField::Type,
                    expected.value,
                    exception.type_name,
                    differential,
                )));
            }
        }

        if let Some(expected) = expected_message {
            if let Err(mismatch) = Template::new(expected.value).assert_match(&exception.message) {
                if !self.settings.rewrite || differential {
                    return Err(StepFailure::ExceptionMismatch(message_mismatch(
                        mismatch,
                        differential,
                    )));
                }
                info!("exception message differs, rewriting raises.message");
                rewrites.push(StepRewrite::RaisesMessage(escape(mismatch.actual())));
            }
        }

        Ok(StepOutcome::from_rewrites(rewrites))
    }

    fn check_file_contents(&self, step: &FileContentsStep) -> Result<StepOutcome, StepFailure> {
        let path = self.state_dir.join(&step.filename);
        let bytes = std::fs::read(&path).map_err(|error| StepFailure::ReadFile {
            path: path.clone(),
            error,
        })?;
        let actual =
            String::from_utf8(bytes).map_err(|error| StepFailure::DecodeFile { path, error })?;

        match assert_blob_eq(&step.contents, &actual) {
            Ok(()) => Ok(StepOutcome::Matched),
            Err(mismatch) if self.settings.rewrite => {
                info!("contents of {} differ, rewriting", step.filename);
                Ok(StepOutcome::Rewritten(vec![StepRewrite::Contents(
                    mismatch.actual().to_owned(),
                )]))
            }
            Err(mismatch) => Err(StepFailure::ContentsMismatch {
                filename: step.filename.clone(),
                mismatch,
            }),
        }
    }
}

fn message_mismatch(mismatch: NonMatching, differential: bool) -> ExpectedExceptionMismatch {
    ExpectedExceptionMismatch::new(
        ExceptionField::Message,
        mismatch.expected(),
        mismatch.actual(),
        differential,
    )
}
