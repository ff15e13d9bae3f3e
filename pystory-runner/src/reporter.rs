// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporting story runs.
//!
//! [`StoryRunner::play`](crate::story_runner::StoryRunner::play) emits [`StoryEvent`]s as it
//! goes. [`StoryReporter`] turns them into human-readable output.

use crate::{
    errors::{
        CodeRunError, DisplayErrorChain, ProcessExecutionError, SetUpError, StepFailure,
        StoryFailure,
    },
    expectation::StepState,
    helpers::{DisplayBracketedDuration, plural},
    version::RuntimeVersion,
};
use owo_colors::{OwoColorize, Style};
use std::{io, time::Duration};

/// An event emitted while playing stories.
#[derive(Debug)]
pub enum StoryEvent<'a> {
    /// A play started.
    RunStarted {
        /// The number of stories selected.
        story_count: usize,
        /// The version every story runs under, if fixed for the whole play.
        python_version: Option<&'a RuntimeVersion>,
    },
    /// A story started.
    StoryStarted {
        /// The story's title.
        title: &'a str,
    },
    /// A story finished.
    StoryFinished {
        /// The result.
        result: &'a StoryResult,
    },
    /// A play finished.
    RunFinished {
        /// The final report.
        report: &'a RunReport,
    },
}

/// The result of running a single story.
#[derive(Debug)]
pub struct StoryResult {
    /// The story's title.
    pub title: String,
    /// The version the story ran under, if it was resolved.
    pub python_version: Option<RuntimeVersion>,
    /// The final state of each step.
    pub steps: Vec<StepState>,
    /// How the story ended.
    pub status: StoryStatus,
    /// How long the story took, including set up.
    pub time_taken: Duration,
}

/// How a story ended.
#[derive(Debug)]
pub enum StoryStatus {
    /// Every step matched.
    Passed,
    /// Every step passed and some expectations were rewritten and saved.
    Rewritten {
        /// The number of expectations rewritten.
        count: usize,
    },
    /// The story failed.
    Failed(StoryFailure),
}

impl StoryStatus {
    /// True if the story passed, with or without rewrites.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Counts of story outcomes over a play.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Stories selected to run.
    pub initial_count: usize,
    /// Stories that passed without rewrites.
    pub passed: usize,
    /// Stories that passed with rewrites.
    pub rewritten: usize,
    /// Stories that failed.
    pub failed: usize,
}

impl RunStats {
    /// Stories that ran to completion, in any status.
    pub fn finished_count(&self) -> usize {
        self.passed + self.rewritten + self.failed
    }

    /// Stories skipped after a failure cancelled the play.
    pub fn not_run(&self) -> usize {
        self.initial_count.saturating_sub(self.finished_count())
    }

    /// True if no story failed and every story ran.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.not_run() == 0
    }

    pub(crate) fn record(&mut self, status: &StoryStatus) {
        match status {
            StoryStatus::Passed => self.passed += 1,
            StoryStatus::Rewritten { .. } => self.rewritten += 1,
            StoryStatus::Failed(_) => self.failed += 1,
        }
    }
}

/// The final report of a play.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// Outcome counts.
    pub stats: RunStats,
    /// Total wall-clock time.
    pub elapsed: Duration,
}

impl RunReport {
    /// True if every story ran and passed.
    pub fn is_success(&self) -> bool {
        self.stats.is_success()
    }
}

/// Writes human-readable output for [`StoryEvent`]s.
pub struct StoryReporter<W> {
    writer: W,
    styles: Styles,
}

impl<W: io::Write> StoryReporter<W> {
    /// Creates a reporter writing to `writer`, uncolored.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            styles: Styles::default(),
        }
    }

    /// Colorizes output.
    pub fn colorize(mut self) -> Self {
        self.styles.colorize();
        self
    }

    /// Consumes the reporter, returning the writer.
    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Writes the output for a single event.
    pub fn report_event(&mut self, event: &StoryEvent<'_>) -> io::Result<()> {
        match event {
            StoryEvent::RunStarted {
                story_count,
                python_version,
            } => {
                write!(
                    self.writer,
                    "{:>12} {} {}",
                    "Starting".style(self.styles.pass),
                    story_count.style(self.styles.count),
                    plural::stories_str(*story_count),
                )?;
                if let Some(version) = python_version {
                    write!(
                        self.writer,
                        " under Python {}",
                        version.style(self.styles.count)
                    )?;
                }
                writeln!(self.writer)
            }
            StoryEvent::StoryStarted { title } => {
                writeln!(
                    self.writer,
                    "{:>12} {}",
                    "START".style(self.styles.start),
                    title.style(self.styles.title),
                )
            }
            StoryEvent::StoryFinished { result } => self.write_finished(result),
            StoryEvent::RunFinished { report } => self.write_summary(report),
        }
    }

    fn write_finished(&mut self, result: &StoryResult) -> io::Result<()> {
        let (label, style) = match &result.status {
            StoryStatus::Passed => ("PASS", self.styles.pass),
            StoryStatus::Rewritten { .. } => ("REWRITE", self.styles.rewrite),
            StoryStatus::Failed(_) => ("FAIL", self.styles.fail),
        };
        write!(
            self.writer,
            "{:>12} {}{}",
            label.style(style),
            DisplayBracketedDuration(result.time_taken),
            result.title.style(self.styles.title),
        )?;
        if let StoryStatus::Rewritten { count } = &result.status {
            write!(
                self.writer,
                " ({count} {} rewritten)",
                plural::expectations_str(*count)
            )?;
        }
        writeln!(self.writer)?;

        if let StoryStatus::Failed(failure) = &result.status {
            self.write_failure(result, failure)?;
        }
        Ok(())
    }

    fn write_failure(&mut self, result: &StoryResult, failure: &StoryFailure) -> io::Result<()> {
        writeln!(
            self.writer,
            "{} {}",
            "--- FAIL:".style(self.styles.fail),
            result.title.style(self.styles.title),
        )?;
        if let Some(version) = &result.python_version {
            writeln!(self.writer, "  python: {version}")?;
        }
        let chain = DisplayErrorChain::new(failure).to_string();
        writeln!(self.writer, "  {}", chain.replace('\n', "\n  "))?;

        match failure {
            StoryFailure::Step { failure, .. } => self.write_step_details(failure)?,
            StoryFailure::SetUp(SetUpError::Tooling { error, .. })
            | StoryFailure::Profile(error) => self.write_process_details(error)?,
            _ => {}
        }
        Ok(())
    }

    fn write_step_details(&mut self, failure: &StepFailure) -> io::Result<()> {
        match failure {
            StepFailure::OutputMismatch(mismatch)
            | StepFailure::ContentsMismatch { mismatch, .. } => {
                self.write_block("expected", mismatch.expected())?;
                self.write_block("actual", mismatch.actual())
            }
            StepFailure::ExceptionMismatch(mismatch) => {
                self.write_block("expected", mismatch.expected())?;
                self.write_block("actual", mismatch.actual())
            }
            StepFailure::CodeRun(CodeRunError::CodeFailed { output, stderr }) => {
                self.write_block("output", output)?;
                self.write_block("stderr", stderr)
            }
            StepFailure::CodeRun(CodeRunError::SetupFailed { stderr }) => {
                self.write_block("stderr", stderr)
            }
            StepFailure::CodeRun(CodeRunError::Process(error)) => {
                self.write_process_details(error)
            }
            _ => Ok(()),
        }
    }

    fn write_process_details(&mut self, error: &ProcessExecutionError) -> io::Result<()> {
        if let ProcessExecutionError::NonZeroExit { stdout, stderr, .. } = error {
            self.write_block("stdout", stdout)?;
            self.write_block("stderr", stderr)?;
        }
        Ok(())
    }

    fn write_block(&mut self, heading: &str, text: &str) -> io::Result<()> {
        let text = text.trim_end();
        if text.is_empty() {
            return Ok(());
        }
        writeln!(
            self.writer,
            "  {}",
            format!("{heading}:").style(self.styles.heading)
        )?;
        for line in text.lines() {
            if line.is_empty() {
                writeln!(self.writer)?;
            } else {
                writeln!(self.writer, "    {line}")?;
            }
        }
        Ok(())
    }

    fn write_summary(&mut self, report: &RunReport) -> io::Result<()> {
        let stats = &report.stats;
        writeln!(self.writer, "------------")?;
        write!(
            self.writer,
            "{:>12} {}{} {} run: {} {}",
            "Summary".style(self.styles.pass),
            DisplayBracketedDuration(report.elapsed),
            stats.finished_count().style(self.styles.count),
            plural::stories_str(stats.finished_count()),
            stats.passed.style(self.styles.count),
            "passed".style(self.styles.pass),
        )?;
        if stats.rewritten > 0 {
            write!(
                self.writer,
                ", {} {}",
                stats.rewritten.style(self.styles.count),
                "rewritten".style(self.styles.rewrite),
            )?;
        }
        if stats.failed > 0 {
            write!(
                self.writer,
                ", {} {}",
                stats.failed.style(self.styles.count),
                "failed".style(self.styles.fail),
            )?;
        }
        if stats.not_run() > 0 {
            write!(
                self.writer,
                ", {} not run",
                stats.not_run().style(self.styles.count),
            )?;
        }
        writeln!(self.writer)
    }
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    start: Style,
    pass: Style,
    rewrite: Style,
    fail: Style,
    title: Style,
    heading: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.start = Style::new().dimmed();
        self.pass = Style::new().green().bold();
        self.rewrite = Style::new().magenta().bold();
        self.fail = Style::new().red().bold();
        self.title = Style::new().cyan();
        self.heading = Style::new().yellow();
    }
}
