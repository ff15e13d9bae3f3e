// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The story runtime: setting up, running and tearing down stories.
//!
//! The main structure in this module is [`StoryRunner`].

use crate::{
    code_runner::CodeRunner,
    config::{EngineSettings, KeyPaths, ProjectConfig},
    errors::{DisplayErrorChain, SetUpError, StoryFailure},
    expectation::{ExpectationEngine, StepOutcome, StepState},
    helpers::{make_executable, write_creating_parents},
    monitor::ChangeMonitor,
    process::ProcessExecutor,
    provision::{Interpreter, PythonProvisioner},
    reporter::{RunReport, RunStats, StoryEvent, StoryResult, StoryStatus},
    story::{Story, StoryCollection, StoryId, StepRewrite},
    version::RuntimeVersion,
};
use camino::Utf8PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Builds a [`StoryRunner`].
#[derive(Clone, Debug, Default)]
pub struct StoryRunnerBuilder {
    settings: EngineSettings,
    python_version: Option<RuntimeVersion>,
    no_fail_fast: bool,
}

impl StoryRunnerBuilder {
    /// Sets the engine settings for the run.
    pub fn set_settings(&mut self, settings: EngineSettings) -> &mut Self {
        self.settings = settings;
        self
    }

    /// Runs every story under `version`, whatever the story itself asks for.
    pub fn set_python_version(&mut self, version: RuntimeVersion) -> &mut Self {
        self.python_version = Some(version);
        self
    }

    /// Keeps running stories after one fails.
    pub fn set_no_fail_fast(&mut self, no_fail_fast: bool) -> &mut Self {
        self.no_fail_fast = no_fail_fast;
        self
    }

    /// Creates the runner.
    pub fn build<'a>(
        self,
        paths: KeyPaths,
        config: &'a ProjectConfig,
        provisioner: &'a dyn PythonProvisioner,
        executor: &'a dyn ProcessExecutor,
    ) -> StoryRunner<'a> {
        let default_version = config.current_version().clone();
        StoryRunner {
            paths,
            config,
            provisioner,
            executor,
            settings: self.settings,
            python_version: self.python_version,
            default_version,
            no_fail_fast: self.no_fail_fast,
        }
    }
}

/// Plays stories, one at a time.
pub struct StoryRunner<'a> {
    paths: KeyPaths,
    config: &'a ProjectConfig,
    provisioner: &'a dyn PythonProvisioner,
    executor: &'a dyn ProcessExecutor,
    settings: EngineSettings,
    python_version: Option<RuntimeVersion>,
    default_version: RuntimeVersion,
    no_fail_fast: bool,
}

impl StoryRunner<'_> {
    /// Plays every selected story in `stories`, in selection order.
    ///
    /// Story files are saved as stories complete with rewritten expectations. Unless fail-fast
    /// is disabled, the first failing story stops the play.
    pub fn play<F>(&self, stories: &mut StoryCollection, mut callback: F) -> RunReport
    where
        F: FnMut(StoryEvent<'_>),
    {
        let start = Instant::now();
        let ids = stories.ids().to_vec();
        let mut stats = RunStats {
            initial_count: ids.len(),
            ..RunStats::default()
        };
        callback(StoryEvent::RunStarted {
            story_count: ids.len(),
            python_version: self.python_version.as_ref(),
        });

        for id in ids {
            let title = stories.title(id);
            callback(StoryEvent::StoryStarted { title: &title });
            let result = self.run_story(stories, id, title);
            stats.record(&result.status);
            let failed = !result.status.is_success();
            callback(StoryEvent::StoryFinished { result: &result });

            if failed && !self.no_fail_fast {
                debug!("stopping after first failure");
                break;
            }
        }

        let report = RunReport {
            stats,
            elapsed: start.elapsed(),
        };
        callback(StoryEvent::RunFinished { report: &report });
        report
    }

    fn run_story(&self, stories: &mut StoryCollection, id: StoryId, title: String) -> StoryResult {
        let start = Instant::now();
        let story = stories.story(id);
        let mut steps = vec![StepState::Pending; story.steps().len()];

        let version = match self.resolve_version(story) {
            Ok(version) => version,
            Err(error) => {
                return StoryResult {
                    title,
                    python_version: None,
                    steps,
                    status: StoryStatus::Failed(StoryFailure::SetUp(error)),
                    time_taken: start.elapsed(),
                };
            }
        };
        info!("running {title} under Python {version}");

        let status = match self.run_steps(story, &version, &mut steps) {
            Ok((interpreter, rewrites)) => self.finish(stories, id, &interpreter, rewrites),
            Err(failure) => StoryStatus::Failed(failure),
        };

        StoryResult {
            title,
            python_version: Some(version),
            steps,
            status,
            time_taken: start.elapsed(),
        }
    }

    fn profile_path(&self, slug: &str) -> Utf8PathBuf {
        self.paths.profile().join(format!("{slug}.dat"))
    }

    fn resolve_version(&self, story: &Story) -> Result<RuntimeVersion, SetUpError> {
        if let Some(version) = &self.python_version {
            return Ok(version.clone());
        }
        match &story.given().python_version {
            Some(input) => RuntimeVersion::parse(input).map_err(SetUpError::Version),
            None => Ok(self.default_version.clone()),
        }
    }

    fn run_steps(
        &self,
        story: &Story,
        version: &RuntimeVersion,
        states: &mut [StepState],
    ) -> Result<(Interpreter, Vec<(usize, StepRewrite)>), StoryFailure> {
        let interpreter = self.set_up(story, version).map_err(StoryFailure::SetUp)?;

        let state_dir = self.paths.state();
        let mut runner = CodeRunner::new(self.executor, interpreter.python.clone(), &state_dir);
        if let Some(setup) = &story.given().setup {
            runner = runner.with_setup_code(setup.as_str());
        }
        if self.settings.cprofile {
            let profile_dir = self.paths.profile();
            std::fs::create_dir_all(&profile_dir).map_err(|error| {
                StoryFailure::SetUp(SetUpError::ProfileDir {
                    path: profile_dir.clone(),
                    error,
                })
            })?;
            runner = runner.with_cprofile(self.profile_path(story.slug()));
        }
        let engine = ExpectationEngine::new(&runner, self.settings, version.family(), &state_dir);

        let mut rewrites = Vec::new();
        for (index, step) in story.steps().iter().enumerate() {
            states[index] = StepState::Running;
            match engine.run_step(step) {
                Ok(outcome) => {
                    states[index] = outcome.state();
                    if let StepOutcome::Rewritten(step_rewrites) = outcome {
                        rewrites.extend(step_rewrites.into_iter().map(|rewrite| (index, rewrite)));
                    }
                }
                Err(failure) => {
                    states[index] = StepState::Failed;
                    return Err(StoryFailure::Step {
                        index,
                        kind: step.kind(),
                        failure,
                    });
                }
            }
        }
        Ok((interpreter, rewrites))
    }

    /// Prepares the scratch directory, interpreter and tooling for a story.
    fn set_up(&self, story: &Story, version: &RuntimeVersion) -> Result<Interpreter, SetUpError> {
        let state_dir = self.paths.state();
        debug!("resetting scratch directory {state_dir}");
        if state_dir.exists() {
            std::fs::remove_dir_all(&state_dir).map_err(|error| SetUpError::ClearState {
                path: state_dir.clone(),
                error,
            })?;
        }
        std::fs::create_dir_all(&state_dir).map_err(|error| SetUpError::ClearState {
            path: state_dir.clone(),
            error,
        })?;

        let given = story.given();
        for (name, contents) in &given.scripts {
            let path = state_dir.join(name);
            write_creating_parents(&path, contents)
                .and_then(|()| make_executable(&path))
                .map_err(|error| SetUpError::WriteScript { path, error })?;
        }
        for (name, contents) in &given.files {
            let path = state_dir.join(name);
            write_creating_parents(&path, contents)
                .map_err(|error| SetUpError::WriteFile { path, error })?;
        }

        let interpreter = self
            .provisioner
            .provision(version)
            .map_err(SetUpError::Provision)?;
        self.install_tooling(&interpreter)?;
        Ok(interpreter)
    }

    fn install_tooling(&self, interpreter: &Interpreter) -> Result<(), SetUpError> {
        for tooling in self.config.tooling() {
            let monitor = ChangeMonitor::new(
                self.paths.monitor(),
                format!("{} {}", tooling.name, interpreter.version),
                &self.paths.key,
                &tooling.watch,
            );
            let guard = monitor.check().map_err(|error| SetUpError::Monitor {
                name: tooling.name.clone(),
                error,
            })?;
            if !guard.changed() {
                debug!("tooling {}: watched files unchanged, skipping", tooling.name);
                continue;
            }

            let dir = self.paths.key.join(&tooling.dir);
            if let Some(package) = &tooling.uninstall {
                let invocation = interpreter
                    .pip
                    .invocation(["uninstall", "-y", package.as_str()])
                    .current_dir(&dir);
                if let Err(error) = self.executor.execute(&invocation) {
                    debug!(
                        "tooling {}: ignoring uninstall failure: {}",
                        tooling.name,
                        DisplayErrorChain::new(&error),
                    );
                }
            }

            info!("installing tooling {}", tooling.name);
            let invocation = interpreter
                .pip
                .invocation(&tooling.install)
                .current_dir(&dir);
            self.executor
                .execute(&invocation)
                .map_err(|error| SetUpError::Tooling {
                    name: tooling.name.clone(),
                    error,
                })?;
            guard.commit().map_err(|error| SetUpError::Monitor {
                name: tooling.name.clone(),
                error,
            })?;
        }
        Ok(())
    }

    /// End-of-story actions for a story whose steps all passed.
    fn finish(
        &self,
        stories: &mut StoryCollection,
        id: StoryId,
        interpreter: &Interpreter,
        rewrites: Vec<(usize, StepRewrite)>,
    ) -> StoryStatus {
        let count = rewrites.len();
        if let Err(failure) = self.persist(stories, id, rewrites) {
            return StoryStatus::Failed(failure);
        }
        if self.settings.cprofile {
            if let Err(failure) = self.print_stats(interpreter, stories.story(id).slug()) {
                return StoryStatus::Failed(failure);
            }
        }
        if count == 0 {
            StoryStatus::Passed
        } else {
            StoryStatus::Rewritten { count }
        }
    }

    fn persist(
        &self,
        stories: &mut StoryCollection,
        id: StoryId,
        rewrites: Vec<(usize, StepRewrite)>,
    ) -> Result<(), StoryFailure> {
        if rewrites.is_empty() {
            return Ok(());
        }
        let file = stories.file_mut(id);
        for (step_index, rewrite) in &rewrites {
            file.update_step(id.story, *step_index, rewrite)
                .map_err(StoryFailure::Update)?;
        }
        file.save().map_err(StoryFailure::Persist)
    }

    fn print_stats(&self, interpreter: &Interpreter, slug: &str) -> Result<(), StoryFailure> {
        let Some(script) = self.config.print_stats() else {
            warn!("cprofile is on but no profile.print-stats script is configured");
            return Ok(());
        };
        let profile = self.profile_path(slug);
        let invocation = interpreter
            .python
            .invocation([self.paths.key.join(script).into_string(), profile.into_string()])
            .current_dir(&self.paths.key);
        self.executor
            .execute_inherited(&invocation)
            .map_err(StoryFailure::Profile)
    }
}
