// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use pystory_runner::{
    code_runner::{OUTPUT_MARKER, RESULT_FILE_NAME},
    config::{EngineSettings, KeyPaths, ProjectConfig},
    errors::{DisplayErrorChain, ProcessExecutionError, ProvisionError, StoryFailure},
    expectation::StepState,
    process::{Invocation, ProcessExecutor, ProcessOutput},
    provision::{Interpreter, PythonProvisioner},
    reporter::{RunReport, StoryEvent, StoryResult, StoryStatus},
    story::StoryCollection,
    story_runner::StoryRunnerBuilder,
    version::RuntimeVersion,
};
use std::{cell::RefCell, collections::HashMap, process::ExitStatus};

pub(crate) const FAKE_PYTHON: &str = "/fake/bin/python";

/// What a code fragment does when run by [`ScriptedPython`].
#[derive(Clone, Debug)]
pub(crate) struct Behavior {
    pub(crate) output: String,
    pub(crate) exception: Option<(String, String)>,
    /// Files written into the working directory, by name.
    pub(crate) writes: Vec<(String, String)>,
}

impl Behavior {
    pub(crate) fn prints(output: &str) -> Self {
        Self {
            output: output.to_owned(),
            exception: None,
            writes: Vec::new(),
        }
    }

    pub(crate) fn raises(type_name: &str, message: &str) -> Self {
        Self {
            output: String::new(),
            exception: Some((type_name.to_owned(), message.to_owned())),
            writes: Vec::new(),
        }
    }

    pub(crate) fn writes(mut self, filename: &str, contents: &str) -> Self {
        self.writes.push((filename.to_owned(), contents.to_owned()));
        self
    }
}

/// A stand-in interpreter: code fragments are looked up in a table instead of being run.
///
/// Every invocation is recorded. Invocations through `python -m pip` succeed without doing
/// anything, unless pip has been told to fail.
#[derive(Debug, Default)]
pub(crate) struct ScriptedPython {
    behaviors: HashMap<String, Behavior>,
    fail_pip: bool,
    pub(crate) invocations: RefCell<Vec<Invocation>>,
    pub(crate) setups: RefCell<Vec<String>>,
}

impl ScriptedPython {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, code: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(code.to_owned(), behavior);
        self
    }

    pub(crate) fn failing_pip(mut self) -> Self {
        self.fail_pip = true;
        self
    }

    pub(crate) fn pip_invocations(&self) -> Vec<Vec<String>> {
        self.invocations
            .borrow()
            .iter()
            .filter(|invocation| invocation.args().starts_with(&["-m".to_owned(), "pip".to_owned()]))
            .map(|invocation| invocation.args()[2..].to_vec())
            .collect()
    }

    pub(crate) fn code_runs(&self) -> usize {
        self.invocations
            .borrow()
            .iter()
            .filter(|invocation| invocation.args().len() == 1)
            .count()
    }
}

impl ProcessExecutor for ScriptedPython {
    fn execute(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessExecutionError> {
        self.invocations.borrow_mut().push(invocation.clone());
        let args = invocation.args();
        if args.first().map(String::as_str) == Some("-m") {
            if self.fail_pip && args.get(2).map(String::as_str) == Some("install") {
                return Err(ProcessExecutionError::NonZeroExit {
                    command: invocation.command_line(),
                    status: ExitStatus::default(),
                    stdout: String::new(),
                    stderr: "ERROR: no matching distribution".to_owned(),
                });
            }
            return Ok(ProcessOutput {
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let script = std::fs::read_to_string(&args[0]).expect("wrapper script exists");
        let code = literal(&script, "_CODE");
        self.setups.borrow_mut().push(literal(&script, "_SETUP"));
        let capture = script.contains("_CAPTURE = True");
        let behavior = self
            .behaviors
            .get(&code)
            .unwrap_or_else(|| panic!("no behavior scripted for {code:?}"));

        let cwd = invocation.cwd().expect("code runs in the scratch directory");
        for (filename, contents) in &behavior.writes {
            std::fs::write(cwd.join(filename), contents).expect("wrote file");
        }
        let stdout = format!("{OUTPUT_MARKER}\n{}", behavior.output);

        if capture {
            let result = match &behavior.exception {
                Some((type_name, message)) => {
                    serde_json::json!({ "type": type_name, "message": message })
                }
                None => serde_json::Value::Null,
            };
            std::fs::write(cwd.join(RESULT_FILE_NAME), result.to_string()).expect("wrote result");
        } else if let Some((type_name, message)) = &behavior.exception {
            return Err(ProcessExecutionError::NonZeroExit {
                command: invocation.command_line(),
                status: ExitStatus::default(),
                stdout,
                stderr: format!("Traceback (most recent call last):\n{type_name}: {message}\n"),
            });
        }
        Ok(ProcessOutput {
            stdout,
            stderr: String::new(),
        })
    }

    fn execute_inherited(&self, invocation: &Invocation) -> Result<(), ProcessExecutionError> {
        self.invocations.borrow_mut().push(invocation.clone());
        Ok(())
    }
}

/// Extracts the string literal assigned to `name` in a wrapper script.
fn literal(script: &str, name: &str) -> String {
    let prefix = format!("{name} = u");
    let line = script
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .unwrap_or_else(|| panic!("wrapper assigns {name}"));
    serde_json::from_str(line).expect("literal is a JSON string")
}

/// Hands out [`FAKE_PYTHON`] for every version, recording the versions asked for.
#[derive(Debug, Default)]
pub(crate) struct FakeProvisioner {
    pub(crate) requested: RefCell<Vec<String>>,
}

impl PythonProvisioner for FakeProvisioner {
    fn provision(&self, version: &RuntimeVersion) -> Result<Interpreter, ProvisionError> {
        self.requested.borrow_mut().push(version.to_string());
        Ok(Interpreter::from_python(version.clone(), FAKE_PYTHON))
    }
}

/// A key directory, `key/` inside a temporary directory so that tests can also write
/// siblings such as `../project`.
pub(crate) struct KeyDir {
    _dir: Utf8TempDir,
    key: Utf8PathBuf,
}

impl KeyDir {
    pub(crate) fn new() -> Self {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let key = dir.path().join("key");
        std::fs::create_dir_all(key.join("stories")).expect("created stories dir");
        Self { _dir: dir, key }
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        &self.key
    }

    pub(crate) fn write(&self, relative: &str, contents: &str) -> Utf8PathBuf {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("created parent");
        }
        std::fs::write(&path, contents).expect("wrote file");
        path
    }

    pub(crate) fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path().join(relative)).expect("read file")
    }

    pub(crate) fn config(&self) -> ProjectConfig {
        ProjectConfig::load(self.path()).expect("valid project config")
    }

    pub(crate) fn paths(&self, config: &ProjectConfig) -> KeyPaths {
        config.key_paths(self.path())
    }

    pub(crate) fn stories(&self, config: &ProjectConfig) -> StoryCollection {
        StoryCollection::discover(&self.paths(config).stories).expect("stories load")
    }
}

/// A story result, reduced to what tests look at.
#[derive(Clone, Debug)]
pub(crate) struct Outcome {
    pub(crate) title: String,
    pub(crate) python_version: Option<String>,
    pub(crate) steps: Vec<StepState>,
    pub(crate) status: &'static str,
    pub(crate) failed_step: Option<usize>,
    pub(crate) failure: Option<String>,
}

impl Outcome {
    fn new(result: &StoryResult) -> Self {
        let (status, failed_step, failure) = match &result.status {
            StoryStatus::Passed => ("passed", None, None),
            StoryStatus::Rewritten { .. } => ("rewritten", None, None),
            StoryStatus::Failed(failure) => {
                let failed_step = match failure {
                    StoryFailure::Step { index, .. } => Some(*index),
                    _ => None,
                };
                let failure = DisplayErrorChain::new(failure).to_string();
                eprintln!("{} failed: {failure}", result.title);
                ("failed", failed_step, Some(failure))
            }
        };
        Self {
            title: result.title.clone(),
            python_version: result.python_version.as_ref().map(ToString::to_string),
            steps: result.steps.clone(),
            status,
            failed_step,
            failure,
        }
    }
}

/// Everything a test needs to look at after a play.
pub(crate) struct Played {
    pub(crate) report: RunReport,
    pub(crate) outcomes: Vec<Outcome>,
}

impl Played {
    pub(crate) fn statuses(&self) -> Vec<(&str, &'static str)> {
        self.outcomes
            .iter()
            .map(|outcome| (outcome.title.as_str(), outcome.status))
            .collect()
    }
}

pub(crate) struct PlayOptions {
    pub(crate) settings: EngineSettings,
    pub(crate) python_version: Option<&'static str>,
    pub(crate) no_fail_fast: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            settings: EngineSettings::default(),
            python_version: None,
            no_fail_fast: true,
        }
    }
}

pub(crate) fn rewrite_on() -> EngineSettings {
    EngineSettings {
        rewrite: true,
        cprofile: false,
    }
}

/// Plays every story under the key directory, collecting results.
pub(crate) fn play(
    key_dir: &KeyDir,
    python: &ScriptedPython,
    provisioner: &FakeProvisioner,
    options: PlayOptions,
) -> Played {
    let config = key_dir.config();
    let mut stories = key_dir.stories(&config).ordered_by_name();
    let mut builder = StoryRunnerBuilder::default();
    builder
        .set_settings(options.settings)
        .set_no_fail_fast(options.no_fail_fast);
    if let Some(version) = options.python_version {
        builder.set_python_version(RuntimeVersion::parse(version).expect("valid version"));
    }
    let runner = builder.build(key_dir.paths(&config), &config, provisioner, python);

    let mut outcomes = Vec::new();
    let report = runner.play(&mut stories, |event| {
        if let StoryEvent::StoryFinished { result } = event {
            outcomes.push(Outcome::new(result));
        }
    });
    Played { report, outcomes }
}
