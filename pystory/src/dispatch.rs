// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, PystoryExitCode, Result,
    output::{OutputContext, OutputOpts},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use pystory_runner::{
    code_runner::SCRIPT_FILE_NAME,
    config::{EngineSettings, KeyPaths, PersonalSettings, ProjectConfig},
    process::{DuctExecutor, ProcessExecutor},
    provision::{LocalPythons, PythonProvisioner},
    reporter::{RunReport, StoryReporter},
    story::StoryCollection,
    story_runner::StoryRunnerBuilder,
    version::RuntimeVersion,
};
use std::io;
use tracing::{debug, info};

/// Run Python example stories and keep their expectations up to date.
///
/// Stories live in `.story` files under the key directory. Each story sets up a scratch
/// directory, runs Python code fragments and checks what they print and raise.
#[derive(Debug, Parser)]
#[command(
    version,
    bin_name = "pystory",
    styles = crate::output::clap_styles::style(),
    max_term_width = 100
)]
pub struct PystoryApp {
    #[clap(flatten)]
    common: CommonOpts,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Directory holding pystory.toml, personal settings and stories
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        env = "PYSTORY_KEY_DIR",
        default_value = "."
    )]
    key_dir: Utf8PathBuf,

    /// Keep running stories after one fails
    #[arg(long, global = true)]
    no_fail_fast: bool,

    #[clap(flatten)]
    output: OutputOpts,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the single story matching every keyword, using personal settings
    ///
    /// Keywords match case-insensitively against "<file name> <story name>". Expectations are
    /// rewritten in place if `rewrite` is on in personalsettings.toml or `--rewrite` is passed.
    Tdd(TddOpts),

    /// Run every story in a file under the legacy and then the current Python
    Regressfile {
        /// The story file name, with or without the `.story` extension
        #[arg(value_name = "FILENAME")]
        filename: String,
    },

    /// Run every story under the legacy and then the current Python
    ///
    /// Stories marked `fails-on-python-2` are skipped under the legacy version.
    Regression,

    /// Re-run the example script left behind by the last story step
    Rerun {
        /// Python version to re-run under [default: from personal settings]
        #[arg(long, value_name = "VERSION")]
        python_version: Option<String>,
    },
}

#[derive(Debug, Args)]
struct TddOpts {
    /// Keywords selecting the story
    #[arg(value_name = "KEYWORDS")]
    keywords: Vec<String>,

    /// Rewrite mismatched expectations into the story file
    #[arg(long)]
    rewrite: bool,

    /// Profile each step and print stats after the story passes
    #[arg(long)]
    cprofile: bool,

    /// Python version to run under [default: from personal settings]
    #[arg(long, value_name = "VERSION")]
    python_version: Option<String>,
}

impl PystoryApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.common.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let app = KeyDirApp::new(&self.common.key_dir, self.common.no_fail_fast, output)?;
        match self.command {
            Command::Tdd(opts) => app.exec_tdd(opts),
            Command::Regressfile { filename } => app.exec_regressfile(&filename),
            Command::Regression => app.exec_regression(),
            Command::Rerun { python_version } => app.exec_rerun(python_version.as_deref()),
        }
    }
}

/// Everything derived from the key directory.
struct KeyDirApp {
    config: ProjectConfig,
    paths: KeyPaths,
    no_fail_fast: bool,
    output: OutputContext,
}

impl KeyDirApp {
    fn new(key_dir: &Utf8Path, no_fail_fast: bool, output: OutputContext) -> Result<Self> {
        let config = ProjectConfig::load(key_dir).map_err(ExpectedError::config_load)?;
        let paths = config.key_paths(key_dir);
        debug!(
            "key dir {}: stories in {}, generated state in {}",
            paths.key, paths.stories, paths.generated,
        );
        Ok(Self {
            config,
            paths,
            no_fail_fast,
            output,
        })
    }

    fn load_settings(&self) -> Result<PersonalSettings> {
        PersonalSettings::load_or_create(&self.paths.key).map_err(ExpectedError::config_load)
    }

    fn discover(&self) -> Result<StoryCollection> {
        StoryCollection::discover(&self.paths.stories).map_err(ExpectedError::story_collection)
    }

    fn exec_tdd(&self, opts: TddOpts) -> Result<i32> {
        let settings = self.load_settings()?;
        let mut stories = self
            .discover()?
            .shortcut(opts.keywords.as_slice())
            .map_err(ExpectedError::story_collection)?;

        let engine = EngineSettings {
            rewrite: settings.engine.rewrite || opts.rewrite,
            cprofile: settings.engine.cprofile || opts.cprofile,
        };
        let version = tdd_version(opts.python_version.as_deref(), settings.python_version)?;
        let mut builder = StoryRunnerBuilder::default();
        builder.set_settings(engine).set_python_version(version);
        let report = self.play(&mut stories, builder)?;
        finish(&report)
    }

    fn exec_regressfile(&self, filename: &str) -> Result<i32> {
        let stories = self
            .discover()?
            .in_filename(filename)
            .map_err(ExpectedError::story_collection)?
            .ordered_by_name();
        self.regress(stories.clone(), stories)
    }

    fn exec_regression(&self) -> Result<i32> {
        let current = self.discover()?;
        let legacy = current
            .clone()
            .filter(|story| !story.info().fails_on_python_2);
        self.regress(legacy, current)
    }

    /// Plays `legacy` under the legacy version, then `current` under the current version.
    ///
    /// Expectations are never rewritten.
    fn regress(&self, mut legacy: StoryCollection, mut current: StoryCollection) -> Result<i32> {
        if current.is_empty() {
            return Err(ExpectedError::NoStoriesSelected);
        }
        let versions = [
            (&mut legacy, self.config.legacy_version()),
            (&mut current, self.config.current_version()),
        ];
        for (stories, version) in versions {
            if stories.is_empty() {
                debug!("no stories to run under Python {version}");
                continue;
            }
            let mut builder = StoryRunnerBuilder::default();
            builder
                .set_settings(EngineSettings::default())
                .set_python_version(version.clone());
            let report = self.play(stories, builder)?;
            if !report.is_success() {
                return Err(ExpectedError::StoryRunFailed);
            }
        }
        Ok(PystoryExitCode::OK)
    }

    fn exec_rerun(&self, python_version: Option<&str>) -> Result<i32> {
        let version = match python_version {
            Some(version) => parse_version(version)?,
            None => self.load_settings()?.python_version,
        };
        let state_dir = self.paths.state();
        let script = state_dir.join(SCRIPT_FILE_NAME);
        if !script.is_file() {
            return Err(ExpectedError::RerunScriptMissing { path: script });
        }

        let interpreter = self
            .provisioner()
            .provision(&version)
            .map_err(|err| ExpectedError::Provision { err })?;
        info!("re-running {script} under Python {version}");
        let invocation = interpreter
            .python
            .invocation([script.as_str()])
            .current_dir(&state_dir);
        self.executor()
            .execute_inherited(&invocation)
            .map_err(|err| ExpectedError::RerunFailed { err })?;
        Ok(PystoryExitCode::OK)
    }

    fn provisioner(&self) -> LocalPythons {
        LocalPythons::new(self.paths.generated.clone())
    }

    fn executor(&self) -> DuctExecutor {
        DuctExecutor::new(self.config.timeout())
    }

    fn play(
        &self,
        stories: &mut StoryCollection,
        mut builder: StoryRunnerBuilder,
    ) -> Result<RunReport> {
        builder.set_no_fail_fast(self.no_fail_fast);
        let provisioner = self.provisioner();
        let executor = self.executor();
        let runner = builder.build(self.paths.clone(), &self.config, &provisioner, &executor);

        let mut reporter = StoryReporter::new(io::stderr());
        if self
            .output
            .color
            .should_colorize(supports_color::Stream::Stderr)
        {
            reporter = reporter.colorize();
        }

        let mut write_error = None;
        let report = runner.play(stories, |event| {
            if write_error.is_none() {
                if let Err(err) = reporter.report_event(&event) {
                    write_error = Some(err);
                }
            }
        });
        match write_error {
            Some(err) => Err(ExpectedError::WriteReport { err }),
            None => Ok(report),
        }
    }
}

/// The version `tdd` runs every story under: the `--python-version` flag, else the personal
/// settings version. Either one overrides a story's own `python-version`.
fn tdd_version(flag: Option<&str>, settings_version: RuntimeVersion) -> Result<RuntimeVersion> {
    match flag {
        Some(version) => parse_version(version),
        None => Ok(settings_version),
    }
}

fn parse_version(input: &str) -> Result<RuntimeVersion> {
    RuntimeVersion::parse(input).map_err(|err| ExpectedError::InvalidPythonVersion { err })
}

fn finish(report: &RunReport) -> Result<i32> {
    if report.is_success() {
        Ok(PystoryExitCode::OK)
    } else {
        Err(ExpectedError::StoryRunFailed)
    }
}
