// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs stories against a real `python3`, when one is installed.

use crate::fixtures::KeyDir;
use camino::Utf8PathBuf;
use indoc::indoc;
use pretty_assertions::assert_eq;
use pystory_runner::{
    config::EngineSettings,
    errors::ProvisionError,
    process::DuctExecutor,
    provision::{Interpreter, PythonProvisioner},
    reporter::{StoryEvent, StoryStatus},
    story::{Step, StoryFile},
    story_runner::StoryRunnerBuilder,
    version::RuntimeVersion,
};
use std::time::Duration;

/// Uses whatever `python3` is first on `PATH`, for every version.
struct PathPython(Utf8PathBuf);

impl PathPython {
    fn find() -> Option<Self> {
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok())
            .map(|dir| dir.join("python3"))
            .find(|candidate| candidate.is_file())
            .map(Self)
    }
}

impl PythonProvisioner for PathPython {
    fn provision(&self, version: &RuntimeVersion) -> Result<Interpreter, ProvisionError> {
        Ok(Interpreter::from_python(version.clone(), &self.0))
    }
}

const STORY: &str = indoc! {r#"
    ["Real"]
    given.setup = "print('hidden'); import json"
    given.files = { "data.json" = "[1, 2, 3]" }

    [["Real".steps]]
    run.code = """
    with open('data.json') as f:
        print(sum(json.load(f)))
    print('cost: 5*')
    """
    run.will-output = "7"

    [["Real".steps]]
    run.code = "int('abc')"
    run.raises.type = "ValueError"
    run.raises.message = { "in python 2" = "old", "in python 3" = "invalid literal for int() with base 10: *" }

    [["Real".steps]]
    run.code = "open('out.txt', 'w').write('done  \\n\\n')"

    [["Real".steps]]
    file-contents-will-be = { filename = "out.txt", contents = "done" }
"#};

#[test]
fn real_interpreter_round_trip() {
    let Some(python) = PathPython::find() else {
        eprintln!("skipping: python3 not found on PATH");
        return;
    };
    let key_dir = KeyDir::new();
    key_dir.write("pystory.toml", "[paths]\nstories = \"stories\"\n");
    key_dir.write("stories/real.story", STORY);
    let executor = DuctExecutor::new(Some(Duration::from_secs(60)));

    let play = |settings: EngineSettings| {
        let config = key_dir.config();
        let mut stories = key_dir.stories(&config);
        let mut builder = StoryRunnerBuilder::default();
        builder.set_settings(settings);
        let runner = builder.build(key_dir.paths(&config), &config, &python, &executor);
        let mut statuses = Vec::new();
        runner.play(&mut stories, |event| {
            if let StoryEvent::StoryFinished { result } = event {
                let status = match &result.status {
                    StoryStatus::Passed => "passed".to_owned(),
                    StoryStatus::Rewritten { count } => format!("rewritten {count}"),
                    StoryStatus::Failed(failure) => format!("failed: {failure}"),
                };
                statuses.push(status);
            }
        });
        statuses
    };

    assert_eq!(play(EngineSettings::default()), ["failed: step 1 (run) failed"]);

    let rewrite = EngineSettings {
        rewrite: true,
        cprofile: false,
    };
    assert_eq!(play(rewrite), ["rewritten 1"]);
    let saved = StoryFile::load(&key_dir.path().join("stories/real.story"))
        .expect("saved story loads");
    let Step::Run(run) = &saved.stories()[0].steps()[0] else {
        panic!("first step is a run step");
    };
    // Setup output is excluded, and plain asterisks need no escape.
    assert_eq!(run.will_output.as_deref(), Some("6\ncost: 5*"));

    assert_eq!(play(EngineSettings::default()), ["passed"]);
}
