// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use indoc::indoc;
use pretty_assertions::assert_eq;
use pystory_runner::{config::EngineSettings, expectation::StepState};

const CONFIG: &str = indoc! {r#"
    [paths]
    stories = "stories"

    [versions]
    legacy = "2.7.10"
    current = "3.5.0"
"#};

const BASIC: &str = indoc! {r#"
    # Basic stories.

    ["Hello world"]
    description = "Prints a greeting."

    ["Hello world".given]
    files = { "input.txt" = "hi" }

    [["Hello world".steps]]
    run.code = "print('Hello World !')"
    # Anything may be greeted.
    run.will-output = "Hello * !"

    [["Hello world".steps]]
    run.code = "open('output.txt', 'w').write('written')"

    [["Hello world".steps]]
    file-contents-will-be = { filename = "output.txt", contents = "written" }

    ["Raises"]
    [["Raises".steps]]
    run.code = "raise ValueError('x')"
    run.raises = { type = "ValueError", message = { "in python 2" = "old msg", "in python 3" = "new msg" } }
"#};

fn basic_python() -> ScriptedPython {
    ScriptedPython::new()
        .on("print('Hello World !')", Behavior::prints("Hello World !\n"))
        .on(
            "open('output.txt', 'w').write('written')",
            Behavior::prints("").writes("output.txt", "written\n"),
        )
        .on("raise ValueError('x')", Behavior::raises("ValueError", "new msg"))
}

fn key_dir(stories: &[(&str, &str)]) -> KeyDir {
    let key_dir = KeyDir::new();
    key_dir.write("pystory.toml", CONFIG);
    for (name, contents) in stories {
        key_dir.write(&format!("stories/{name}"), contents);
    }
    key_dir
}

#[test]
fn stories_pass() {
    let key_dir = key_dir(&[("basic.story", BASIC)]);
    let python = basic_python();
    let provisioner = FakeProvisioner::default();

    let played = play(&key_dir, &python, &provisioner, PlayOptions::default());

    assert_eq!(
        played.statuses(),
        [("basic Hello world", "passed"), ("basic Raises", "passed")]
    );
    assert!(played.report.is_success());
    assert_eq!(played.report.stats.passed, 2);
    assert_eq!(
        played.outcomes[0].steps,
        [StepState::Matched, StepState::Matched, StepState::Matched]
    );
    assert_eq!(played.outcomes[0].python_version.as_deref(), Some("3.5.0"));
    assert_eq!(python.code_runs(), 3, "each run step executes once");
    assert_eq!(
        key_dir.read("stories/basic.story"),
        BASIC,
        "nothing is rewritten when everything matches"
    );
}

#[test]
fn given_files_are_written_and_state_is_reset() {
    let key_dir = key_dir(&[("basic.story", BASIC)]);
    let python = basic_python();
    let provisioner = FakeProvisioner::default();

    play(&key_dir, &python, &provisioner, PlayOptions::default());

    // "Raises" ran last and declares no files, so the scratch directory holds only what it
    // produced.
    let state = key_dir.path().join(".gen/state");
    assert!(state.join("examplepythoncode.py").is_file());
    assert!(!state.join("input.txt").exists());
    assert!(!state.join("output.txt").exists());
}

#[test]
fn legacy_version_selects_legacy_message() {
    let key_dir = key_dir(&[("basic.story", BASIC)]);
    let python = basic_python();
    let provisioner = FakeProvisioner::default();

    let played = play(
        &key_dir,
        &python,
        &provisioner,
        PlayOptions {
            settings: rewrite_on(),
            python_version: Some("2.7.10"),
            ..PlayOptions::default()
        },
    );

    // The message differs by version, so even rewrite mode cannot fix it.
    assert_eq!(
        played.statuses(),
        [("basic Hello world", "passed"), ("basic Raises", "failed")]
    );
    let raises = &played.outcomes[1];
    assert_eq!(raises.failed_step, Some(0));
    assert_eq!(raises.steps, [StepState::Failed]);
    let failure = raises.failure.as_deref().expect("failure recorded");
    assert!(failure.contains("differs by Python version"), "{failure}");
    assert_eq!(key_dir.read("stories/basic.story"), BASIC);
    assert_eq!(*provisioner.requested.borrow(), ["2.7.10", "2.7.10"]);
}

const OUTPUT: &str = indoc! {r#"
    ["Output"]
    [["Output".steps]]
    # Greeting.
    run.code = "print('new')"
    run.will-output = "old"

    [["Output".steps]]
    run.code = "raise KeyError('k')"
    run.raises.type = "KeyError"
    run.raises.message = "'j'"
"#};

fn output_python() -> ScriptedPython {
    ScriptedPython::new()
        .on("print('new')", Behavior::prints("new\n"))
        .on("raise KeyError('k')", Behavior::raises("KeyError", "'k'"))
}

#[test]
fn mismatch_fails_without_rewrite() {
    let key_dir = key_dir(&[("output.story", OUTPUT)]);
    let python = output_python();
    let provisioner = FakeProvisioner::default();

    let played = play(&key_dir, &python, &provisioner, PlayOptions::default());

    assert_eq!(played.statuses(), [("output Output", "failed")]);
    let outcome = &played.outcomes[0];
    assert_eq!(outcome.failed_step, Some(0));
    assert_eq!(outcome.steps, [StepState::Failed, StepState::Pending]);
    assert_eq!(python.code_runs(), 1, "the first failure stops the story");
    assert_eq!(key_dir.read("stories/output.story"), OUTPUT);
}

#[test]
fn mismatch_is_rewritten_and_saved() {
    let key_dir = key_dir(&[("output.story", OUTPUT)]);
    let python = output_python();
    let provisioner = FakeProvisioner::default();

    let played = play(
        &key_dir,
        &python,
        &provisioner,
        PlayOptions {
            settings: rewrite_on(),
            ..PlayOptions::default()
        },
    );

    assert_eq!(played.statuses(), [("output Output", "rewritten")]);
    assert_eq!(played.report.stats.rewritten, 1);
    assert_eq!(
        played.outcomes[0].steps,
        [StepState::Rewritten, StepState::Rewritten]
    );
    assert_eq!(
        key_dir.read("stories/output.story"),
        indoc! {r#"
            ["Output"]
            [["Output".steps]]
            # Greeting.
            run.code = "print('new')"
            run.will-output = "new"

            [["Output".steps]]
            run.code = "raise KeyError('k')"
            run.raises.type = "KeyError"
            run.raises.message = "'k'"
        "#}
    );

    // Re-running the unchanged code against the rewritten story passes without rewriting.
    let played = play(&key_dir, &python, &provisioner, PlayOptions::default());
    assert_eq!(played.statuses(), [("output Output", "passed")]);
}

#[test]
fn failed_story_is_not_persisted() {
    let story = indoc! {r#"
        ["Partly rewritable"]
        [["Partly rewritable".steps]]
        run.code = "print('new')"
        run.will-output = "old"

        [["Partly rewritable".steps]]
        run.code = "raise KeyError('k')"
        run.raises.type = "ValueError"
    "#};
    let key_dir = key_dir(&[("partial.story", story)]);
    let python = output_python();
    let provisioner = FakeProvisioner::default();

    let played = play(
        &key_dir,
        &python,
        &provisioner,
        PlayOptions {
            settings: rewrite_on(),
            ..PlayOptions::default()
        },
    );

    assert_eq!(played.statuses(), [("partial Partly rewritable", "failed")]);
    assert_eq!(
        played.outcomes[0].steps,
        [StepState::Rewritten, StepState::Failed]
    );
    assert_eq!(
        key_dir.read("stories/partial.story"),
        story,
        "the first step's rewrite is discarded"
    );
}

#[test]
fn fail_fast_stops_the_play() {
    let key_dir = key_dir(&[("basic.story", BASIC), ("output.story", OUTPUT)]);
    let python = ScriptedPython::new()
        .on("print('Hello World !')", Behavior::prints("Hello World !\n"))
        .on(
            "open('output.txt', 'w').write('written')",
            Behavior::prints("").writes("output.txt", "written\n"),
        )
        .on("raise ValueError('x')", Behavior::raises("ValueError", "new msg"))
        .on("print('new')", Behavior::prints("new\n"));
    let provisioner = FakeProvisioner::default();

    // Ordered by name: "Hello world", "Output", "Raises".
    let played = play(
        &key_dir,
        &python,
        &provisioner,
        PlayOptions {
            no_fail_fast: false,
            ..PlayOptions::default()
        },
    );

    assert_eq!(
        played.statuses(),
        [("basic Hello world", "passed"), ("output Output", "failed")]
    );
    assert_eq!(played.report.stats.not_run(), 1);
    assert!(!played.report.is_success());
}

#[test]
fn story_version_and_setup_are_used() {
    let story = indoc! {r##"
        ["Old"]
        [ "Old".given ]
        python-version = "2.7"
        setup = "import os"
        scripts = { "bin/tool" = "#!/bin/sh\necho tool\n" }

        [["Old".steps]]
        run.code = "print('new')"
        run.will-output = "new"
    "##};
    let key_dir = key_dir(&[("old.story", story)]);
    let python = output_python();
    let provisioner = FakeProvisioner::default();

    let played = play(&key_dir, &python, &provisioner, PlayOptions::default());

    assert_eq!(played.statuses(), [("old Old", "passed")]);
    assert_eq!(played.outcomes[0].python_version.as_deref(), Some("2.7.0"));
    assert_eq!(*python.setups.borrow(), ["import os"]);

    let script = key_dir.path().join(".gen/state/bin/tool");
    assert_eq!(
        std::fs::read_to_string(&script).expect("script written"),
        "#!/bin/sh\necho tool\n"
    );
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&script)
            .expect("script metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o100, 0o100, "scripts are executable");
    }
}

#[test]
fn invalid_story_version_fails_set_up() {
    let story = indoc! {r#"
        ["Bad version"]
        given.python-version = "three"

        [["Bad version".steps]]
        run.code = "print('new')"
    "#};
    let key_dir = key_dir(&[("bad.story", story)]);
    let python = output_python();
    let provisioner = FakeProvisioner::default();

    let played = play(&key_dir, &python, &provisioner, PlayOptions::default());

    assert_eq!(played.statuses(), [("bad Bad version", "failed")]);
    assert_eq!(played.outcomes[0].python_version, None);
    assert_eq!(python.code_runs(), 0);
}

const TOOLING_CONFIG: &str = indoc! {r#"
    [paths]
    stories = "stories"

    [[tooling]]
    name = "project"
    watch = ["../project/*.py"]
    dir = "../project"
    uninstall = "project"
    install = ["install", "."]
"#};

const SIMPLE: &str = indoc! {r#"
    ["Simple"]
    [["Simple".steps]]
    run.code = "print('new')"
    run.will-output = "new"
"#};

#[test]
fn tooling_installs_only_when_watched_files_change() {
    let key_dir = key_dir(&[("simple.story", SIMPLE)]);
    key_dir.write("pystory.toml", TOOLING_CONFIG);
    key_dir.write("../project/module.py", "x = 1");
    let python = output_python();
    let provisioner = FakeProvisioner::default();

    play(&key_dir, &python, &provisioner, PlayOptions::default());
    assert_eq!(
        python.pip_invocations(),
        [
            vec!["uninstall", "-y", "project"],
            vec!["install", "."]
        ]
    );
    let pip_dir = python.invocations.borrow()[0]
        .cwd()
        .expect("pip runs in the tooling directory")
        .to_owned();
    assert_eq!(pip_dir, key_dir.path().join("../project"));

    play(&key_dir, &python, &provisioner, PlayOptions::default());
    assert_eq!(python.pip_invocations().len(), 2, "unchanged, so not reinstalled");

    key_dir.write("../project/module.py", "x = 22");
    play(&key_dir, &python, &provisioner, PlayOptions::default());
    assert_eq!(python.pip_invocations().len(), 4, "changed, so reinstalled");
}

#[test]
fn failed_install_is_retried() {
    let key_dir = key_dir(&[("simple.story", SIMPLE)]);
    key_dir.write("pystory.toml", TOOLING_CONFIG);
    key_dir.write("../project/module.py", "x = 1");
    let provisioner = FakeProvisioner::default();

    let failing = output_python().failing_pip();
    let played = play(&key_dir, &failing, &provisioner, PlayOptions::default());
    assert_eq!(played.statuses(), [("simple Simple", "failed")]);
    let failure = played.outcomes[0].failure.as_deref().expect("failure recorded");
    assert!(failure.contains("failed to install tooling `project`"), "{failure}");

    let python = output_python();
    let played = play(&key_dir, &python, &provisioner, PlayOptions::default());
    assert_eq!(played.statuses(), [("simple Simple", "passed")]);
    assert_eq!(python.pip_invocations().len(), 2);
}

#[test]
fn cprofile_prints_stats_after_success() {
    let key_dir = key_dir(&[("simple.story", SIMPLE)]);
    key_dir.write(
        "pystory.toml",
        indoc! {r#"
            [paths]
            stories = "stories"

            [profile]
            print-stats = "printstats.py"
        "#},
    );
    let python = output_python();
    let provisioner = FakeProvisioner::default();

    let played = play(
        &key_dir,
        &python,
        &provisioner,
        PlayOptions {
            settings: EngineSettings {
                rewrite: false,
                cprofile: true,
            },
            ..PlayOptions::default()
        },
    );

    assert_eq!(played.statuses(), [("simple Simple", "passed")]);
    let invocations = python.invocations.borrow();
    let last = invocations.last().expect("stats printer ran");
    assert_eq!(last.program().as_str(), FAKE_PYTHON);
    assert_eq!(
        last.args(),
        [
            key_dir.path().join("printstats.py").into_string(),
            key_dir.path().join(".gen/profile/simple.dat").into_string(),
        ]
    );
}
