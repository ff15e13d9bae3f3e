// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Project configuration (`pystory.toml`) and personal settings (`personalsettings.toml`).
//!
//! Both files live in the key directory. A missing `pystory.toml` means every default applies;
//! a missing `personalsettings.toml` is created with defaults so it can be edited. Unknown keys
//! in either file produce warnings, not errors.

use crate::{errors::ConfigError, version::RuntimeVersion};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, de::DeserializeOwned};
use std::{collections::BTreeSet, io, time::Duration};
use tracing::{debug, warn};

/// The name of the project configuration file.
pub const PROJECT_CONFIG_FILE_NAME: &str = "pystory.toml";

/// The name of the personal settings file.
pub const PERSONAL_SETTINGS_FILE_NAME: &str = "personalsettings.toml";

const DEFAULT_LEGACY_VERSION: &str = "2.7.10";
const DEFAULT_CURRENT_VERSION: &str = "3.5.0";

/// Settings for the expectation engine, fixed for the duration of a run.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct EngineSettings {
    /// Rewrite mismatched expectations instead of failing.
    #[serde(default)]
    pub rewrite: bool,
    /// Profile code fragments with cProfile.
    #[serde(default)]
    pub cprofile: bool,
}

/// Parsed `pystory.toml`.
#[derive(Clone, Debug)]
pub struct ProjectConfig {
    stories: Utf8PathBuf,
    gen_dir: Utf8PathBuf,
    legacy: RuntimeVersion,
    current: RuntimeVersion,
    timeout: Option<Duration>,
    print_stats: Option<Utf8PathBuf>,
    tooling: Vec<ToolingConfig>,
}

impl ProjectConfig {
    /// Loads `pystory.toml` from the key directory.
    pub fn load(key_dir: &Utf8Path) -> Result<Self, ConfigError> {
        let path = key_dir.join(PROJECT_CONFIG_FILE_NAME);
        let deserialized = match read_optional(&path)? {
            Some(contents) => deserialize_with_warnings(&path, &contents)?,
            None => {
                debug!("project config: no file at {path}, using defaults");
                DeserializedProjectConfig::default()
            }
        };
        Self::compile(&path, deserialized)
    }

    /// Parses project configuration from a string. `path` is used for messages.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, ConfigError> {
        Self::compile(path, deserialize_with_warnings(path, contents)?)
    }

    fn compile(path: &Utf8Path, config: DeserializedProjectConfig) -> Result<Self, ConfigError> {
        let parse_version = |input: &str| {
            RuntimeVersion::parse(input).map_err(|error| ConfigError::InvalidVersion {
                path: path.to_owned(),
                error,
            })
        };
        Ok(Self {
            stories: config.paths.stories,
            gen_dir: config.paths.generated,
            legacy: parse_version(&config.versions.legacy)?,
            current: parse_version(&config.versions.current)?,
            timeout: config.run.timeout,
            print_stats: config.profile.print_stats,
            tooling: config.tooling,
        })
    }

    /// The legacy-family version used for regression runs.
    pub fn legacy_version(&self) -> &RuntimeVersion {
        &self.legacy
    }

    /// The current-family version used for regression runs.
    pub fn current_version(&self) -> &RuntimeVersion {
        &self.current
    }

    /// The time after which a code fragment or tooling command is killed.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The profile statistics printer script, relative to the key directory.
    pub fn print_stats(&self) -> Option<&Utf8Path> {
        self.print_stats.as_deref()
    }

    /// Tooling installed before each story.
    pub fn tooling(&self) -> &[ToolingConfig] {
        &self.tooling
    }

    /// Resolves the configured directories against the key directory.
    pub fn key_paths(&self, key_dir: &Utf8Path) -> KeyPaths {
        KeyPaths {
            key: key_dir.to_owned(),
            stories: key_dir.join(&self.stories),
            generated: key_dir.join(&self.gen_dir),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self::compile(
            Utf8Path::new(PROJECT_CONFIG_FILE_NAME),
            DeserializedProjectConfig::default(),
        )
        .expect("default versions are valid")
    }
}

/// A tooling installation step, run with the story's interpreter's pip.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ToolingConfig {
    /// A name for messages.
    pub name: String,
    /// Glob patterns, relative to the key directory, whose changes trigger reinstallation.
    #[serde(default)]
    pub watch: Vec<String>,
    /// The directory pip runs in, relative to the key directory.
    #[serde(default = "default_dir")]
    pub dir: Utf8PathBuf,
    /// A package to uninstall before installing. Uninstall failures are ignored.
    #[serde(default)]
    pub uninstall: Option<String>,
    /// Arguments to pip.
    pub install: Vec<String>,
}

/// Directories derived from the key directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPaths {
    /// The key directory, holding configuration and the profile stats printer.
    pub key: Utf8PathBuf,
    /// Where story files are discovered.
    pub stories: Utf8PathBuf,
    /// Generated state: interpreters, scratch directory, profiles and fingerprints.
    pub generated: Utf8PathBuf,
}

impl KeyPaths {
    /// The scratch directory stories run in.
    pub fn state(&self) -> Utf8PathBuf {
        self.generated.join("state")
    }

    /// Where profile data is written.
    pub fn profile(&self) -> Utf8PathBuf {
        self.generated.join("profile")
    }

    /// Where change monitor fingerprints are recorded.
    pub fn monitor(&self) -> Utf8PathBuf {
        self.generated.join("monitor")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedProjectConfig {
    #[serde(default)]
    paths: DeserializedPaths,
    #[serde(default)]
    versions: DeserializedVersions,
    #[serde(default)]
    run: DeserializedRun,
    #[serde(default)]
    profile: DeserializedProfile,
    #[serde(default)]
    tooling: Vec<ToolingConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedPaths {
    #[serde(default = "default_dir")]
    stories: Utf8PathBuf,
    #[serde(default = "default_gen_dir", rename = "gen")]
    generated: Utf8PathBuf,
}

impl Default for DeserializedPaths {
    fn default() -> Self {
        Self {
            stories: default_dir(),
            generated: default_gen_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedVersions {
    #[serde(default = "default_legacy_version")]
    legacy: String,
    #[serde(default = "default_current_version")]
    current: String,
}

impl Default for DeserializedVersions {
    fn default() -> Self {
        Self {
            legacy: default_legacy_version(),
            current: default_current_version(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedRun {
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedProfile {
    #[serde(default)]
    print_stats: Option<Utf8PathBuf>,
}

fn default_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(".")
}

fn default_gen_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(".gen")
}

fn default_legacy_version() -> String {
    DEFAULT_LEGACY_VERSION.to_owned()
}

fn default_current_version() -> String {
    DEFAULT_CURRENT_VERSION.to_owned()
}

/// Parsed `personalsettings.toml`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersonalSettings {
    /// Engine toggles.
    pub engine: EngineSettings,
    /// The Python version `tdd` runs under, unless overridden.
    pub python_version: RuntimeVersion,
}

impl PersonalSettings {
    /// The contents written when the settings file does not exist.
    pub const DEFAULT_CONTENTS: &'static str = "\
[engine]
rewrite = false
cprofile = false

[params]
python-version = \"3.5.0\"
";

    /// Loads `personalsettings.toml` from the key directory, creating it if missing.
    pub fn load_or_create(key_dir: &Utf8Path) -> Result<Self, ConfigError> {
        let path = key_dir.join(PERSONAL_SETTINGS_FILE_NAME);
        let contents = match read_optional(&path)? {
            Some(contents) => contents,
            None => {
                debug!("personal settings: creating {path} with defaults");
                std::fs::write(&path, Self::DEFAULT_CONTENTS).map_err(|error| {
                    ConfigError::WriteDefault {
                        path: path.clone(),
                        error,
                    }
                })?;
                Self::DEFAULT_CONTENTS.to_owned()
            }
        };
        Self::parse(&path, &contents)
    }

    /// Parses personal settings from a string. `path` is used for messages.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, ConfigError> {
        let deserialized: DeserializedPersonalSettings =
            deserialize_with_warnings(path, contents)?;
        let python_version =
            RuntimeVersion::parse(&deserialized.params.python_version).map_err(|error| {
                ConfigError::InvalidVersion {
                    path: path.to_owned(),
                    error,
                }
            })?;
        Ok(Self {
            engine: deserialized.engine,
            python_version,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedPersonalSettings {
    #[serde(default)]
    engine: EngineSettings,
    #[serde(default)]
    params: DeserializedParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedParams {
    #[serde(default = "default_current_version")]
    python_version: String,
}

impl Default for DeserializedParams {
    fn default() -> Self {
        Self {
            python_version: default_current_version(),
        }
    }
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(ConfigError::Read {
            path: path.to_owned(),
            error,
        }),
    }
}

/// Deserializes TOML content, warning about any keys that were ignored.
fn deserialize_with_warnings<T: DeserializeOwned>(
    path: &Utf8Path,
    contents: &str,
) -> Result<T, ConfigError> {
    let parse_error = |error| ConfigError::Parse {
        path: path.to_owned(),
        error,
    };
    let deserializer = toml::Deserializer::parse(contents).map_err(parse_error)?;
    let mut unknown = BTreeSet::new();
    let value = serde_ignored::deserialize(deserializer, |ignored| {
        unknown.insert(ignored.to_string());
    })
    .map_err(parse_error)?;

    if !unknown.is_empty() {
        let keys = unknown.into_iter().collect::<Vec<_>>().join(", ");
        warn!("ignoring unknown configuration keys in {path}: {keys}");
    }
    debug!("loaded configuration from {path}");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn project_config_defaults() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let config = ProjectConfig::load(dir.path()).expect("defaults apply");
        assert_eq!(config.legacy_version().to_string(), "2.7.10");
        assert_eq!(config.current_version().to_string(), "3.5.0");
        assert_eq!(config.timeout(), None);
        assert!(config.tooling().is_empty());

        let paths = config.key_paths(dir.path());
        assert_eq!(paths.stories, dir.path().join("."));
        assert_eq!(paths.state(), dir.path().join(".gen/state"));
        assert_eq!(paths.monitor(), dir.path().join(".gen/monitor"));
    }

    #[test]
    fn project_config_full() {
        let config = ProjectConfig::parse(
            Utf8Path::new("pystory.toml"),
            indoc! {r#"
                [paths]
                stories = "stories"
                gen = "../gen"

                [versions]
                legacy = "2.7"
                current = "3.12.1"

                [run]
                timeout = "1m 30s"
                retries = 3

                [profile]
                print-stats = "printstats.py"

                [[tooling]]
                name = "project"
                watch = ["../src/**/*.py"]
                dir = ".."
                uninstall = "commandlib"
                install = ["install", "."]
            "#},
        )
        .expect("valid config");

        assert_eq!(config.legacy_version().to_string(), "2.7.0");
        assert_eq!(config.current_version().major_minor(), "3.12");
        assert_eq!(config.timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.print_stats(), Some(Utf8Path::new("printstats.py")));
        assert_eq!(
            config.tooling(),
            [ToolingConfig {
                name: "project".to_owned(),
                watch: vec!["../src/**/*.py".to_owned()],
                dir: "..".into(),
                uninstall: Some("commandlib".to_owned()),
                install: vec!["install".to_owned(), ".".to_owned()],
            }]
        );
        let paths = config.key_paths(Utf8Path::new("/work/key"));
        assert_eq!(paths.stories, "/work/key/stories");
        assert_eq!(paths.profile(), "/work/key/../gen/profile");
    }

    #[test]
    fn project_config_invalid_version() {
        let error = ProjectConfig::parse(
            Utf8Path::new("pystory.toml"),
            "[versions]\nlegacy = \"two\"\n",
        )
        .expect_err("invalid version");
        assert!(
            matches!(error, ConfigError::InvalidVersion { .. }),
            "{error:?}"
        );
    }

    #[test]
    fn personal_settings_created_with_defaults() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let settings = PersonalSettings::load_or_create(dir.path()).expect("created");
        assert_eq!(settings.engine, EngineSettings::default());
        assert_eq!(settings.python_version.to_string(), "3.5.0");
        assert_eq!(
            std::fs::read_to_string(dir.path().join(PERSONAL_SETTINGS_FILE_NAME))
                .expect("file was written"),
            PersonalSettings::DEFAULT_CONTENTS
        );
    }

    #[test]
    fn personal_settings_override() {
        let settings = PersonalSettings::parse(
            Utf8Path::new(PERSONAL_SETTINGS_FILE_NAME),
            indoc! {r#"
                [engine]
                rewrite = true

                [params]
                python-version = "2.7.10"
            "#},
        )
        .expect("valid settings");
        assert_eq!(
            settings.engine,
            EngineSettings {
                rewrite: true,
                cprofile: false,
            }
        );
        assert_eq!(settings.python_version.major(), 2);
    }

    #[test]
    fn personal_settings_wrong_type() {
        let error = PersonalSettings::parse(
            Utf8Path::new(PERSONAL_SETTINGS_FILE_NAME),
            "[engine]\nrewrite = \"yes\"\n",
        )
        .expect_err("rewrite is a bool");
        assert!(matches!(error, ConfigError::Parse { .. }), "{error:?}");
    }
}
