// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating interpreters for a requested Python version.

use crate::{errors::ProvisionError, process::Invocable, version::RuntimeVersion};
use camino::Utf8PathBuf;
use tracing::debug;

/// A provisioned interpreter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interpreter {
    /// The version that was requested.
    pub version: RuntimeVersion,
    /// Runs the interpreter.
    pub python: Invocable,
    /// Runs pip for the interpreter.
    pub pip: Invocable,
}

impl Interpreter {
    /// Creates an interpreter whose pip is `python -m pip`.
    pub fn from_python(version: RuntimeVersion, python: impl Into<Utf8PathBuf>) -> Self {
        let python = Invocable::new(python);
        let pip = python.clone().with_arg("-m").with_arg("pip");
        Self {
            version,
            python,
            pip,
        }
    }
}

/// Provides interpreters by version.
pub trait PythonProvisioner {
    /// Returns an interpreter for `version`.
    fn provision(&self, version: &RuntimeVersion) -> Result<Interpreter, ProvisionError>;
}

/// Finds interpreters already present on this machine.
///
/// For version `X.Y.Z`, the lookup order is:
///
/// 1. `<gen>/pyX.Y.Z/bin/python`, an interpreter built into the generated directory.
/// 2. `pythonX.Y` in any directory of the search path (`PATH` by default).
#[derive(Clone, Debug)]
pub struct LocalPythons {
    gen_dir: Utf8PathBuf,
    search_path: Option<Vec<Utf8PathBuf>>,
}

impl LocalPythons {
    /// Creates a provisioner rooted at the generated directory.
    pub fn new(gen_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            gen_dir: gen_dir.into(),
            search_path: None,
        }
    }

    /// Searches `dirs` instead of `PATH`.
    pub fn with_search_path(mut self, dirs: Vec<Utf8PathBuf>) -> Self {
        self.search_path = Some(dirs);
        self
    }

    fn search_dirs(&self) -> Result<Vec<Utf8PathBuf>, ProvisionError> {
        if let Some(dirs) = &self.search_path {
            return Ok(dirs.clone());
        }
        let Some(path) = std::env::var_os("PATH") else {
            return Ok(Vec::new());
        };
        std::env::split_paths(&path)
            .map(|dir| Utf8PathBuf::from_path_buf(dir).map_err(|_| ProvisionError::NonUtf8Path))
            .collect()
    }
}

impl PythonProvisioner for LocalPythons {
    fn provision(&self, version: &RuntimeVersion) -> Result<Interpreter, ProvisionError> {
        let mut searched = Vec::new();

        let built = self
            .gen_dir
            .join(format!("py{version}"))
            .join("bin")
            .join(executable_name("python"));
        if built.is_file() {
            debug!("using Python {version} at {built}");
            return Ok(Interpreter::from_python(version.clone(), built));
        }
        searched.push(built.into_string());

        let name = executable_name(&format!("python{}", version.major_minor()));
        for dir in self.search_dirs()? {
            let candidate = dir.join(&name);
            if candidate.is_file() {
                debug!("using Python {version} at {candidate}");
                return Ok(Interpreter::from_python(version.clone(), candidate));
            }
        }
        searched.push(format!("{name} on PATH"));

        Err(ProvisionError::NotFound {
            version: version.to_string(),
            searched,
        })
    }
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_owned()
    }
}
