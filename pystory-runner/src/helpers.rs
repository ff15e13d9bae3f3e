// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for pystory-runner.

use camino::Utf8Path;
use std::{fmt, io, time::Duration};

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "story" if `count` is 1, otherwise "stories".
    pub(crate) fn stories_str(count: usize) -> &'static str {
        if count == 1 { "story" } else { "stories" }
    }

    /// Returns "expectation" if `count` is 1, otherwise "expectations".
    pub(crate) fn expectations_str(count: usize) -> &'static str {
        if count == 1 {
            "expectation"
        } else {
            "expectations"
        }
    }
}

/// Displays a duration as `[   0.123s] `, right-aligned.
pub(crate) struct DisplayBracketedDuration(pub(crate) Duration);

impl fmt::Display for DisplayBracketedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>8.3?}s] ", self.0.as_secs_f64())
    }
}

/// Writes `contents` to `path`, creating parent directories as needed.
pub(crate) fn write_creating_parents(path: &Utf8Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}

/// Adds user-execute permission to `path`.
#[cfg(unix)]
pub(crate) fn make_executable(path: &Utf8Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o100);
    std::fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
pub(crate) fn make_executable(_path: &Utf8Path) -> io::Result<()> {
    Ok(())
}
