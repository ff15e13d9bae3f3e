// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Python runtime versions and values that differ between them.

use crate::errors::RuntimeVersionParseError;
use semver::Version;
use std::{fmt, str::FromStr};

/// The interpreter major-version family a story runs under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeFamily {
    /// Python 2.
    Legacy,
    /// Python 3 and later.
    Current,
}

impl RuntimeFamily {
    /// The key selecting this family's variant in a per-version mapping.
    pub fn key(self) -> &'static str {
        match self {
            Self::Legacy => LEGACY_KEY,
            Self::Current => CURRENT_KEY,
        }
    }
}

impl fmt::Display for RuntimeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "python 2"),
            Self::Current => write!(f, "python 3"),
        }
    }
}

/// The per-version mapping key for [`RuntimeFamily::Legacy`].
pub const LEGACY_KEY: &str = "in python 2";

/// The per-version mapping key for [`RuntimeFamily::Current`].
pub const CURRENT_KEY: &str = "in python 3";

/// A Python version such as `3.5.0`.
///
/// Versions are parsed leniently: `3` and `3.5` are accepted and padded with zeroes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeVersion {
    version: Version,
}

impl RuntimeVersion {
    /// Parses a version string.
    pub fn parse(input: &str) -> Result<Self, RuntimeVersionParseError> {
        let trimmed = input.trim();
        let components = trimmed.split('.').count();
        let padded = match components {
            1 => format!("{trimmed}.0.0"),
            2 => format!("{trimmed}.0"),
            _ => trimmed.to_owned(),
        };
        let version =
            Version::parse(&padded).map_err(|error| RuntimeVersionParseError::new(input, error))?;
        Ok(Self { version })
    }

    /// Returns the family this version belongs to.
    pub fn family(&self) -> RuntimeFamily {
        if self.version.major <= 2 {
            RuntimeFamily::Legacy
        } else {
            RuntimeFamily::Current
        }
    }

    /// Returns the major version.
    pub fn major(&self) -> u64 {
        self.version.major
    }

    /// Returns `major.minor`, as used in interpreter executable names.
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.version.major, self.version.minor)
    }
}

impl FromStr for RuntimeVersion {
    type Err = RuntimeVersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)
    }
}

/// A value that is either the same for every runtime, or differs between families.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionedValue {
    /// The same value for every runtime.
    Literal(String),
    /// One value per runtime family.
    PerVersion {
        /// The value under Python 2.
        legacy: String,
        /// The value under Python 3.
        current: String,
    },
}

impl VersionedValue {
    /// Resolves the value for `family`.
    pub fn resolve(&self, family: RuntimeFamily) -> Resolved<'_> {
        match self {
            Self::Literal(value) => Resolved {
                value,
                differential: false,
            },
            Self::PerVersion { legacy, current } => Resolved {
                value: match family {
                    RuntimeFamily::Legacy => legacy,
                    RuntimeFamily::Current => current,
                },
                differential: true,
            },
        }
    }

    /// Returns true if this is a per-version mapping.
    pub fn is_differential(&self) -> bool {
        matches!(self, Self::PerVersion { .. })
    }
}

impl From<&str> for VersionedValue {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_owned())
    }
}

/// The result of [`VersionedValue::resolve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolved<'a> {
    /// The value for the active family.
    pub value: &'a str,
    /// True if the value was selected from a per-version mapping.
    pub differential: bool,
}
