// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change detection for watched file sets.
//!
//! Tooling installation is slow, so it only reruns when something it depends on has changed. A
//! [`ChangeMonitor`] fingerprints a set of files described by glob patterns and compares the
//! result against the fingerprint recorded after the last successful installation.

use crate::errors::MonitorError;
use camino::{Utf8Path, Utf8PathBuf};
use globset::{GlobBuilder, GlobSetBuilder};
use std::{fs, time::UNIX_EPOCH};
use tracing::debug;
use xxhash_rust::xxh3::{Xxh3, xxh3_64};

const FINGERPRINT_EXTENSION: &str = "fingerprint";

/// Watches a set of files for changes.
#[derive(Clone, Debug)]
pub struct ChangeMonitor {
    record_dir: Utf8PathBuf,
    key: String,
    root: Utf8PathBuf,
    patterns: Vec<String>,
}

impl ChangeMonitor {
    /// Creates a monitor for `patterns`, relative to `root`.
    ///
    /// `key` distinguishes monitors sharing a record directory. Fingerprints are stored under
    /// `record_dir`.
    pub fn new(
        record_dir: impl Into<Utf8PathBuf>,
        key: impl Into<String>,
        root: impl Into<Utf8PathBuf>,
        patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            record_dir: record_dir.into(),
            key: key.into(),
            root: root.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// The path the fingerprint is recorded at.
    pub fn record_path(&self) -> Utf8PathBuf {
        let mut spec = self.key.clone();
        for pattern in &self.patterns {
            spec.push('\0');
            spec.push_str(pattern);
        }
        self.record_dir.join(format!(
            "{:016x}.{FINGERPRINT_EXTENSION}",
            xxh3_64(spec.as_bytes())
        ))
    }

    /// Fingerprints the watched files and compares against the recorded fingerprint.
    pub fn check(&self) -> Result<MonitorGuard, MonitorError> {
        let files = self.watched_files()?;
        let mut hasher = Xxh3::new();
        for path in &files {
            let metadata = fs::metadata(path).map_err(|error| MonitorError::Read {
                path: path.clone(),
                error,
            })?;
            let contents = fs::read(path).map_err(|error| MonitorError::Read {
                path: path.clone(),
                error,
            })?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |duration| duration.as_nanos());

            hasher.update(path.as_str().as_bytes());
            hasher.update(&[0]);
            hasher.update(&metadata.len().to_le_bytes());
            hasher.update(&mtime.to_le_bytes());
            hasher.update(&xxh3_64(&contents).to_le_bytes());
        }
        let fingerprint = format!("{:016x}", hasher.digest());

        let record_path = self.record_path();
        let previous = fs::read_to_string(&record_path).ok();
        let changed = previous.as_deref().map(str::trim) != Some(fingerprint.as_str());
        debug!(
            "{}: {} watched files, fingerprint {fingerprint} ({})",
            self.key,
            files.len(),
            if changed { "changed" } else { "unchanged" },
        );
        Ok(MonitorGuard {
            record_path,
            fingerprint,
            changed,
        })
    }

    /// Every file matched by the watch patterns, sorted and deduplicated.
    pub fn watched_files(&self) -> Result<Vec<Utf8PathBuf>, MonitorError> {
        let mut files = Vec::new();
        for pattern in &self.patterns {
            let (base, glob_part) = split_literal_base(&self.root.join(pattern));
            if !base.exists() {
                continue;
            }
            if glob_part.is_none() && base.is_file() {
                files.push(base);
                continue;
            }

            let mut builder = GlobSetBuilder::new();
            if let Some(glob_part) = &glob_part {
                let glob = GlobBuilder::new(base.join(glob_part).as_str())
                    .literal_separator(true)
                    .build()
                    .map_err(|error| MonitorError::Glob {
                        pattern: pattern.clone(),
                        error,
                    })?;
                builder.add(glob);
            }
            let globs = builder.build().map_err(|error| MonitorError::Glob {
                pattern: pattern.clone(),
                error,
            })?;

            for entry in walkdir::WalkDir::new(&base) {
                let entry = entry.map_err(|error| MonitorError::Walk {
                    path: base.clone(),
                    error,
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                // Non-UTF-8 paths cannot be named by a pattern, so they are never watched.
                let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
                    continue;
                };
                if glob_part.is_none() || globs.is_match(path.as_std_path()) {
                    files.push(path);
                }
            }
        }
        files.sort_unstable();
        files.dedup();
        Ok(files)
    }
}

/// The outcome of [`ChangeMonitor::check`].
///
/// The new fingerprint is only recorded by [`commit`](Self::commit), which should be called
/// once the work guarded by the check has succeeded.
#[derive(Debug)]
#[must_use = "call commit() once the guarded work has succeeded"]
pub struct MonitorGuard {
    record_path: Utf8PathBuf,
    fingerprint: String,
    changed: bool,
}

impl MonitorGuard {
    /// True if the watched files differ from the last committed fingerprint.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// The fingerprint of the watched files.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Records the fingerprint.
    pub fn commit(self) -> Result<(), MonitorError> {
        if let Some(parent) = self.record_path.parent() {
            fs::create_dir_all(parent).map_err(|error| MonitorError::Write {
                path: self.record_path.clone(),
                error,
            })?;
        }
        fs::write(&self.record_path, &self.fingerprint).map_err(|error| MonitorError::Write {
            path: self.record_path,
            error,
        })
    }
}

/// Splits `path` into its leading components without glob syntax, and the remainder (if any).
fn split_literal_base(path: &Utf8Path) -> (Utf8PathBuf, Option<String>) {
    let mut base = Utf8PathBuf::new();
    let mut components = path.components();
    while let Some(component) = components.next() {
        if component.as_str().contains(['*', '?', '[', '{']) {
            let rest = std::iter::once(component.as_str())
                .chain(components.by_ref().map(|component| component.as_str()))
                .collect::<Vec<_>>()
                .join("/");
            return (base, Some(rest));
        }
        base.push(component);
    }
    (base, None)
}
