// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [pystory](https://crates.io/crates/pystory): running Python example
//! stories, matching their output and exceptions against expectations, and rewriting those
//! expectations in place when asked to.
//!
//! The flow for a single story is:
//!
//! 1. [`story_runner::StoryRunner`] prepares a scratch directory, provisions an interpreter and
//!    installs tooling (guarded by [`monitor::ChangeMonitor`]).
//! 2. Each step is handed to [`expectation::ExpectationEngine`], which executes code through
//!    [`code_runner::CodeRunner`] and compares the result using [`template::Template`] and
//!    [`version::VersionedValue`].
//! 3. On success, rewritten expectations are saved back to the [`story::StoryFile`].

pub mod code_runner;
pub mod config;
pub mod errors;
pub mod expectation;
mod helpers;
pub mod monitor;
pub mod process;
pub mod provision;
pub mod reporter;
pub mod schema;
pub mod story;
pub mod story_runner;
pub mod template;
pub mod version;
