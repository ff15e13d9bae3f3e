// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the story runtime.

mod basic;
mod fixtures;
mod real_python;
