// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests driving real child processes. These rely on `/bin/sh`.

#![cfg(unix)]

mod bench;
mod cache;
mod fixtures;
mod runner;
