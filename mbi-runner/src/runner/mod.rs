// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The supervised process runner.
//!
//! The main structure in this module is [`ProcessRunner`].

mod imp;

#[cfg(unix)]
#[path = "unix.rs"]
mod os;

#[cfg(windows)]
#[path = "windows.rs"]
mod os;

pub use imp::*;
pub use os::ProcessHandle;
