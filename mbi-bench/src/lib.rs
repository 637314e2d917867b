// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs MPI verification tools against the annotated test codes of the MPI Bug Initiative, and
//! scores their verdicts.
//!
//! The heavy lifting is done by [`mbi_runner`]. This crate parses the command line, sets up
//! logging and reports errors.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter};
