// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for running MPI verification tools against annotated test codes.
//!
//! The basic flow is:
//!
//! 1. [`partition`] selects the slice of the sorted corpus owned by this runner instance.
//! 2. [`annotation`] extracts the test cases and their expected verdicts from each source file.
//! 3. For each test case, [`cache`] decides whether a previous run is still valid. On a miss, the
//!    selected [`adapter`] rewrites the command and [`runner`] executes it under a timeout.
//! 4. The adapter turns the persisted artifacts into a raw outcome, and [`outcome`] classifies it
//!    against the expected verdict.
//! 5. Each result is appended to the [`ledger`], and a [`summary`] is computed at the end.
//!
//! [`bench`] ties these steps together.

pub mod adapter;
pub mod annotation;
pub mod bench;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod errors;
pub mod exit_codes;
mod helpers;
pub mod ledger;
pub mod outcome;
pub mod partition;
pub mod runner;
pub mod summary;
pub mod vocabulary;
