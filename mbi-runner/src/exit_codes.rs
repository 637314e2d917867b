// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `mbi-bench` failures.
///
/// A run that completes exits with [`OK`](Self::OK) regardless of how the wrapped tools behaved:
/// the ledger and the summary are the report of record. Non-zero exit codes are reserved for
/// problems that prevent the run from being meaningful.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum MbiExitCode {}

impl MbiExitCode {
    /// No errors occurred and mbi-bench exited normally.
    pub const OK: i32 = 0;

    /// An annotation header was malformed, missing or declared no tests.
    pub const HEADER_ERROR: i32 = 101;

    /// A ledger passed to `mbi-bench stats` could not be read or parsed.
    pub const INVALID_LEDGER: i32 = 102;

    /// A user issue happened while setting up a run (configuration, corpus, tool setup).
    pub const SETUP_ERROR: i32 = 96;

    /// Writing data to the ledger, stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
