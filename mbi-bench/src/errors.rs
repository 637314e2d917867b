// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING, StderrStyles};
use camino::Utf8PathBuf;
use mbi_runner::{
    errors::{BenchRunError, ConfigParseError, LedgerError},
    exit_codes::MbiExitCode,
};
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are printed with display_to_stderr, which
// colorizes them.

/// An error that prevented mbi-bench from doing its job.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDir {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 {
        #[source]
        err: camino::FromPathBufError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("benchmark run error")]
    BenchRunError {
        #[from]
        err: BenchRunError,
    },
    #[error("ledger read error")]
    LedgerReadError {
        #[source]
        err: LedgerError,
    },
    #[error("no ledger found")]
    NoLedgers { logs_dir: Utf8PathBuf },
    #[error("failed to write output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn ledger_read_error(err: LedgerError) -> Self {
        Self::LedgerReadError { err }
    }

    pub(crate) fn write_output_error(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDir { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::NoLedgers { .. } => MbiExitCode::SETUP_ERROR,
            Self::BenchRunError { err } => match err {
                BenchRunError::Header(_) => MbiExitCode::HEADER_ERROR,
                BenchRunError::Ledger(_) => MbiExitCode::WRITE_OUTPUT_ERROR,
                _ => MbiExitCode::SETUP_ERROR,
            },
            Self::LedgerReadError { .. } => MbiExitCode::INVALID_LEDGER,
            Self::WriteOutputError { .. } => MbiExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDir { err } => {
                tracing::error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { err } => {
                tracing::error!("current directory is not valid UTF-8");
                Some(err as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                match err.config_file() {
                    Some(config_file) => tracing::error!(
                        "failed to parse configuration at `{}`",
                        config_file.style(styles.bold)
                    ),
                    None => tracing::error!("failed to parse configuration"),
                }
                err.source()
            }
            Self::BenchRunError { err } => match err {
                BenchRunError::Header(err) => {
                    tracing::error!(
                        "failed to parse MBI_TESTS header in `{}`",
                        err.path().style(styles.bold)
                    );
                    tracing::error!(
                        target: NO_HEADING,
                        "{}",
                        "(hint: fix the header, or move the file out of the codes directory)"
                            .style(styles.warning_text)
                    );
                    Some(err.kind() as &dyn Error)
                }
                BenchRunError::LogsDirCreate { dir, err } => {
                    tracing::error!(
                        "failed to create logs directory `{}`",
                        dir.style(styles.bold)
                    );
                    Some(err as &dyn Error)
                }
                other => {
                    tracing::error!("{other}");
                    other.source()
                }
            },
            Self::LedgerReadError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::NoLedgers { logs_dir } => {
                tracing::error!(
                    "no ledger found in `{}` (expected files named `bench_<tool>.csv`)",
                    logs_dir.style(styles.bold)
                );
                None
            }
            Self::WriteOutputError { err } => {
                tracing::error!("failed to write output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            tracing::error!(target: NO_HEADING, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
