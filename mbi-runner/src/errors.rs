// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by mbi-runner.

use crate::{adapter::ToolId, vocabulary::UnknownDetailTag};
use camino::Utf8PathBuf;
use itertools::Itertools;
use std::{borrow::Cow, fmt, io};
use thiserror::Error;

/// An error that occurred while extracting test cases from an annotated source file.
///
/// A header error makes the expected verdicts of the file unknowable, so it always aborts the
/// run.
#[derive(Debug, Error)]
#[error("in `{path}`: {kind}")]
pub struct HeaderError {
    path: Utf8PathBuf,
    #[source]
    kind: HeaderErrorKind,
}

impl HeaderError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, kind: HeaderErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Returns the source file that failed to parse.
    pub fn path(&self) -> &camino::Utf8Path {
        &self.path
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &HeaderErrorKind {
        &self.kind
    }
}

/// The kind of [`HeaderError`] that occurred.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HeaderErrorKind {
    /// The file could not be read.
    #[error("failed to read file")]
    Read(#[source] io::Error),

    /// No begin marker was found.
    #[error("MBI_TESTS header not found")]
    MissingHeader,

    /// The begin marker appeared a second time.
    #[error("line {line}: MBI_TESTS header appears a second time")]
    DuplicateBegin {
        /// The 1-based line number of the duplicated marker.
        line: usize,
    },

    /// An end marker appeared outside of a header.
    #[error("line {line}: unexpected end of MBI_TESTS header")]
    UnexpectedEnd {
        /// The 1-based line number of the end marker.
        line: usize,
    },

    /// The file ended while still inside the header.
    #[error("MBI_TESTS header not properly ended")]
    Unterminated,

    /// A test command was the last line of the file.
    #[error("line {line}: test `{command}` is not followed by an OK or ERROR line")]
    MissingVerdict {
        /// The 1-based line number of the test command.
        line: usize,
        /// The command that was declared.
        command: String,
    },

    /// The line following a test command is neither `OK` nor `ERROR: <detail>`.
    #[error("line {line}: test not followed by a proper OK or ERROR line: `{content}`")]
    MalformedVerdict {
        /// The 1-based line number of the offending line.
        line: usize,
        /// The content of the offending line.
        content: String,
    },

    /// The declared error detail is not part of the vocabulary.
    #[error("line {line}: detailed outcome is not one of the allowed ones")]
    UnknownDetail {
        /// The 1-based line number of the offending line.
        line: usize,
        /// The underlying error.
        #[source]
        err: UnknownDetailTag,
    },

    /// The header was well-formed but declared no tests.
    #[error("no test found in the MBI_TESTS header")]
    NoTests,
}

/// An error that occurred while parsing a batch specification like `2/5`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub struct BatchParseError {
    message: Cow<'static, str>,
}

impl BatchParseError {
    pub(crate) fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for BatchParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "batch must be in the format \"N/M\":\n{}", self.message)
    }
}

/// An error that occurred while reading configuration.
#[derive(Debug, Error)]
pub struct ConfigParseError {
    config_file: Option<Utf8PathBuf>,
    #[source]
    kind: ConfigParseErrorKind,
}

impl fmt::Display for ConfigParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.config_file {
            Some(config_file) => write!(f, "failed to parse configuration at `{config_file}`"),
            None => write!(f, "failed to parse configuration"),
        }
    }
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self { config_file, kind }
    }

    /// Returns the user config file, if one was provided.
    pub fn config_file(&self) -> Option<&camino::Utf8Path> {
        self.config_file.as_deref()
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of [`ConfigParseError`] that occurred.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// The sources could not be combined.
    #[error(transparent)]
    BuildError(Box<config::ConfigError>),

    /// The combined sources did not deserialize.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<config::ConfigError>>),

    /// The configured batch is invalid.
    #[error(transparent)]
    InvalidBatch(BatchParseError),
}

/// An error that occurred while reading, writing or removing a cache sidecar.
#[derive(Debug, Error)]
#[error("failed to {op} sidecar `{path}`")]
pub struct SidecarError {
    op: SidecarOp,
    path: Utf8PathBuf,
    #[source]
    err: io::Error,
}

impl SidecarError {
    pub(crate) fn new(op: SidecarOp, path: impl Into<Utf8PathBuf>, err: io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            err,
        }
    }

    /// Returns the path of the sidecar.
    pub fn path(&self) -> &camino::Utf8Path {
        &self.path
    }
}

/// The operation that failed on a sidecar.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SidecarOp {
    /// Reading.
    Read,
    /// Writing.
    Write,
    /// Removing.
    Remove,
}

impl fmt::Display for SidecarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SidecarOp::Read => write!(f, "read"),
            SidecarOp::Write => write!(f, "write"),
            SidecarOp::Remove => write!(f, "remove"),
        }
    }
}

/// An error that occurred while executing a test case.
///
/// These errors are local to a single test case: the orchestrator records them as a `failure`
/// outcome and moves on.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The command line could not be split into words.
    #[error("failed to split command `{command}`")]
    CommandParse {
        /// The command line.
        command: String,
        /// The underlying error.
        #[source]
        err: shell_words::ParseError,
    },

    /// The command line was empty.
    #[error("command is empty")]
    EmptyCommand,

    /// The child process could not be started.
    #[error("failed to start `{command}`")]
    Spawn {
        /// The command line.
        command: String,
        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// A sidecar could not be written.
    #[error(transparent)]
    Sidecar(#[from] SidecarError),
}

/// An error that occurred while listing the source corpus.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CorpusError {
    /// The directory could not be read.
    #[error("failed to read codes directory `{dir}`")]
    ReadDir {
        /// The directory.
        dir: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// A path in the directory is not valid UTF-8.
    #[error("path in codes directory `{dir}` is not valid UTF-8")]
    NonUtf8Path {
        /// The directory.
        dir: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: camino::FromPathBufError,
    },
}

/// An error that occurred while reading or writing a result ledger.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The ledger could not be opened.
    #[error("failed to open ledger `{path}`")]
    Open {
        /// The ledger path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// A record could not be appended.
    #[error("failed to append to ledger `{path}`")]
    Write {
        /// The ledger path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The logs directory could not be listed.
    #[error("failed to list ledgers in `{dir}`")]
    ReadDir {
        /// The directory.
        dir: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The ledger could not be read.
    #[error("failed to read ledger `{path}`")]
    Read {
        /// The ledger path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// A line of the ledger is malformed.
    #[error("ledger `{path}`, line {line}: {message}")]
    Parse {
        /// The ledger path.
        path: Utf8PathBuf,
        /// The 1-based line number.
        line: usize,
        /// What was wrong with the line.
        message: Cow<'static, str>,
    },
}

/// An unknown tool name was encountered.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "unknown tool `{input}` (known tools: {})",
    ToolId::ALL.iter().map(|id| id.as_str()).join(", ")
)]
pub struct UnknownToolError {
    /// The input that failed to parse.
    pub input: String,
}

/// An error that occurred while preparing a tool for a run.
#[derive(Debug, Error)]
#[error("failed to set up tool `{tool}`")]
pub struct AdapterSetupError {
    tool: ToolId,
    #[source]
    err: io::Error,
}

impl AdapterSetupError {
    pub(crate) fn new(tool: ToolId, err: io::Error) -> Self {
        Self { tool, err }
    }
}

/// An error that aborted a benchmark run.
///
/// Everything else is local to a test case and recorded in the ledger instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BenchRunError {
    /// An annotation header was malformed.
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// The corpus could not be listed.
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    /// The ledger could not be written.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The tool could not be set up.
    #[error(transparent)]
    AdapterSetup(#[from] AdapterSetupError),

    /// The logs directory could not be created.
    #[error("failed to create logs directory `{dir}`")]
    LogsDirCreate {
        /// The directory.
        dir: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The async runtime could not be built.
    #[error("failed to build the async runtime")]
    Runtime(#[source] io::Error),
}

/// Displays an error followed by its chain of sources, on one line each.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: std::error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: std::error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, "\n  caused by: {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn error_chain() {
        let error = SidecarError::new(
            SidecarOp::Write,
            "/logs/must/Coll_ok_0.txt",
            io::Error::other("disk full"),
        );
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "failed to write sidecar `/logs/must/Coll_ok_0.txt`\n  caused by: disk full"
        );

        let error = "frama-c".parse::<ToolId>().expect_err("unknown tool");
        assert_eq!(
            error.to_string(),
            "unknown tool `frama-c` (known tools: aislinn, civl, isp, mpisv, must, parcoach, simgrid)"
        );
    }
}
