// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extraction of test cases from annotated source files.
//!
//! Each source file embeds a header, usually in a comment, of the form:
//!
//! ```text
//! BEGIN_MBI_TESTS
//!   $ mpirun -np 2 ${EXE}
//!   | OK
//!   $ mpirun -np 2 $zero_buffer ${EXE}
//!   | ERROR: BufferingHazard
//! END_MBI_TESTS
//! ```
//!
//! Every `$` line declares a test command, and the line right after it declares the expected
//! verdict.

use crate::{
    cache::CacheId,
    errors::{HeaderError, HeaderErrorKind},
    vocabulary::DetailTag,
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use std::{fmt, str::FromStr, sync::LazyLock};

static BEGIN_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("BEGIN_MBI_TESTS").expect("valid regex"));
static END_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("END_MBI_TESTS").expect("valid regex"));
static TEST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+\$ ?(.*)$").expect("valid regex"));
static OK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ |]*OK\s*$").expect("valid regex"));
static ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ |]*ERROR: *(.*?)\s*$").expect("valid regex"));
static PROCESS_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-np\s+(\d+)").expect("valid regex"));

/// The placeholder resolved to the built binary.
pub const EXE_PLACEHOLDER: &str = "${EXE}";
/// The placeholder resolved to a tool's zero-buffering flags.
pub const ZERO_BUFFER_PLACEHOLDER: &str = "$zero_buffer";
/// The placeholder resolved to a tool's infinite-buffering flags.
pub const INFTY_BUFFER_PLACEHOLDER: &str = "$infty_buffer";

/// The expected verdict of a test case.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Verdict {
    /// The code is correct.
    Ok,
    /// The code contains an error of the given kind.
    Error(DetailTag),
}

impl Verdict {
    /// Returns true if this verdict expects a correct code.
    pub fn is_ok(self) -> bool {
        matches!(self, Verdict::Ok)
    }

    /// Returns the error detail, if any.
    pub fn detail(self) -> Option<DetailTag> {
        match self {
            Verdict::Ok => None,
            Verdict::Error(detail) => Some(detail),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Ok => write!(f, "OK"),
            Verdict::Error(detail) => write!(f, "ERROR: {detail}"),
        }
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "OK" {
            return Ok(Verdict::Ok);
        }
        match s.strip_prefix("ERROR:") {
            Some(detail) => detail
                .trim()
                .parse()
                .map(Verdict::Error)
                .map_err(|err| err.to_string()),
            None => Err(format!("verdict `{s}` must be `OK` or `ERROR: <detail>`")),
        }
    }
}

impl Serialize for Verdict {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How a test command asks the MPI implementation to buffer messages.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferMode {
    /// No buffering placeholder: the tool's default.
    #[default]
    Default,
    /// `$zero_buffer`: sends block until matched.
    Zero,
    /// `$infty_buffer`: sends never block.
    Infinity,
}

impl fmt::Display for BufferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferMode::Default => write!(f, "default"),
            BufferMode::Zero => write!(f, "zero"),
            BufferMode::Infinity => write!(f, "infinity"),
        }
    }
}

impl FromStr for BufferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(BufferMode::Default),
            "zero" => Ok(BufferMode::Zero),
            "infinity" => Ok(BufferMode::Infinity),
            other => Err(format!("unknown buffer mode `{other}`")),
        }
    }
}

/// A single test declared by an annotation header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCase {
    source_file: Utf8PathBuf,
    index: usize,
    command: String,
    expected: Verdict,
}

impl TestCase {
    /// Returns the source file this test was declared in.
    pub fn source_file(&self) -> &Utf8Path {
        &self.source_file
    }

    /// Returns the 0-based index of this test within its source file.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the command template, with placeholders unresolved.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the expected verdict.
    pub fn expected(&self) -> Verdict {
        self.expected
    }

    /// Returns the name of the binary built from the source file: the file stem.
    pub fn binary(&self) -> &str {
        self.source_file.file_stem().unwrap_or("")
    }

    /// Returns the identifier under which this test's artifacts are cached.
    pub fn cache_id(&self) -> CacheId {
        CacheId::new(self.binary(), self.index)
    }

    /// Returns the process count requested with `-np N`, if any.
    pub fn process_count(&self) -> Option<u32> {
        PROCESS_COUNT
            .captures(&self.command)
            .and_then(|caps| caps[1].parse().ok())
    }

    /// Returns the buffering mode requested by the command.
    pub fn buffer_mode(&self) -> BufferMode {
        if self.command.contains(ZERO_BUFFER_PLACEHOLDER) {
            BufferMode::Zero
        } else if self.command.contains(INFTY_BUFFER_PLACEHOLDER) {
            BufferMode::Infinity
        } else {
            BufferMode::Default
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum HeaderState {
    BeforeHeader,
    InHeader,
    AfterHeader,
}

/// Reads `path` and extracts its test cases in declaration order.
pub fn parse_file(path: &Utf8Path) -> Result<Vec<TestCase>, HeaderError> {
    let bytes =
        std::fs::read(path).map_err(|err| HeaderError::new(path, HeaderErrorKind::Read(err)))?;
    parse_str(path, &String::from_utf8_lossy(&bytes))
}

/// Extracts test cases from `contents`, attributing them to `path`.
///
/// Either all test cases are returned or none are.
pub fn parse_str(path: &Utf8Path, contents: &str) -> Result<Vec<TestCase>, HeaderError> {
    let err = |kind| HeaderError::new(path, kind);

    let mut state = HeaderState::BeforeHeader;
    let mut tests = Vec::new();
    let mut lines = contents.lines().enumerate().map(|(idx, line)| (idx + 1, line));

    while let Some((line_no, line)) = lines.next() {
        if BEGIN_MARKER.is_match(line) {
            if state != HeaderState::BeforeHeader {
                return Err(err(HeaderErrorKind::DuplicateBegin { line: line_no }));
            }
            state = HeaderState::InHeader;
            continue;
        }
        if END_MARKER.is_match(line) {
            if state != HeaderState::InHeader {
                return Err(err(HeaderErrorKind::UnexpectedEnd { line: line_no }));
            }
            state = HeaderState::AfterHeader;
            continue;
        }
        if state != HeaderState::InHeader {
            continue;
        }

        let Some(caps) = TEST_LINE.captures(line) else {
            continue;
        };
        let command = caps[1].trim_end().to_owned();

        let Some((verdict_line_no, verdict_line)) = lines.next() else {
            return Err(err(HeaderErrorKind::MissingVerdict {
                line: line_no,
                command,
            }));
        };
        let expected = parse_verdict_line(verdict_line_no, verdict_line).map_err(err)?;

        tests.push(TestCase {
            source_file: path.to_owned(),
            index: tests.len(),
            command,
            expected,
        });
    }

    match state {
        HeaderState::BeforeHeader => Err(err(HeaderErrorKind::MissingHeader)),
        HeaderState::InHeader => Err(err(HeaderErrorKind::Unterminated)),
        HeaderState::AfterHeader if tests.is_empty() => Err(err(HeaderErrorKind::NoTests)),
        HeaderState::AfterHeader => Ok(tests),
    }
}

fn parse_verdict_line(line_no: usize, line: &str) -> Result<Verdict, HeaderErrorKind> {
    if OK_LINE.is_match(line) {
        return Ok(Verdict::Ok);
    }
    let Some(caps) = ERROR_LINE.captures(line) else {
        return Err(HeaderErrorKind::MalformedVerdict {
            line: line_no,
            content: line.to_owned(),
        });
    };
    caps[1]
        .parse()
        .map(Verdict::Error)
        .map_err(|err| HeaderErrorKind::UnknownDetail { line: line_no, err })
}
