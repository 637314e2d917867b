// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result ledger: one delimited line per test execution.
//!
//! Each line has the form:
//!
//! ```text
//! binary;index;tool;timeout_budget;process_count;buffer_mode;expected;raw_outcome;elapsed_seconds
//! ```
//!
//! The ledger is append-only. Every record is written with a single `write` call to a file opened
//! in append mode, so independent runner instances may share a ledger file.

use crate::{
    adapter::ToolId,
    annotation::{BufferMode, TestCase, Verdict},
    errors::LedgerError,
    outcome::{Category, RawOutcome, classify},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt,
    fs::{File, OpenOptions},
    io::Write,
    time::Duration,
};

/// The field separator.
pub const SEPARATOR: char = ';';

const FILE_PREFIX: &str = "bench_";
const FILE_EXTENSION: &str = "csv";

const FIELD_COUNT: usize = 9;

/// One line of the ledger.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerRecord {
    /// The binary built from the source file.
    pub binary: String,
    /// The index of the test case within its source file.
    pub index: usize,
    /// The tool that ran.
    pub tool: ToolId,
    /// The time budget of the run.
    pub timeout: Duration,
    /// The process count requested by the command, if any.
    pub process_count: Option<u32>,
    /// The buffering mode requested by the command.
    pub buffer_mode: BufferMode,
    /// The expected verdict.
    pub expected: Verdict,
    /// What the tool reported.
    pub raw: RawOutcome,
    /// The elapsed time in seconds. Absent if the run was abandoned.
    pub elapsed_seconds: Option<f64>,
}

impl LedgerRecord {
    /// Creates a record for an execution of `test`.
    pub fn new(
        test: &TestCase,
        tool: ToolId,
        timeout: Duration,
        raw: RawOutcome,
        elapsed_seconds: Option<f64>,
    ) -> Self {
        Self {
            binary: test.binary().to_owned(),
            index: test.index(),
            tool,
            timeout,
            process_count: test.process_count(),
            buffer_mode: test.buffer_mode(),
            expected: test.expected(),
            raw,
            elapsed_seconds,
        }
    }

    /// Derives the category of this execution.
    pub fn category(&self) -> Category {
        classify(&self.raw, self.expected)
    }

    /// Returns the key under which later records replace earlier ones.
    pub fn key(&self) -> (&str, usize, ToolId) {
        (&self.binary, self.index, self.tool)
    }

    /// Parses one line of a ledger.
    pub fn parse_line(line: &str) -> Result<Self, Cow<'static, str>> {
        let fields: Vec<&str> = line.split(SEPARATOR).collect();
        let &[binary, index, tool, timeout, np, buffer, expected, raw, elapsed] = fields.as_slice()
        else {
            return Err(Cow::Owned(format!(
                "expected {FIELD_COUNT} fields separated by `{SEPARATOR}`, found {}",
                fields.len()
            )));
        };

        let index = index
            .parse::<usize>()
            .map_err(|err| Cow::Owned(format!("invalid index `{index}`: {err}")))?;
        let tool = tool
            .parse::<ToolId>()
            .map_err(|err| Cow::Owned(err.to_string()))?;
        let timeout = timeout
            .parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(|| Cow::Owned(format!("invalid timeout budget `{timeout}`")))?;
        let process_count = match np {
            "" => None,
            np => Some(
                np.parse::<u32>()
                    .map_err(|err| Cow::Owned(format!("invalid process count `{np}`: {err}")))?,
            ),
        };
        let buffer_mode = buffer.parse::<BufferMode>().map_err(Cow::Owned)?;
        let expected = expected.parse::<Verdict>().map_err(Cow::Owned)?;
        let raw = raw.parse::<RawOutcome>().map_err(Cow::Borrowed)?;
        let elapsed_seconds = match elapsed {
            "" => None,
            elapsed => Some(
                elapsed
                    .parse::<f64>()
                    .map_err(|err| Cow::Owned(format!("invalid elapsed time `{elapsed}`: {err}")))?,
            ),
        };

        Ok(Self {
            binary: binary.to_owned(),
            index,
            tool,
            timeout,
            process_count,
            buffer_mode,
            expected,
            raw,
            elapsed_seconds,
        })
    }
}

impl fmt::Display for LedgerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = SEPARATOR;
        write!(
            f,
            "{}{s}{}{s}{}{s}{}{s}",
            self.binary,
            self.index,
            self.tool,
            self.timeout.as_secs_f64(),
        )?;
        if let Some(np) = self.process_count {
            write!(f, "{np}")?;
        }
        write!(f, "{s}{}{s}{}{s}{}{s}", self.buffer_mode, self.expected, self.raw)?;
        if let Some(elapsed) = self.elapsed_seconds {
            write!(f, "{elapsed}")?;
        }
        Ok(())
    }
}

/// Appends records to a ledger file.
#[derive(Debug)]
pub struct LedgerWriter {
    path: Utf8PathBuf,
    file: File,
}

impl LedgerWriter {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| LedgerError::Open {
                path: path.clone(),
                err,
            })?;
        Ok(Self { path, file })
    }

    /// Returns the path of the ledger.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Appends one record.
    pub fn append(&mut self, record: &LedgerRecord) -> Result<(), LedgerError> {
        let line = format!("{record}\n");
        self.file
            .write_all(line.as_bytes())
            .map_err(|err| LedgerError::Write {
                path: self.path.clone(),
                err,
            })
    }
}

/// Reads every record of a ledger file, in file order. Blank lines are skipped.
pub fn read_ledger(path: &Utf8Path) -> Result<Vec<LedgerRecord>, LedgerError> {
    let contents = std::fs::read_to_string(path).map_err(|err| LedgerError::Read {
        path: path.to_owned(),
        err,
    })?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            LedgerRecord::parse_line(line).map_err(|message| LedgerError::Parse {
                path: path.to_owned(),
                line: idx + 1,
                message,
            })
        })
        .collect()
}

/// Returns the file name of `tool`'s ledger, such as `bench_must.csv`.
pub fn ledger_file_name(tool: ToolId) -> String {
    format!("{FILE_PREFIX}{tool}.{FILE_EXTENSION}")
}

/// Returns the ledger files in `logs_dir`, sorted by name.
///
/// Files whose name looks like a ledger of an unknown tool are skipped.
pub fn find_ledgers(logs_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, LedgerError> {
    let read_dir_err = |err| LedgerError::ReadDir {
        dir: logs_dir.to_owned(),
        err,
    };
    let mut ledgers = Vec::new();
    for entry in logs_dir.read_dir_utf8().map_err(read_dir_err)? {
        let entry = entry.map_err(read_dir_err)?;
        let tool = entry
            .file_name()
            .strip_prefix(FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(FILE_EXTENSION))
            .and_then(|rest| rest.strip_suffix('.'));
        match tool.map(str::parse::<ToolId>) {
            Some(Ok(_)) => ledgers.push(entry.into_path()),
            Some(Err(error)) => tracing::debug!("skipping `{}`: {error}", entry.path()),
            None => {}
        }
    }
    ledgers.sort();
    Ok(ledgers)
}

/// Merges records from several ledgers, keeping the last record for each binary, index and tool.
///
/// The result is sorted by that key.
pub fn merge(records: impl IntoIterator<Item = LedgerRecord>) -> Vec<LedgerRecord> {
    let mut latest = BTreeMap::new();
    for record in records {
        latest.insert((record.binary.clone(), record.index, record.tool), record);
    }
    latest.into_values().collect()
}
