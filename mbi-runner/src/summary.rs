// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aggregate statistics over a set of test executions.

use crate::{
    adapter::ToolId,
    annotation::Verdict,
    helpers::plural,
    ledger::LedgerRecord,
    outcome::{Category, CategoryCounts, FileOutcome},
    vocabulary::ErrorScope,
};
use itertools::Itertools;
use owo_colors::{OwoColorize, Style};
use serde::{Serialize, Serializer};
use std::{collections::BTreeMap, fmt, io};

/// A ratio expressed in percent, truncated to two decimals.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Percentage {
    hundredths: u64,
}

impl Percentage {
    /// Returns `numerator / denominator` in percent, or `None` if the denominator is zero.
    pub fn new(numerator: usize, denominator: usize) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        // Integer arithmetic, so that truncation is exact.
        let hundredths = (numerator as u64 * 10_000) / denominator as u64;
        Some(Self { hundredths })
    }

    /// Returns the value in percent.
    pub fn as_f64(self) -> f64 {
        self.hundredths as f64 / 100.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.hundredths / 100, self.hundredths % 100)
    }
}

impl Serialize for Percentage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

/// Scores derived from category counts. A score is absent when its denominator is zero.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Metrics {
    /// The share of tests the tool could handle: `1 - unimplemented / total`.
    pub portability: Option<Percentage>,
    /// The share of handled tests that completed: `1 - (timeout + failure) / (total - unimplemented)`.
    pub robustness: Option<Percentage>,
    /// `TP / (TP + FN)`.
    pub recall: Option<Percentage>,
    /// `TN / (TN + FP)`.
    pub specificity: Option<Percentage>,
    /// `TP / (TP + FP)`.
    pub precision: Option<Percentage>,
    /// `(TP + TN) / (TP + TN + FP + FN)`.
    pub accuracy: Option<Percentage>,
}

impl Metrics {
    /// Computes the scores from category counts.
    pub fn from_counts(counts: &CategoryCounts) -> Self {
        let total = counts.total();
        let handled = total - counts.unimplemented;
        let (tp, tn, fp, fn_) = (
            counts.true_positive,
            counts.true_negative,
            counts.false_positive,
            counts.false_negative,
        );
        Self {
            portability: Percentage::new(handled, total),
            robustness: Percentage::new(handled - (counts.timeout + counts.failure), handled),
            recall: Percentage::new(tp, tp + fn_),
            specificity: Percentage::new(tn, tn + fp),
            precision: Percentage::new(tp, tp + fp),
            accuracy: Percentage::new(tp + tn, tp + tn + fp + fn_),
        }
    }

    fn rows(&self) -> [(&'static str, Option<Percentage>); 6] {
        [
            ("portability", self.portability),
            ("robustness", self.robustness),
            ("recall", self.recall),
            ("specificity", self.specificity),
            ("precision", self.precision),
            ("accuracy", self.accuracy),
        ]
    }
}

/// The summary of a benchmark run, or of merged ledgers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// The tools the executions belong to.
    pub tools: Vec<ToolId>,
    /// Executions per category.
    pub counts: CategoryCounts,
    /// Total elapsed seconds, excluding timed-out executions.
    pub elapsed_seconds: f64,
    /// Derived scores.
    pub metrics: Metrics,
    /// Executions of erroneous codes, per error scope.
    pub scopes: BTreeMap<ErrorScope, CategoryCounts>,
    /// Source files per aggregate outcome. A file run by several tools counts once per tool.
    pub files: BTreeMap<FileOutcome, usize>,
    /// The aggregate outcome of each source file, sorted by tool then binary.
    #[serde(serialize_with = "serialize_values")]
    pub per_file: BTreeMap<(ToolId, String), FileSummary>,
}

/// The executions of one source file by one tool.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileSummary {
    /// The tool that ran.
    pub tool: ToolId,
    /// The binary built from the source file.
    pub binary: String,
    /// Executions per category.
    #[serde(skip)]
    pub counts: CategoryCounts,
    /// The aggregate outcome.
    pub outcome: FileOutcome,
}

impl RunSummary {
    /// Creates an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one execution. Its category is derived from the record.
    pub fn add(&mut self, record: &LedgerRecord) {
        let tool = record.tool;
        let category = record.category();
        if let Err(idx) = self.tools.binary_search(&tool) {
            self.tools.insert(idx, tool);
        }
        self.counts.add(category);
        if category != Category::Timeout
            && let Some(elapsed) = record.elapsed_seconds
        {
            self.elapsed_seconds += elapsed;
        }
        self.metrics = Metrics::from_counts(&self.counts);

        if let Some(detail) = record.expected.detail() {
            self.scopes.entry(detail.scope()).or_default().add(category);
        }
        self.add_to_file(tool, &record.binary, record.expected, category);
    }

    fn add_to_file(&mut self, tool: ToolId, binary: &str, expected: Verdict, category: Category) {
        let file = self
            .per_file
            .entry((tool, binary.to_owned()))
            .or_insert_with(|| FileSummary {
                tool,
                binary: binary.to_owned(),
                counts: CategoryCounts::default(),
                outcome: FileOutcome::O,
            });
        let previous = (file.counts.total() != 0).then_some(file.outcome);
        file.counts.add(category);
        file.outcome = FileOutcome::from_counts(&file.counts, expected);
        let outcome = file.outcome;

        if let Some(previous) = previous
            && let Some(count) = self.files.get_mut(&previous)
        {
            *count -= 1;
            if *count == 0 {
                self.files.remove(&previous);
            }
        }
        *self.files.entry(outcome).or_default() += 1;
    }

    /// Summarizes ledger records. Categories are derived again from each record.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a LedgerRecord>) -> Self {
        let mut summary = Self::new();
        for record in records {
            summary.add(record);
        }
        summary
    }

    /// Writes the summary in human-readable form.
    pub fn write_human(&self, writer: &mut dyn io::Write, colorize: bool) -> io::Result<()> {
        let mut styles = Styles::default();
        if colorize {
            styles.colorize();
        }

        let tools = if self.tools.is_empty() {
            "(none)".to_owned()
        } else {
            self.tools.iter().map(|tool| tool.as_str()).join(", ")
        };
        writeln!(writer, "{}: {}", "tools".style(styles.heading), tools.style(styles.tool))?;

        writeln!(writer, "{}:", "results".style(styles.heading))?;
        for category in Category::ALL {
            let count = self.counts.get(category);
            let style = if count == 0 {
                Style::new()
            } else if category.is_verdict() {
                match category {
                    Category::TruePositive | Category::TrueNegative => styles.pass,
                    _ => styles.fail,
                }
            } else {
                styles.infra
            };
            writeln!(writer, "    {:<16}{}", category.as_str(), count.style(style))?;
        }
        writeln!(writer, "    {:<16}{}", "total", self.counts.total().style(styles.count))?;

        writeln!(writer, "{}:", "scores".style(styles.heading))?;
        for (name, value) in self.metrics.rows() {
            match value {
                Some(value) => writeln!(writer, "    {name:<16}{}", value.style(styles.count))?,
                None => writeln!(writer, "    {name:<16}-")?,
            }
        }

        if !self.files.is_empty() {
            writeln!(writer, "{}:", "files".style(styles.heading))?;
            for (outcome, count) in &self.files {
                writeln!(writer, "    {:<16}{}", outcome.to_string(), count.style(styles.count))?;
            }
        }

        if !self.scopes.is_empty() {
            writeln!(writer, "{}:", "error scopes".style(styles.heading))?;
            for (scope, counts) in &self.scopes {
                let total = counts.total();
                let recall = Metrics::from_counts(counts)
                    .recall
                    .map_or_else(|| "-".to_owned(), |recall| recall.to_string());
                writeln!(
                    writer,
                    "    {:<20}{:<17}{total} {}, recall {}",
                    scope.display_name(),
                    scope.extent(),
                    plural::tests_str(total),
                    recall.style(styles.count),
                )?;
            }
        }

        writeln!(
            writer,
            "{} {:.1}s (excluding timeouts)",
            "elapsed:".style(styles.heading),
            self.elapsed_seconds,
        )
    }

    /// Writes the summary as JSON.
    pub fn write_json(&self, writer: &mut dyn io::Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, self).map_err(io::Error::other)?;
        writeln!(writer)
    }
}

fn serialize_values<K, V: Serialize, S: Serializer>(
    map: &BTreeMap<K, V>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(map.values())
}

#[derive(Clone, Debug, Default)]
struct Styles {
    heading: Style,
    tool: Style,
    count: Style,
    pass: Style,
    fail: Style,
    infra: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.heading = Style::new().bold();
        self.tool = Style::new().bold().magenta();
        self.count = Style::new().bold();
        self.pass = Style::new().bold().green();
        self.fail = Style::new().bold().red();
        self.infra = Style::new().bold().yellow();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{annotation::BufferMode, outcome::RawOutcome, vocabulary::DetailTag};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use test_case::test_case;

    #[test_case(2, 3, Some("66.66%"); "truncated")]
    #[test_case(29, 100, Some("29.00%"); "exact")]
    #[test_case(0, 5, Some("0.00%"); "zero")]
    #[test_case(5, 5, Some("100.00%"); "full")]
    #[test_case(0, 0, None; "empty")]
    fn percentages(numerator: usize, denominator: usize, expected: Option<&str>) {
        assert_eq!(
            Percentage::new(numerator, denominator).map(|p| p.to_string()),
            expected.map(str::to_owned)
        );
    }

    fn record(
        binary: &str,
        index: usize,
        expected: Verdict,
        raw: RawOutcome,
        elapsed: Option<f64>,
    ) -> LedgerRecord {
        LedgerRecord {
            binary: binary.to_owned(),
            index,
            tool: ToolId::Must,
            timeout: Duration::from_secs(300),
            process_count: Some(2),
            buffer_mode: BufferMode::Default,
            expected,
            raw,
            elapsed_seconds: elapsed,
        }
    }

    fn sample() -> RunSummary {
        let call = Verdict::Error(DetailTag::CallMatching);
        let root = Verdict::Error(DetailTag::InvalidRoot);
        let leak = Verdict::Error(DetailTag::RequestLeak);
        RunSummary::from_records(&[
            record("CallOrd_nok", 0, call, RawOutcome::error("deadlock"), Some(1.5)),
            record("CallOrd_nok", 1, call, RawOutcome::error("deadlock"), Some(2.0)),
            record("Root_nok", 0, root, RawOutcome::Ok, Some(0.5)),
            record("Coll_ok", 0, Verdict::Ok, RawOutcome::Ok, Some(1.0)),
            record("Coll_ok", 1, Verdict::Ok, RawOutcome::Timeout, Some(300.0)),
            record("Leak_nok", 0, leak, RawOutcome::Unimplemented, None),
        ])
    }

    #[test]
    fn metrics() {
        let summary = sample();
        assert_eq!(summary.counts.total(), 6);
        assert_eq!(summary.elapsed_seconds, 5.0);
        let m = summary.metrics;
        // 5 of 6 tests handled.
        assert_eq!(m.portability, Percentage::new(5, 6));
        // 4 of 5 handled tests completed.
        assert_eq!(m.robustness, Percentage::new(4, 5));
        assert_eq!(m.recall, Percentage::new(2, 3));
        assert_eq!(m.specificity, Percentage::new(1, 1));
        assert_eq!(m.precision, Percentage::new(2, 2));
        assert_eq!(m.accuracy, Percentage::new(3, 4));
    }

    #[test]
    fn empty_metrics() {
        let summary = RunSummary::new();
        assert_eq!(summary.metrics, Metrics::default());
    }

    #[test]
    fn human_output() {
        let mut out = Vec::new();
        sample().write_human(&mut out, false).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            indoc! {"
                tools: must
                results:
                    TRUE_POS        2
                    TRUE_NEG        1
                    FALSE_POS       0
                    FALSE_NEG       1
                    timeout         1
                    failure         0
                    unimplemented   1
                    other           0
                    total           6
                scores:
                    portability     83.33%
                    robustness      80.00%
                    recall          66.66%
                    specificity     100.00%
                    precision       100.00%
                    accuracy        75.00%
                files:
                    TP              1
                    FN              1
                    CFP             1
                    CE              1
                error scopes:
                    Invalid parameter   single call      1 test, recall 0.00%
                    Resource leak       single process   1 test, recall -
                    Call ordering       multi-processes  2 tests, recall 100.00%
                elapsed: 5.0s (excluding timeouts)
            "}
        );
    }

    #[test]
    fn json_output() {
        let mut out = Vec::new();
        sample().write_json(&mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["tools"], serde_json::json!(["must"]));
        assert_eq!(value["counts"]["TRUE_POS"], 2);
        assert_eq!(value["metrics"]["accuracy"], 75.0);
        assert_eq!(value["metrics"]["portability"], 83.33);
        assert_eq!(value["files"]["CFP"], 1);
        assert_eq!(value["scopes"]["call-ordering"]["TRUE_POS"], 2);
        assert_eq!(
            value["per_file"],
            serde_json::json!([
                {"tool": "must", "binary": "CallOrd_nok", "outcome": "TP"},
                {"tool": "must", "binary": "Coll_ok", "outcome": "CFP"},
                {"tool": "must", "binary": "Leak_nok", "outcome": "CE"},
                {"tool": "must", "binary": "Root_nok", "outcome": "FN"},
            ])
        );
    }

    #[test]
    fn file_outcomes_follow_later_executions() {
        let call = Verdict::Error(DetailTag::CallMatching);
        let mut summary = RunSummary::new();
        summary.add(&record("CallOrd_nok", 0, call, RawOutcome::error("deadlock"), Some(1.0)));
        assert_eq!(summary.files, BTreeMap::from([(FileOutcome::TP, 1)]));

        summary.add(&record("CallOrd_nok", 1, call, RawOutcome::Ok, Some(1.0)));
        assert_eq!(summary.files, BTreeMap::from([(FileOutcome::CTP, 1)]));
        assert_eq!(
            summary.per_file[&(ToolId::Must, "CallOrd_nok".to_owned())].counts.total(),
            2
        );

        // Correct codes have no error scope.
        summary.add(&record("Coll_ok", 0, Verdict::Ok, RawOutcome::Ok, Some(1.0)));
        assert_eq!(
            summary.files,
            BTreeMap::from([(FileOutcome::CTP, 1), (FileOutcome::TN, 1)])
        );
        assert_eq!(summary.scopes.len(), 1);
        assert_eq!(summary.scopes[&ErrorScope::CallOrdering].total(), 2);
    }
}
