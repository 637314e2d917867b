// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw tool outcomes, scoring categories and the classifier between them.

use crate::{adapter::ToolId, annotation::Verdict, cache::CacheId};
use serde::Serialize;
use std::{borrow::Cow, collections::HashMap, fmt, str::FromStr};

/// What a tool reported for one test case, after its output was recognized.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum RawOutcome {
    /// The tool reported no error.
    Ok,

    /// The tool reported an error, tagged with a tool-specific name such as `deadlock`.
    Error(Cow<'static, str>),

    /// The time budget was exceeded.
    Timeout,

    /// The tool crashed or produced no usable artifact.
    Failure,

    /// The tool cannot handle a construct used by the test.
    Unimplemented,

    /// The tool produced output that was not recognized.
    Other,
}

impl RawOutcome {
    /// Creates an error outcome from a static tag.
    pub const fn error(tag: &'static str) -> Self {
        Self::Error(Cow::Borrowed(tag))
    }

    /// Returns the outcome as written to the ledger.
    pub fn as_str(&self) -> &str {
        match self {
            RawOutcome::Ok => "OK",
            RawOutcome::Error(tag) => tag,
            RawOutcome::Timeout => "timeout",
            RawOutcome::Failure => "failure",
            RawOutcome::Unimplemented => "UNIMPLEMENTED",
            RawOutcome::Other => "other",
        }
    }
}

impl fmt::Display for RawOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RawOutcome {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let outcome = match s {
            "" => return Err("raw outcome is empty"),
            "OK" => RawOutcome::Ok,
            "timeout" => RawOutcome::Timeout,
            // Older ledgers record crashes separately.
            "failure" | "segfault" => RawOutcome::Failure,
            "UNIMPLEMENTED" => RawOutcome::Unimplemented,
            "other" => RawOutcome::Other,
            tag => RawOutcome::Error(Cow::Owned(tag.to_owned())),
        };
        Ok(outcome)
    }
}

impl Serialize for RawOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The scoring bucket of one test execution.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Category {
    /// An error was expected and reported.
    #[serde(rename = "TRUE_POS")]
    TruePositive,
    /// No error was expected and none was reported.
    #[serde(rename = "TRUE_NEG")]
    TrueNegative,
    /// No error was expected but one was reported.
    #[serde(rename = "FALSE_POS")]
    FalsePositive,
    /// An error was expected but none was reported.
    #[serde(rename = "FALSE_NEG")]
    FalseNegative,
    /// The time budget was exceeded.
    #[serde(rename = "timeout")]
    Timeout,
    /// The tool crashed or the test did not run.
    #[serde(rename = "failure")]
    Failure,
    /// The tool does not support the test.
    #[serde(rename = "unimplemented")]
    Unimplemented,
    /// The run was inconclusive.
    #[serde(rename = "other")]
    Other,
}

impl Category {
    /// All categories, in report order.
    pub const ALL: [Category; 8] = [
        Category::TruePositive,
        Category::TrueNegative,
        Category::FalsePositive,
        Category::FalseNegative,
        Category::Timeout,
        Category::Failure,
        Category::Unimplemented,
        Category::Other,
    ];

    /// Returns the name of this category.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::TruePositive => "TRUE_POS",
            Category::TrueNegative => "TRUE_NEG",
            Category::FalsePositive => "FALSE_POS",
            Category::FalseNegative => "FALSE_NEG",
            Category::Timeout => "timeout",
            Category::Failure => "failure",
            Category::Unimplemented => "unimplemented",
            Category::Other => "other",
        }
    }

    /// Returns true if this category is a correctness verdict rather than an infrastructure
    /// outcome.
    pub fn is_verdict(self) -> bool {
        matches!(
            self,
            Category::TruePositive
                | Category::TrueNegative
                | Category::FalsePositive
                | Category::FalseNegative
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combines what a tool reported with what the annotation expected.
///
/// Infrastructure outcomes are never folded into a correctness verdict, whatever was expected.
pub fn classify(raw: &RawOutcome, expected: Verdict) -> Category {
    match raw {
        RawOutcome::Timeout => Category::Timeout,
        RawOutcome::Failure => Category::Failure,
        RawOutcome::Unimplemented => Category::Unimplemented,
        RawOutcome::Other => Category::Other,
        RawOutcome::Ok if expected.is_ok() => Category::TrueNegative,
        RawOutcome::Error(_) if expected.is_ok() => Category::FalsePositive,
        RawOutcome::Ok => Category::FalseNegative,
        RawOutcome::Error(_) => Category::TruePositive,
    }
}

/// The classification of one test execution, with a short explanation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Classification {
    /// The scoring bucket.
    pub category: Category,
    /// The elapsed time in seconds, if the test ran.
    pub elapsed_seconds: Option<f64>,
    /// A short human-readable explanation.
    pub diagnostic: Cow<'static, str>,
    /// What the tool reported.
    pub raw: RawOutcome,
}

/// Classifies a test execution and explains the result.
pub fn categorize(raw: RawOutcome, expected: Verdict, elapsed_seconds: Option<f64>) -> Classification {
    let category = classify(&raw, expected);
    let diagnostic = match category {
        Category::Timeout => match elapsed_seconds {
            Some(elapsed) => Cow::Owned(format!("timeout after {elapsed} sec")),
            None => Cow::Borrowed("hard timeout"),
        },
        Category::Failure => Cow::Borrowed("tool error, or test not run"),
        Category::Unimplemented => Cow::Borrowed("coverage issue"),
        Category::Other => Cow::Borrowed("inconclusive run"),
        Category::TrueNegative => Cow::Borrowed("correctly reported no error"),
        Category::FalsePositive => Cow::Borrowed("reported an error in a correct code"),
        Category::FalseNegative => Cow::Borrowed("failed to detect an error"),
        Category::TruePositive => Cow::Borrowed("correctly detected an error"),
    };
    Classification {
        category,
        elapsed_seconds,
        diagnostic,
        raw,
    }
}

/// Memoized classifications, owned by the orchestrator of one run.
#[derive(Debug, Default)]
pub struct ClassificationMemo {
    entries: HashMap<(ToolId, CacheId), Classification>,
}

impl ClassificationMemo {
    /// Creates an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized classification, computing it with `f` if absent.
    pub fn get_or_insert_with(
        &mut self,
        tool: ToolId,
        id: &CacheId,
        f: impl FnOnce() -> Classification,
    ) -> &Classification {
        self.entries.entry((tool, id.clone())).or_insert_with(f)
    }

    /// Returns the memoized classification, if any.
    pub fn get(&self, tool: ToolId, id: &CacheId) -> Option<&Classification> {
        self.entries.get(&(tool, id.clone()))
    }

    /// Returns the number of memoized classifications.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was memoized yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Number of executions per category.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CategoryCounts {
    /// True positives.
    #[serde(rename = "TRUE_POS")]
    pub true_positive: usize,
    /// True negatives.
    #[serde(rename = "TRUE_NEG")]
    pub true_negative: usize,
    /// False positives.
    #[serde(rename = "FALSE_POS")]
    pub false_positive: usize,
    /// False negatives.
    #[serde(rename = "FALSE_NEG")]
    pub false_negative: usize,
    /// Timeouts.
    pub timeout: usize,
    /// Tool failures.
    pub failure: usize,
    /// Unsupported tests.
    pub unimplemented: usize,
    /// Inconclusive runs.
    pub other: usize,
}

impl CategoryCounts {
    /// Adds one execution of the given category.
    pub fn add(&mut self, category: Category) {
        *self.get_mut(category) += 1;
    }

    /// Returns the count for the given category.
    pub fn get(&self, category: Category) -> usize {
        match category {
            Category::TruePositive => self.true_positive,
            Category::TrueNegative => self.true_negative,
            Category::FalsePositive => self.false_positive,
            Category::FalseNegative => self.false_negative,
            Category::Timeout => self.timeout,
            Category::Failure => self.failure,
            Category::Unimplemented => self.unimplemented,
            Category::Other => self.other,
        }
    }

    fn get_mut(&mut self, category: Category) -> &mut usize {
        match category {
            Category::TruePositive => &mut self.true_positive,
            Category::TrueNegative => &mut self.true_negative,
            Category::FalsePositive => &mut self.false_positive,
            Category::FalseNegative => &mut self.false_negative,
            Category::Timeout => &mut self.timeout,
            Category::Failure => &mut self.failure,
            Category::Unimplemented => &mut self.unimplemented,
            Category::Other => &mut self.other,
        }
    }

    /// Returns the total number of executions.
    pub fn total(&self) -> usize {
        Category::ALL.iter().map(|&c| self.get(c)).sum()
    }
}

impl FromIterator<Category> for CategoryCounts {
    fn from_iter<I: IntoIterator<Item = Category>>(iter: I) -> Self {
        let mut counts = Self::default();
        for category in iter {
            counts.add(category);
        }
        counts
    }
}

/// The aggregate outcome of all the test cases declared by one source file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum FileOutcome {
    /// Every execution was a true positive.
    TP,
    /// Some executions were true positives, others were not.
    CTP,
    /// Every execution was a false negative.
    FN,
    /// Every execution was a false positive.
    FP,
    /// Some executions were false positives, others were not.
    CFP,
    /// Every execution was a true negative.
    TN,
    /// Every execution was unsupported by the tool.
    CE,
    /// Every execution failed.
    RE,
    /// Every execution timed out.
    TO,
    /// A mix of infrastructure outcomes, or nothing at all.
    O,
}

impl FileOutcome {
    /// Aggregates the categories of one file's executions.
    pub fn from_counts(counts: &CategoryCounts, expected: Verdict) -> Self {
        let infra = counts.other + counts.unimplemented + counts.timeout + counts.failure;
        let (hit, miss) = if expected.is_ok() {
            (counts.true_negative, counts.false_positive)
        } else {
            (counts.true_positive, counts.false_negative)
        };

        if hit != 0 && miss + infra == 0 {
            if expected.is_ok() { Self::TN } else { Self::TP }
        } else if miss != 0 && hit + infra == 0 {
            if expected.is_ok() { Self::FP } else { Self::FN }
        } else if infra != 0 && hit + miss == 0 {
            if counts.unimplemented == infra {
                Self::CE
            } else if counts.timeout == infra {
                Self::TO
            } else if counts.failure == infra {
                Self::RE
            } else {
                Self::O
            }
        } else if hit + miss + infra == 0 {
            Self::O
        } else if expected.is_ok() {
            Self::CFP
        } else {
            Self::CTP
        }
    }
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::DetailTag;
    use test_case::test_case;
    use test_strategy::proptest;

    const ROOT: Verdict = Verdict::Error(DetailTag::InvalidRoot);

    #[test_case(RawOutcome::Ok, Verdict::Ok, Category::TrueNegative; "ok ok")]
    #[test_case(RawOutcome::error("deadlock"), Verdict::Ok, Category::FalsePositive; "deadlock ok")]
    #[test_case(RawOutcome::Ok, ROOT, Category::FalseNegative; "ok error")]
    #[test_case(RawOutcome::error("mpierr"), ROOT, Category::TruePositive; "mpierr error")]
    #[test_case(RawOutcome::Timeout, ROOT, Category::Timeout; "timeout error")]
    #[test_case(RawOutcome::Timeout, Verdict::Ok, Category::Timeout; "timeout ok")]
    #[test_case(RawOutcome::Unimplemented, Verdict::Ok, Category::Unimplemented; "unimplemented ok")]
    #[test_case(RawOutcome::Failure, ROOT, Category::Failure; "failure error")]
    #[test_case(RawOutcome::Other, Verdict::Ok, Category::Other; "other ok")]
    fn classify_table(raw: RawOutcome, expected: Verdict, category: Category) {
        assert_eq!(classify(&raw, expected), category);
    }

    #[proptest(cases = 64)]
    fn infrastructure_ignores_expected(detail: DetailTag, ok: bool) {
        let expected = if ok { Verdict::Ok } else { Verdict::Error(detail) };
        for (raw, category) in [
            (RawOutcome::Timeout, Category::Timeout),
            (RawOutcome::Failure, Category::Failure),
            (RawOutcome::Unimplemented, Category::Unimplemented),
            (RawOutcome::Other, Category::Other),
        ] {
            assert_eq!(classify(&raw, expected), category);
        }
    }

    #[test_case("OK", RawOutcome::Ok)]
    #[test_case("timeout", RawOutcome::Timeout)]
    #[test_case("segfault", RawOutcome::Failure)]
    #[test_case("UNIMPLEMENTED", RawOutcome::Unimplemented)]
    #[test_case("resleak", RawOutcome::error("resleak"))]
    fn raw_outcome_from_str(input: &str, expected: RawOutcome) {
        assert_eq!(input.parse::<RawOutcome>(), Ok(expected));
    }

    #[test]
    fn diagnostics() {
        let c = categorize(RawOutcome::Timeout, Verdict::Ok, Some(300.5));
        assert_eq!(c.diagnostic, "timeout after 300.5 sec");
        let c = categorize(RawOutcome::Timeout, Verdict::Ok, None);
        assert_eq!(c.diagnostic, "hard timeout");
        let c = categorize(RawOutcome::error("deadlock"), ROOT, Some(1.0));
        assert_eq!(c.category, Category::TruePositive);
        assert_eq!(c.diagnostic, "correctly detected an error");
    }

    #[test]
    fn memo_computes_once() {
        let mut memo = ClassificationMemo::new();
        let id = CacheId::new("Leak_nok", 0);
        let mut calls = 0;
        for _ in 0..3 {
            memo.get_or_insert_with(ToolId::Isp, &id, || {
                calls += 1;
                categorize(RawOutcome::Ok, Verdict::Ok, Some(0.1))
            });
        }
        assert_eq!(calls, 1);
        assert!(memo.get(ToolId::Must, &id).is_none());
        assert_eq!(memo.len(), 1);
    }

    #[test_case(&[Category::TruePositive, Category::TruePositive], ROOT, FileOutcome::TP; "all tp")]
    #[test_case(&[Category::TruePositive, Category::FalseNegative], ROOT, FileOutcome::CTP; "can be tp")]
    #[test_case(&[Category::TruePositive, Category::Timeout], ROOT, FileOutcome::CTP; "tp and timeout")]
    #[test_case(&[Category::FalseNegative], ROOT, FileOutcome::FN; "all fn")]
    #[test_case(&[Category::TrueNegative], Verdict::Ok, FileOutcome::TN; "all tn")]
    #[test_case(&[Category::FalsePositive, Category::FalsePositive], Verdict::Ok, FileOutcome::FP; "all fp")]
    #[test_case(&[Category::TrueNegative, Category::FalsePositive], Verdict::Ok, FileOutcome::CFP; "can be fp")]
    #[test_case(&[Category::Unimplemented, Category::Unimplemented], ROOT, FileOutcome::CE; "all ce")]
    #[test_case(&[Category::Timeout], Verdict::Ok, FileOutcome::TO; "all to")]
    #[test_case(&[Category::Failure], ROOT, FileOutcome::RE; "all re")]
    #[test_case(&[Category::Failure, Category::Timeout], ROOT, FileOutcome::O; "mixed infra")]
    #[test_case(&[], ROOT, FileOutcome::O; "nothing")]
    fn file_outcome(categories: &[Category], expected: Verdict, outcome: FileOutcome) {
        let counts: CategoryCounts = categories.iter().copied().collect();
        assert_eq!(FileOutcome::from_counts(&counts, expected), outcome);
    }
}
