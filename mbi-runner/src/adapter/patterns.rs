// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The shared "first match wins" engine over tool output.

use crate::{
    cache::{BUILD_FAILURE_MARKER, SPAWN_FAILURE_MARKER, Sidecars},
    outcome::RawOutcome,
};
use regex::Regex;

/// Which artifact a rule is matched against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatternSource {
    /// The combined build and execution log.
    Log,

    /// The tool's report artifact (see [`PatternTable::report_suffix`]).
    Report,
}

/// One row of a pattern table: if `pattern` matches `source`, the outcome is `outcome`.
#[derive(Clone, Debug)]
pub struct PatternRule {
    /// The artifact to search.
    pub source: PatternSource,

    /// A regular expression, searched anywhere in the artifact.
    pub pattern: &'static str,

    /// The outcome if the pattern matches.
    pub outcome: RawOutcome,
}

impl PatternRule {
    /// A rule over the log.
    pub const fn log(pattern: &'static str, outcome: RawOutcome) -> Self {
        Self {
            source: PatternSource::Log,
            pattern,
            outcome,
        }
    }

    /// A rule over the report artifact.
    pub const fn report(pattern: &'static str, outcome: RawOutcome) -> Self {
        Self {
            source: PatternSource::Report,
            pattern,
            outcome,
        }
    }
}

/// When the timeout marker is consulted relative to the rules.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeoutPriority {
    /// A timed-out run is a timeout, whatever it printed.
    First,

    /// Output recognized by a rule wins over the timeout marker. Used for tools that keep running
    /// after reporting an error.
    Last,
}

/// An ordered pattern table, as data.
#[derive(Clone, Debug)]
pub struct PatternTable {
    /// The rules, in priority order.
    pub rules: &'static [PatternRule],

    /// When the timeout marker is consulted.
    pub timeout_priority: TimeoutPriority,

    /// The sidecar suffix of the report artifact, such as `.html`.
    pub report_suffix: Option<&'static str>,

    /// If true, a missing report is a `failure`.
    pub report_required: bool,

    /// The outcome when nothing matched.
    pub fallback: RawOutcome,
}

/// A [`PatternTable`] with its regular expressions compiled.
#[derive(Clone, Debug)]
pub struct CompiledTable {
    table: &'static PatternTable,
    rules: Vec<(PatternSource, Regex, RawOutcome)>,
}

impl CompiledTable {
    /// Compiles every rule of `table`.
    pub fn new(table: &'static PatternTable) -> Result<Self, regex::Error> {
        let rules = table
            .rules
            .iter()
            .map(|rule| Ok((rule.source, Regex::new(rule.pattern)?, rule.outcome.clone())))
            .collect::<Result<_, regex::Error>>()?;
        Ok(Self { table, rules })
    }

    /// Reads the artifacts of a run and recognizes its outcome.
    pub fn evaluate(&self, sidecars: &Sidecars) -> RawOutcome {
        let log = sidecars.read_log();
        let report = self.table.report_suffix.and_then(|suffix| {
            std::fs::read(sidecars.with_suffix(suffix))
                .ok()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        });
        let outcome = self.evaluate_texts(sidecars.timed_out(), log.as_deref(), report.as_deref());
        if outcome == RawOutcome::Other {
            tracing::warn!(
                "unrecognized output for {} in `{}`:\n{}",
                sidecars.id(),
                sidecars.dir(),
                log.as_deref().unwrap_or("(no log)"),
            );
        }
        outcome
    }

    /// Recognizes the outcome of a run from its artifacts' contents.
    pub fn evaluate_texts(
        &self,
        timed_out: bool,
        log: Option<&str>,
        report: Option<&str>,
    ) -> RawOutcome {
        if timed_out && self.table.timeout_priority == TimeoutPriority::First {
            return RawOutcome::Timeout;
        }
        let Some(log) = log else {
            return RawOutcome::Failure;
        };
        // A failed build or spawn never produces a report.
        if log.contains(BUILD_FAILURE_MARKER) {
            return RawOutcome::Unimplemented;
        }
        if log.contains(SPAWN_FAILURE_MARKER) {
            return RawOutcome::Failure;
        }
        if self.table.report_required && report.is_none() {
            return RawOutcome::Failure;
        }

        for (source, regex, outcome) in &self.rules {
            let text = match source {
                PatternSource::Log => Some(log),
                PatternSource::Report => report,
            };
            if text.is_some_and(|text| regex.is_match(text)) {
                return outcome.clone();
            }
        }

        if timed_out {
            return RawOutcome::Timeout;
        }
        self.table.fallback.clone()
    }
}
