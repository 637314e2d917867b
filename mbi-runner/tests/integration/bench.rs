// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use indoc::indoc;
use mbi_runner::{
    adapter::{
        ToolAdapter, ToolId,
        patterns::{CompiledTable, PatternRule, PatternTable, TimeoutPriority},
    },
    annotation::{EXE_PLACEHOLDER, TestCase},
    bench::BenchRunner,
    cache::Sidecars,
    config::{MbiConfig, RunContext},
    errors::BenchRunError,
    ledger::{merge, read_ledger},
    outcome::{Category, FileOutcome, RawOutcome},
    partition::BatchSpec,
    vocabulary::ErrorScope,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

static TABLE: PatternTable = PatternTable {
    rules: &[
        PatternRule::log("deadlock found", RawOutcome::error("deadlock")),
        PatternRule::log("no error found", RawOutcome::Ok),
    ],
    timeout_priority: TimeoutPriority::First,
    report_suffix: None,
    report_required: false,
    fallback: RawOutcome::Other,
};

/// An adapter whose "tool" is the annotated shell command itself.
///
/// The run log echoes the command line, so the commands build the matched words at run time.
#[derive(Debug)]
struct ScriptedAdapter {
    table: CompiledTable,
}

impl ScriptedAdapter {
    fn new() -> Self {
        Self {
            table: CompiledTable::new(&TABLE).expect("valid patterns"),
        }
    }
}

impl ToolAdapter for ScriptedAdapter {
    fn id(&self) -> ToolId {
        ToolId::Isp
    }

    fn build_command(&self, test: &TestCase) -> Option<String> {
        Some(format!("cp {} {}", test.source_file(), test.binary()))
    }

    fn exec_command(&self, test: &TestCase) -> String {
        test.command().replace(EXE_PLACEHOLDER, test.binary())
    }

    fn parse(&self, sidecars: &Sidecars) -> RawOutcome {
        self.table.evaluate(sidecars)
    }
}

const A_OK: &str = indoc! {"
    /* BEGIN_MBI_TESTS
      $ sh -c 'test -f ${EXE} && echo no error $(echo found)'
      | OK
      $ sh -c 'echo deadlock $(echo found)'
      | OK
    END_MBI_TESTS */
"};

const B_NOK: &str = indoc! {"
    /* BEGIN_MBI_TESTS
      $ sh -c 'echo deadlock $(echo found)'
      | ERROR: CallMatching
      $ sh -c 'sleep 30'
      | ERROR: CallMatching
    END_MBI_TESTS */
"};

const C_NOK: &str = indoc! {"
    /* BEGIN_MBI_TESTS
      $ sh -c 'echo something else'
      | ERROR: CallMatching
    END_MBI_TESTS */
"};

fn write_corpus(root: &Utf8Path, files: &[(&str, &str)]) {
    let codes = root.join("codes");
    std::fs::create_dir_all(&codes).expect("created codes dir");
    for (name, contents) in files {
        std::fs::write(codes.join(name), contents).expect("wrote source");
    }
}

fn context(root: &Utf8Path, batch: BatchSpec) -> RunContext {
    MbiConfig::defaults(root)
        .expect("defaults parse")
        .with_codes_dir("codes")
        .with_logs_dir("logs")
        .with_timeout(Duration::from_secs(1))
        .with_runner_settings(fast_settings())
        .with_batch(batch)
        .into_run_context(ToolId::Isp)
}

#[test]
fn end_to_end() -> Result<()> {
    test_init();
    let root = Utf8TempDir::new()?;
    write_corpus(
        root.path(),
        &[("A_ok.c", A_OK), ("B_nok.c", B_NOK), ("C_nok.c", C_NOK)],
    );
    let ctx = context(root.path(), BatchSpec::ALL);
    let adapter = ScriptedAdapter::new();

    let report = BenchRunner::with_adapter(&ctx, &adapter).run()?;
    let categories: Vec<_> = report
        .results
        .iter()
        .map(|result| {
            (
                result.test.cache_id().to_string(),
                result.classification.category,
                result.cached,
            )
        })
        .collect();
    assert_eq!(
        categories,
        vec![
            ("A_ok_0".to_owned(), Category::TrueNegative, false),
            ("A_ok_1".to_owned(), Category::FalsePositive, false),
            ("B_nok_0".to_owned(), Category::TruePositive, false),
            ("B_nok_1".to_owned(), Category::Timeout, false),
            ("C_nok_0".to_owned(), Category::Other, false),
        ]
    );
    assert_eq!(report.summary.counts.total(), 5);
    assert_eq!(report.summary.tools, vec![ToolId::Isp]);
    let files: Vec<_> = report
        .summary
        .per_file
        .values()
        .map(|file| (file.binary.as_str(), file.outcome))
        .collect();
    assert_eq!(
        files,
        vec![
            ("A_ok", FileOutcome::CFP),
            ("B_nok", FileOutcome::CTP),
            ("C_nok", FileOutcome::O),
        ]
    );
    assert_eq!(report.summary.scopes[&ErrorScope::CallOrdering].total(), 3);

    let records = read_ledger(&ctx.ledger_path())?;
    assert_eq!(records.len(), 5);
    assert_eq!(records[3].raw, RawOutcome::Timeout);
    assert_eq!(records[3].timeout, Duration::from_secs(1));

    // The second run is served from the cache and yields the same categories.
    let again = BenchRunner::with_adapter(&ctx, &adapter).run()?;
    assert!(again.results.iter().all(|result| result.cached));
    let again_categories: Vec<_> = again
        .results
        .iter()
        .map(|result| result.classification.category)
        .collect();
    assert_eq!(
        again_categories,
        categories.iter().map(|(_, category, _)| *category).collect::<Vec<_>>()
    );
    assert_eq!(again.summary.counts, report.summary.counts);

    // Both runs were appended; merging keeps one record per test.
    let records = read_ledger(&ctx.ledger_path())?;
    assert_eq!(records.len(), 10);
    assert_eq!(merge(records).len(), 5);
    Ok(())
}

#[test]
fn batches_partition_corpus() -> Result<()> {
    test_init();
    let root = Utf8TempDir::new()?;
    write_corpus(
        root.path(),
        &[("A_ok.c", A_OK), ("B_nok.c", B_NOK), ("C_nok.c", C_NOK)],
    );

    let mut ids = Vec::new();
    for position in 1..=2 {
        let ctx = context(root.path(), BatchSpec::new(position, 2)?);
        let tests = BenchRunner::new(&ctx).list()?;
        ids.extend(tests.iter().map(|test| test.cache_id().to_string()));
    }
    assert_eq!(ids, vec!["A_ok_0", "A_ok_1", "B_nok_0", "B_nok_1", "C_nok_0"]);
    Ok(())
}

#[test]
fn header_error_aborts_before_running() -> Result<()> {
    test_init();
    let root = Utf8TempDir::new()?;
    write_corpus(
        root.path(),
        &[
            ("A_ok.c", A_OK),
            ("Broken_nok.c", "/* BEGIN_MBI_TESTS\n  $ sh -c 'true'\n  | ERROR: NotADetail\nEND_MBI_TESTS */\n"),
        ],
    );
    let ctx = context(root.path(), BatchSpec::ALL);
    let adapter = ScriptedAdapter::new();

    let err = BenchRunner::with_adapter(&ctx, &adapter)
        .run()
        .expect_err("header is malformed");
    match err {
        BenchRunError::Header(error) => {
            assert_eq!(error.path().file_name(), Some("Broken_nok.c"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Nothing ran.
    assert!(!ctx.ledger_path().exists());
    assert!(!ctx.cache_dir().join("A_ok_0.txt").exists());
    Ok(())
}
