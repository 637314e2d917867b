// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orchestration of a benchmark run.
//!
//! The main structure in this module is [`BenchRunner`].

use crate::{
    adapter::{self, ToolAdapter},
    annotation::{self, TestCase},
    config::RunContext,
    corpus,
    errors::{BenchRunError, DisplayErrorChain},
    helpers::plural,
    ledger::{LedgerRecord, LedgerWriter},
    outcome::{Classification, ClassificationMemo, RawOutcome, categorize},
    partition::BatchSpec,
    runner::ProcessRunner,
    summary::RunSummary,
};
use camino::Utf8Path;
use std::time::Duration;

/// How long past its timeout a test may run before the orchestrator abandons it.
pub const DEFAULT_DEADLINE_MARGIN: Duration = Duration::from_secs(60);

/// The result of one test execution.
#[derive(Clone, Debug)]
pub struct TestResult {
    /// The test case.
    pub test: TestCase,
    /// The classification of the execution.
    pub classification: Classification,
    /// True if the result was read from the cache.
    pub cached: bool,
}

/// The results of a benchmark run.
#[derive(Clone, Debug)]
pub struct BenchReport {
    /// Every execution, in corpus order.
    pub results: Vec<TestResult>,
    /// The aggregate statistics.
    pub summary: RunSummary,
}

/// Runs the test cases of one batch through one tool.
#[derive(Debug)]
pub struct BenchRunner<'a> {
    ctx: &'a RunContext,
    adapter: &'a dyn ToolAdapter,
    runner: ProcessRunner,
    deadline_margin: Duration,
}

impl<'a> BenchRunner<'a> {
    /// Creates a runner using the built-in adapter of the context's tool.
    pub fn new(ctx: &'a RunContext) -> Self {
        Self::with_adapter(ctx, ctx.tool().adapter())
    }

    /// Creates a runner using a specific adapter.
    pub fn with_adapter(ctx: &'a RunContext, adapter: &'a dyn ToolAdapter) -> Self {
        Self {
            ctx,
            adapter,
            runner: ProcessRunner::new(*ctx.runner_settings()),
            deadline_margin: DEFAULT_DEADLINE_MARGIN,
        }
    }

    /// Sets how long past its timeout a test may run before it is abandoned.
    pub fn set_deadline_margin(&mut self, margin: Duration) -> &mut Self {
        self.deadline_margin = margin;
        self
    }

    /// Returns the test cases of this batch, in corpus order.
    pub fn list(&self) -> Result<Vec<TestCase>, BenchRunError> {
        list_tests(self.ctx.codes_dir(), self.ctx.batch())
    }

    /// Runs every test case of this batch on a new async runtime.
    pub fn run(&self) -> Result<BenchReport, BenchRunError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(BenchRunError::Runtime)?;
        runtime.block_on(self.run_async())
    }

    /// Runs every test case of this batch.
    pub async fn run_async(&self) -> Result<BenchReport, BenchRunError> {
        let tests = self.list()?;

        let cache_dir = self.ctx.cache_dir();
        std::fs::create_dir_all(cache_dir).map_err(|err| BenchRunError::LogsDirCreate {
            dir: cache_dir.to_owned(),
            err,
        })?;
        let mut ledger = LedgerWriter::open(self.ctx.ledger_path())?;
        self.adapter.setup(self.ctx)?;

        tracing::info!(
            "running {} {} with {} (batch {}, timeout {:?})",
            tests.len(),
            plural::tests_str(tests.len()),
            self.adapter.id(),
            self.ctx.batch(),
            self.ctx.timeout(),
        );

        let mut report = BenchReport {
            results: Vec::with_capacity(tests.len()),
            summary: RunSummary::new(),
        };
        // Classifications are memoized for the duration of one run.
        let mut memo = ClassificationMemo::new();
        let res = self
            .run_tests(&tests, &mut ledger, &mut memo, &mut report)
            .await;
        self.adapter.teardown(self.ctx);
        res?;

        Ok(report)
    }

    async fn run_tests(
        &self,
        tests: &[TestCase],
        ledger: &mut LedgerWriter,
        memo: &mut ClassificationMemo,
        report: &mut BenchReport,
    ) -> Result<(), BenchRunError> {
        let tool = self.adapter.id();
        for (n, test) in tests.iter().enumerate() {
            let (raw, elapsed_seconds, cached) = self.execute_one(test).await;

            let id = test.cache_id();
            let classification = memo
                .get_or_insert_with(tool, &id, || {
                    categorize(raw.clone(), test.expected(), elapsed_seconds)
                })
                .clone();

            tracing::info!(
                "[{}/{}] {id}: {} ({}{})",
                n + 1,
                tests.len(),
                classification.category,
                classification.diagnostic,
                if cached { ", cached" } else { "" },
            );

            let record = LedgerRecord::new(test, tool, self.ctx.timeout(), raw, elapsed_seconds);
            ledger.append(&record)?;
            report.summary.add(&record);
            report.results.push(TestResult {
                test: test.clone(),
                classification,
                cached,
            });
        }
        Ok(())
    }

    /// Returns the raw outcome, the elapsed time and whether the cache was hit.
    async fn execute_one(&self, test: &TestCase) -> (RawOutcome, Option<f64>, bool) {
        let cache = self.ctx.cache();
        let id = test.cache_id();
        let sidecars = cache.sidecars(&id);

        if let Some(entry) = cache.load(&id, test.source_file()) {
            tracing::debug!("{id}: cache hit (hash {})", entry.content_hash());
            return (
                self.adapter.parse(&sidecars),
                Some(entry.elapsed_seconds()),
                true,
            );
        }

        if let Err(error) = cache.invalidate(&id) {
            tracing::warn!("{id}: {}", DisplayErrorChain::new(&error));
            return (RawOutcome::Failure, None, false);
        }

        let deadline = self.ctx.timeout() + self.deadline_margin;
        let run = adapter::run(self.adapter, &self.runner, self.ctx, test);
        match tokio::time::timeout(deadline, run).await {
            Ok(Ok(entry)) => (
                self.adapter.parse(&sidecars),
                Some(entry.elapsed_seconds()),
                false,
            ),
            Ok(Err(error)) => {
                tracing::warn!("{id}: {}", DisplayErrorChain::new(&error));
                (RawOutcome::Failure, sidecars.read_elapsed(), false)
            }
            Err(_) => {
                // Dropping the run killed its process tree.
                tracing::warn!("{id}: abandoned after {deadline:?}");
                (RawOutcome::Timeout, None, false)
            }
        }
    }
}

/// Returns the test cases of batch `batch` of the corpus in `codes_dir`, in corpus order.
///
/// Every selected source file is parsed before anything runs: a malformed header aborts the whole
/// batch.
pub fn list_tests(codes_dir: &Utf8Path, batch: BatchSpec) -> Result<Vec<TestCase>, BenchRunError> {
    let sources = corpus::list_sources(codes_dir)?;
    let range = batch.range_for(sources.len());
    tracing::debug!(
        "batch {batch} selects {} of {} {} ({:?})",
        range.len(),
        sources.len(),
        plural::files_str(sources.len()),
        range.as_range(),
    );

    let mut tests = Vec::new();
    for source in range.select(&sources) {
        tests.extend(annotation::parse_file(source)?);
    }
    Ok(tests)
}
