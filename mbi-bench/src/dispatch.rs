// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line parsing and routing.

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, OutputWriter},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use itertools::Itertools;
use mbi_runner::{
    adapter::ToolId,
    annotation::TestCase,
    bench::{BenchRunner, list_tests},
    config::MbiConfig,
    exit_codes::MbiExitCode,
    ledger::{find_ledgers, merge, read_ledger},
    partition::BatchSpec,
    summary::RunSummary,
};
use owo_colors::{OwoColorize, Style};
use std::{io::Write, time::Duration};
use swrite::{SWrite, swrite};

/// Runs MPI verification tools against annotated test codes and scores their verdicts.
#[derive(Debug, Parser)]
#[command(
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct MbiBenchApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl MbiBenchApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(output, output_writer),
            Command::List(opts) => opts.exec(output, output_writer),
            Command::Stats(opts) => opts.exec(output, output_writer),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one tool over a batch of the corpus
    ///
    /// Results are appended to `<logs-dir>/bench_<tool>.csv`, and a summary is printed to stdout.
    /// Test cases whose cached results are still valid are not run again.
    Run(RunOpts),

    /// List the test cases of a batch without running them
    List(ListOpts),

    /// Summarize one or more result ledgers
    Stats(StatsOpts),
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Config options")]
struct ConfigOpts {
    /// Directory that relative paths are resolved against [default: current directory]
    #[arg(long, value_name = "DIR", env = "MBI_ROOT")]
    root: Option<Utf8PathBuf>,

    /// Config file [default: <root>/.config/mbi.toml, if present]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Directory holding the annotated test codes
    #[arg(long, value_name = "DIR")]
    codes_dir: Option<Utf8PathBuf>,

    /// Directory holding per-tool caches and ledgers
    #[arg(long, value_name = "DIR")]
    logs_dir: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn load(&self) -> Result<MbiConfig> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => current_dir()?,
        };
        let mut config = MbiConfig::from_sources(root, self.config_file.as_deref())?;
        if let Some(dir) = &self.codes_dir {
            config = config.with_codes_dir(dir);
        }
        if let Some(dir) = &self.logs_dir {
            config = config.with_logs_dir(dir);
        }
        Ok(config)
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|err| ExpectedError::CurrentDir { err })?;
    Utf8PathBuf::try_from(dir).map_err(|err| ExpectedError::CurrentDirInvalidUtf8 { err })
}

#[derive(Debug, Args)]
struct RunOpts {
    /// The tool to run
    #[arg(value_name = "TOOL")]
    tool: ToolId,

    #[clap(flatten)]
    config: ConfigOpts,

    /// Batch of the corpus to run, as N/M
    #[arg(long, value_name = "N/M", help_heading = "Run options")]
    batch: Option<BatchSpec>,

    /// Time budget of each test case, such as 60s or 5m
    #[arg(
        long,
        value_name = "DURATION",
        value_parser = humantime::parse_duration,
        help_heading = "Run options"
    )]
    timeout: Option<Duration>,

    /// Base directory of tool installations
    #[arg(long, value_name = "DIR", help_heading = "Run options")]
    tools_root: Option<Utf8PathBuf>,

    /// Print the summary as JSON
    #[arg(long, help_heading = "Output options")]
    json: bool,
}

impl RunOpts {
    fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let mut config = self.config.load()?;
        if let Some(batch) = self.batch {
            config = config.with_batch(batch);
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        if let Some(dir) = &self.tools_root {
            config = config.with_tools_root(dir);
        }
        let ctx = config.into_run_context(self.tool);

        let report = BenchRunner::new(&ctx).run()?;
        tracing::info!("results appended to `{}`", ctx.ledger_path());

        write_summary(&report.summary, self.json, output, output_writer)?;
        Ok(MbiExitCode::OK)
    }
}

#[derive(Debug, Args)]
struct ListOpts {
    /// Show each command as this tool would run it
    #[arg(value_name = "TOOL")]
    tool: Option<ToolId>,

    #[clap(flatten)]
    config: ConfigOpts,

    /// Batch of the corpus to list, as N/M
    #[arg(long, value_name = "N/M")]
    batch: Option<BatchSpec>,
}

impl ListOpts {
    fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let config = self.config.load()?;
        let batch = self.batch.unwrap_or(config.batch());
        let tests = list_tests(config.codes_dir(), batch)?;

        let mut styles = ListStyles::default();
        if output.colorize_stdout() {
            styles.colorize();
        }
        let adapter = self.tool.map(|tool| tool.adapter());

        let mut out = String::new();
        for test in &tests {
            let command = match adapter {
                Some(adapter) => adapter.exec_command(test),
                None => test.command().to_owned(),
            };
            swrite!(
                out,
                "{}  {}  {command}",
                test.cache_id().style(styles.id),
                test.expected().style(styles.expected),
            );
            if output.verbose {
                swrite!(out, "  ({})", describe_source(test));
            }
            out.push('\n');
        }

        let mut writer = output_writer.stdout_writer();
        writer
            .write_all(out.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(ExpectedError::write_output_error)?;
        tracing::info!(
            "{} test {} in batch {batch}",
            tests.len(),
            if tests.len() == 1 { "case" } else { "cases" },
        );
        Ok(MbiExitCode::OK)
    }
}

fn describe_source(test: &TestCase) -> String {
    let mut parts = vec![test.source_file().to_string()];
    if let Some(count) = test.process_count() {
        parts.push(format!("np={count}"));
    }
    parts.push(format!("buffer={}", test.buffer_mode()));
    parts.into_iter().join(", ")
}

#[derive(Debug, Default)]
struct ListStyles {
    id: Style,
    expected: Style,
}

impl ListStyles {
    fn colorize(&mut self) {
        self.id = Style::new().bold();
        self.expected = Style::new().magenta();
    }
}

#[derive(Debug, Args)]
struct StatsOpts {
    /// Ledger files to summarize [default: every ledger in the logs directory]
    #[arg(value_name = "LEDGER")]
    ledgers: Vec<Utf8PathBuf>,

    #[clap(flatten)]
    config: ConfigOpts,

    /// Print the summary as JSON
    #[arg(long, help_heading = "Output options")]
    json: bool,
}

impl StatsOpts {
    fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let ledgers = if self.ledgers.is_empty() {
            let config = self.config.load()?;
            let ledgers = if config.logs_dir().is_dir() {
                find_ledgers(config.logs_dir()).map_err(ExpectedError::ledger_read_error)?
            } else {
                Vec::new()
            };
            if ledgers.is_empty() {
                return Err(ExpectedError::NoLedgers {
                    logs_dir: config.logs_dir().to_owned(),
                });
            }
            ledgers
        } else {
            self.ledgers
        };

        let summary = summarize_ledgers(&ledgers)?;
        write_summary(&summary, self.json, output, output_writer)?;
        Ok(MbiExitCode::OK)
    }
}

/// Reads and merges `ledgers`, keeping the last record of each test case.
fn summarize_ledgers(ledgers: &[Utf8PathBuf]) -> Result<RunSummary> {
    let mut records = Vec::new();
    for ledger in ledgers {
        let ledger_records = read_ledger(ledger).map_err(ExpectedError::ledger_read_error)?;
        tracing::debug!("read {} records from `{ledger}`", ledger_records.len());
        records.extend(ledger_records);
    }
    let records = merge(records);
    Ok(RunSummary::from_records(&records))
}

fn write_summary(
    summary: &RunSummary,
    json: bool,
    output: OutputContext,
    output_writer: &mut OutputWriter,
) -> Result<()> {
    let mut writer = output_writer.stdout_writer();
    let res = if json {
        summary.write_json(&mut writer)
    } else {
        summary.write_human(&mut writer, output.colorize_stdout())
    };
    res.and_then(|()| writer.flush())
        .map_err(ExpectedError::write_output_error)
}
