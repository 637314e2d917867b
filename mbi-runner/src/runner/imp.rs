// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::os::{self, ProcessHandle};
use crate::{
    cache::{
        BUILD_FAILURE_MARKER, CacheEntry, SPAWN_FAILURE_MARKER, Sidecars, hash_source,
        write_sidecar,
    },
    errors::{ExecuteError, SidecarError, SidecarOp},
    helpers,
    partition::BatchSpec,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    collections::BTreeMap,
    io,
    process::{ExitStatus, Output, Stdio},
    time::{Duration, Instant},
};
use swrite::{SWrite, swrite};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
    time::MissedTickBehavior,
};

/// The size of the buffered reader over child output.
const CHUNK_SIZE: usize = 4 * 1024;

/// Timing parameters of a [`ProcessRunner`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunnerSettings {
    /// Time between `SIGTERM` and `SIGKILL` when tearing down a process tree.
    pub grace_period: Duration,

    /// How often the timeout is checked while the child is silent.
    pub poll_interval: Duration,

    /// How long to keep reading output after the process tree has been torn down.
    pub drain_timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            drain_timeout: Duration::from_secs(1),
        }
    }
}

/// Environment for build and exec commands.
///
/// `LC_ALL=C` is always set, so that tool messages are not translated.
#[derive(Clone, Debug, Default)]
pub struct CommandEnv {
    vars: BTreeMap<String, String>,
    path_prepend: Vec<Utf8PathBuf>,
}

impl CommandEnv {
    /// Creates an environment that only sets `LC_ALL=C`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an environment variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Adds a directory in front of `PATH`. Directories added later come first.
    pub fn prepend_path(&mut self, dir: impl Into<Utf8PathBuf>) -> &mut Self {
        self.path_prepend.insert(0, dir.into());
        self
    }

    /// Returns the variables set, excluding `LC_ALL` and `PATH`.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn apply(&self, cmd: &mut std::process::Command) {
        cmd.envs(&self.vars).env("LC_ALL", "C");
        if let Some(path) = helpers::prepend_path(&self.path_prepend) {
            cmd.env("PATH", path);
        }
    }

    fn apply_expression(&self, mut expr: duct::Expression) -> duct::Expression {
        for (name, value) in &self.vars {
            expr = expr.env(name, value);
        }
        expr = expr.env("LC_ALL", "C");
        if let Some(path) = helpers::prepend_path(&self.path_prepend) {
            expr = expr.env("PATH", path);
        }
        expr
    }
}

/// What a line filter wants to happen after seeing a line of child output.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineAction {
    /// Keep going.
    Continue,

    /// Ask the process tree to terminate. The runner still waits for it to exit.
    Terminate,
}

/// Sees every line of child output as soon as it is read.
pub trait LineFilter {
    /// Called with each line, without its trailing newline.
    fn on_line(&mut self, line: &str) -> LineAction;
}

impl<F: FnMut(&str) -> LineAction> LineFilter for F {
    fn on_line(&mut self, line: &str) -> LineAction {
        self(line)
    }
}

/// One build and exec command pair to run.
#[derive(Clone, Debug)]
pub struct ExecRequest<'a> {
    /// The shell line that builds the test, if any. Not subject to the timeout.
    pub build_command: Option<&'a str>,

    /// The command to execute. Split into words, never passed to a shell.
    pub exec_command: &'a str,

    /// Where to write artifacts. Commands run in the sidecar directory.
    pub sidecars: &'a Sidecars,

    /// The source file, hashed once the artifacts are written.
    pub source_path: &'a Utf8Path,

    /// The name of the built binary, used in the log header.
    pub binary: &'a str,

    /// The wall-clock budget of the exec command.
    pub timeout: Duration,

    /// The batch this run belongs to, used in the log header.
    pub batch: BatchSpec,

    /// The environment of both commands.
    pub env: &'a CommandEnv,
}

/// Executes build and exec commands under a time budget, and persists what they produced.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    settings: RunnerSettings,
}

impl ProcessRunner {
    /// Creates a new runner.
    pub fn new(settings: RunnerSettings) -> Self {
        Self { settings }
    }

    /// Returns the timing parameters of this runner.
    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Runs `req` to completion and writes its sidecars.
    ///
    /// The log and elapsed time are written before the source hash, so an interrupted run is
    /// never mistaken for a complete one. A timeout is not an error: the returned entry has
    /// [`CacheEntry::timed_out`] set.
    ///
    /// If the exec command cannot be started, the log and elapsed time are still written (but no
    /// hash) and an error is returned.
    pub async fn execute(
        &self,
        req: &ExecRequest<'_>,
        filter: Option<&mut dyn LineFilter>,
    ) -> Result<CacheEntry, ExecuteError> {
        let start = Instant::now();
        let mut log = String::new();

        match req.build_command {
            None => {
                swrite!(
                    log,
                    "No need to compile {}.c (batchinfo:{})\n\n",
                    req.binary,
                    req.batch
                );
            }
            Some(build_command) => {
                swrite!(
                    log,
                    "Compiling {}.c (batchinfo:{})\n\n$ {build_command}\n",
                    req.binary,
                    req.batch
                );
                echo(&log);

                let output = match self.run_build(build_command, req).await {
                    Ok(output) => output,
                    Err(err) => {
                        let message = err.to_string();
                        return Err(self.fail_to_start(
                            req,
                            log,
                            start,
                            &message,
                            ExecuteError::Spawn {
                                command: build_command.to_owned(),
                                err,
                            },
                        ));
                    }
                };

                let build_log = String::from_utf8_lossy(&output.stdout);
                echo(&build_log);
                log.push_str(&build_log);

                if !output.status.success() {
                    let rc = helpers::return_code(output.status)
                        .map_or_else(|| "unknown".to_owned(), |rc| rc.to_string());
                    swrite!(
                        log,
                        "Compilation of {}.c {BUILD_FAILURE_MARKER}{rc})",
                        req.binary
                    );
                    tracing::debug!("build of {}.c failed (retcode: {rc})", req.binary);
                    return self.persist(req, log, start.elapsed().as_secs_f64(), false);
                }
            }
        }

        let header_start = log.len();
        swrite!(log, "\n\nExecuting the command\n $ {}\n", req.exec_command);
        echo(&log[header_start..]);

        let (mut child, mut acc) = match spawn_exec(req) {
            Ok(spawned) => spawned,
            Err(SpawnError { message, err }) => {
                return Err(self.fail_to_start(req, log, start, &message, err));
            }
        };
        // The budget covers the exec command only; the build above is not timed.
        let exec_start = Instant::now();
        let handle = ProcessHandle::from_child(&child);
        // Kills the tree if this future is dropped before teardown.
        let mut guard = TreeGuard(handle);
        tracing::debug!(
            "started `{}` (process group {:?}), waiting up to {:?}",
            req.exec_command,
            handle.map(|h| h.id()),
            req.timeout,
        );

        let mut sink = OutputSink {
            log,
            filter,
            handle,
            terminate_requested: false,
        };

        let mut tick = tokio::time::interval(self.settings.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut status: Option<ExitStatus> = None;
        let mut timed_out = false;

        loop {
            tokio::select! {
                () = acc.fill_buf(), if !acc.is_done() => {
                    if let Some(lines) = acc.take_lines() {
                        sink.push(&lines);
                    }
                }
                res = child.wait() => {
                    match res {
                        Ok(exit_status) => status = Some(exit_status),
                        Err(error) => {
                            tracing::warn!("failed to wait for `{}`: {error}", req.exec_command);
                        }
                    }
                    break;
                }
                _ = tick.tick() => {
                    let elapsed = exec_start.elapsed();
                    if elapsed > req.timeout {
                        timed_out = true;
                        tracing::debug!(
                            "`{}` timed out after {:.3}s",
                            req.exec_command,
                            elapsed.as_secs_f64(),
                        );
                        write_sidecar(
                            &req.sidecars.timeout_marker(),
                            format!("{} seconds", elapsed.as_secs_f64()).as_bytes(),
                        )?;
                        break;
                    }
                }
            }
        }

        // Whatever the exit path, nothing the child started may survive it.
        if let Some(handle) = handle {
            handle.terminate_tree(self.settings.grace_period).await;
        }
        guard.disarm();
        // The direct child may have left its process group.
        let _ = child.start_kill();
        if status.is_none() {
            status = child.wait().await.ok();
        }

        let drain = async {
            while !acc.is_done() {
                acc.fill_buf().await;
                if let Some(lines) = acc.take_lines() {
                    sink.push(&lines);
                }
            }
        };
        if tokio::time::timeout(self.settings.drain_timeout, drain)
            .await
            .is_err()
        {
            tracing::debug!(
                "output of `{}` still open after {:?}, giving up",
                req.exec_command,
                self.settings.drain_timeout,
            );
        }
        if let Some(rest) = acc.take_rest() {
            sink.push(&rest);
        }

        let elapsed = start.elapsed().as_secs_f64();
        let status_line = helpers::status_line(status, elapsed);
        tracing::debug!("{}", status_line.trim_end());
        let mut log = sink.log;
        if !log.ends_with('\n') {
            log.push('\n');
        }
        log.push_str(&status_line);

        self.persist(req, log, elapsed, timed_out)
    }

    async fn run_build(&self, build_command: &str, req: &ExecRequest<'_>) -> io::Result<Output> {
        let expr = req
            .env
            .apply_expression(duct::cmd!("sh", "-c", build_command))
            .dir(req.sidecars.dir().as_std_path())
            .stdin_null()
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked();
        tokio::task::spawn_blocking(move || expr.run())
            .await
            .map_err(io::Error::other)?
    }

    fn fail_to_start(
        &self,
        req: &ExecRequest<'_>,
        mut log: String,
        start: Instant,
        message: &str,
        err: ExecuteError,
    ) -> ExecuteError {
        swrite!(log, "{SPAWN_FAILURE_MARKER}{message}\n");
        tracing::debug!("{SPAWN_FAILURE_MARKER}{message}");
        let elapsed = start.elapsed().as_secs_f64();
        // No hash: the next run retries.
        let written = write_sidecar(&req.sidecars.log(), log.as_bytes()).and_then(|()| {
            write_sidecar(&req.sidecars.elapsed(), elapsed.to_string().as_bytes())
        });
        match written {
            Ok(()) => err,
            Err(sidecar_err) => sidecar_err.into(),
        }
    }

    fn persist(
        &self,
        req: &ExecRequest<'_>,
        log: String,
        elapsed_seconds: f64,
        timed_out: bool,
    ) -> Result<CacheEntry, ExecuteError> {
        write_sidecar(&req.sidecars.log(), log.as_bytes())?;
        write_sidecar(&req.sidecars.elapsed(), elapsed_seconds.to_string().as_bytes())?;
        let content_hash = hash_source(req.source_path)
            .map_err(|err| SidecarError::new(SidecarOp::Read, req.source_path, err))?;
        write_sidecar(&req.sidecars.hash(), content_hash.as_bytes())?;

        Ok(CacheEntry {
            content_hash,
            combined_log: log,
            elapsed_seconds,
            timed_out,
        })
    }
}

struct SpawnError {
    message: String,
    err: ExecuteError,
}

fn spawn_exec(req: &ExecRequest<'_>) -> Result<(tokio::process::Child, OutputReader), SpawnError> {
    let argv = shell_words::split(req.exec_command).map_err(|err| SpawnError {
        message: err.to_string(),
        err: ExecuteError::CommandParse {
            command: req.exec_command.to_owned(),
            err,
        },
    })?;
    let Some((program, args)) = argv.split_first() else {
        return Err(SpawnError {
            message: "command is empty".to_owned(),
            err: ExecuteError::EmptyCommand,
        });
    };

    let spawn_err = |err: io::Error| SpawnError {
        message: err.to_string(),
        err: ExecuteError::Spawn {
            command: req.exec_command.to_owned(),
            err,
        },
    };

    let mut cmd = std::process::Command::new(program);
    cmd.args(args)
        .current_dir(req.sidecars.dir())
        .stdin(Stdio::null());
    req.env.apply(&mut cmd);
    os::set_process_group(&mut cmd);

    // stdout and stderr share one pipe, so the log interleaves them as the tool wrote them.
    let (reader, writer) = io::pipe().map_err(spawn_err)?;
    let writer_clone = writer.try_clone().map_err(spawn_err)?;
    cmd.stdout(writer_clone).stderr(writer);

    let mut cmd: tokio::process::Command = cmd.into();
    cmd.kill_on_drop(true);
    let child = cmd.spawn().map_err(spawn_err)?;
    // Drop our copies of the write end, otherwise the reader never sees EOF.
    drop(cmd);

    let file = File::from_std(os::pipe_reader_to_file(reader));
    Ok((child, OutputReader::new(file)))
}

struct TreeGuard(Option<ProcessHandle>);

impl TreeGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for TreeGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            tracing::debug!("execution abandoned, killing process tree {}", handle.id());
            if let Err(error) = handle.kill_tree() {
                tracing::debug!("failed to kill process tree {}: {error}", handle.id());
            }
        }
    }
}

/// A reader over child output that tracks whether EOF was reached.
struct OutputReader {
    reader: BufReader<File>,
    pending: Vec<u8>,
    done: bool,
}

impl OutputReader {
    fn new(file: File) -> Self {
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, file),
            pending: Vec::with_capacity(CHUNK_SIZE),
            done: false,
        }
    }

    // Cancel-safe: `fill_buf` is, and nothing else is awaited.
    async fn fill_buf(&mut self) {
        if self.done {
            return;
        }
        match self.reader.fill_buf().await {
            Ok(buf) => {
                if buf.is_empty() {
                    self.done = true;
                }
                self.pending.extend_from_slice(buf);
                let len = buf.len();
                self.reader.consume(len);
            }
            Err(error) => {
                tracing::warn!("failed to read child output: {error}");
                self.done = true;
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn take_lines(&mut self) -> Option<String> {
        split_complete_lines(&mut self.pending)
    }

    fn take_rest(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Removes and returns every complete line at the front of `pending`.
///
/// Splitting at a newline never cuts a UTF-8 sequence in half, so lossy conversion of the
/// returned part is exact for valid input.
fn split_complete_lines(pending: &mut Vec<u8>) -> Option<String> {
    let last_newline = pending.iter().rposition(|&b| b == b'\n')?;
    let rest = pending.split_off(last_newline + 1);
    let lines = std::mem::replace(pending, rest);
    Some(String::from_utf8_lossy(&lines).into_owned())
}

struct OutputSink<'f> {
    log: String,
    filter: Option<&'f mut dyn LineFilter>,
    handle: Option<ProcessHandle>,
    terminate_requested: bool,
}

impl OutputSink<'_> {
    fn push(&mut self, text: &str) {
        self.log.push_str(text);
        for line in text.lines() {
            tracing::debug!(target: "mbi_runner::output", "| {line}");
            let Some(filter) = self.filter.as_deref_mut() else {
                continue;
            };
            if filter.on_line(line) == LineAction::Terminate && !self.terminate_requested {
                self.terminate_requested = true;
                tracing::debug!("line filter requested termination after: {line}");
                if let Some(handle) = self.handle
                    && let Err(error) = handle.signal_terminate()
                {
                    tracing::debug!("failed to terminate process tree: {error}");
                }
            }
        }
    }
}

fn echo(text: &str) {
    for line in text.lines() {
        tracing::debug!(target: "mbi_runner::output", "| {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn split_keeps_partial_line() {
        let mut pending = b"first\nsecond\nthi".to_vec();
        assert_eq!(
            split_complete_lines(&mut pending).as_deref(),
            Some("first\nsecond\n")
        );
        assert_eq!(pending, b"thi");
        assert_eq!(split_complete_lines(&mut pending), None);

        pending.extend_from_slice(b"rd\n");
        assert_eq!(split_complete_lines(&mut pending).as_deref(), Some("third\n"));
        assert!(pending.is_empty());
    }

    #[test]
    fn split_replaces_invalid_utf8() {
        let mut pending = b"bad \xff byte\n".to_vec();
        assert_eq!(
            split_complete_lines(&mut pending).as_deref(),
            Some("bad \u{fffd} byte\n")
        );
    }

    #[test]
    fn env_prepends_in_reverse_order() {
        let mut env = CommandEnv::new();
        env.prepend_path("/first").prepend_path("/second").set("VERBOSE", "1");
        assert_eq!(
            env.path_prepend,
            vec![Utf8PathBuf::from("/second"), Utf8PathBuf::from("/first")]
        );
        assert_eq!(env.vars().collect::<Vec<_>>(), vec![("VERBOSE", "1")]);
    }
}
