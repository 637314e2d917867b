// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use mbi_runner::{
    cache::{CacheEntry, CacheId, Sidecars},
    errors::ExecuteError,
    partition::BatchSpec,
    runner::{CommandEnv, ExecRequest, LineFilter, ProcessRunner, RunnerSettings},
};
use std::{sync::Once, time::Duration};

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        color_eyre::install().expect("color-eyre installed once");
    });
}

/// Timing parameters that keep the tests fast.
pub(crate) fn fast_settings() -> RunnerSettings {
    RunnerSettings {
        grace_period: Duration::from_millis(100),
        poll_interval: Duration::from_millis(5),
        drain_timeout: Duration::from_millis(500),
    }
}

/// A scratch directory holding one source file, whose sidecars live next to it.
pub(crate) struct RunFixture {
    pub(crate) dir: Utf8TempDir,
    pub(crate) source: Utf8PathBuf,
    pub(crate) sidecars: Sidecars,
    pub(crate) env: CommandEnv,
}

impl RunFixture {
    pub(crate) fn new() -> Self {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let source = dir.path().join("t.c");
        std::fs::write(&source, "int main() { return 0; }\n").expect("wrote source");
        let sidecars = Sidecars::new(dir.path(), CacheId::new("t", 0));
        Self {
            dir,
            source,
            sidecars,
            env: CommandEnv::new(),
        }
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(crate) async fn execute(
        &self,
        build_command: Option<&str>,
        exec_command: &str,
        timeout: Duration,
        filter: Option<&mut dyn LineFilter>,
    ) -> Result<CacheEntry, ExecuteError> {
        let req = ExecRequest {
            build_command,
            exec_command,
            sidecars: &self.sidecars,
            source_path: &self.source,
            binary: "t",
            timeout,
            batch: BatchSpec::ALL,
            env: &self.env,
        };
        ProcessRunner::new(fast_settings()).execute(&req, filter).await
    }
}

/// Returns true if `pid` is gone or a zombie.
#[cfg(target_os = "linux")]
pub(crate) fn is_dead(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state follows the parenthesized command name.
        Ok(stat) => stat
            .rsplit_once(") ")
            .is_some_and(|(_, rest)| rest.starts_with('Z') || rest.starts_with('X')),
        Err(_) => true,
    }
}
