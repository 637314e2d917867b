// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use mbi_runner::{
    cache::hash_source,
    errors::ExecuteError,
    runner::{LineAction, LineFilter},
};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

#[tokio::test]
async fn build_then_exec() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();

    let entry = fixture
        .execute(
            Some("echo building"),
            "sh -c 'echo out; echo err >&2; exit 3'",
            Duration::from_secs(30),
            None,
        )
        .await?;

    let log = entry.combined_log();
    ensure!(
        log.starts_with("Compiling t.c (batchinfo:1/1)\n\n$ echo building\nbuilding\n"),
        "unexpected log header:\n{log}"
    );
    ensure!(
        log.contains("Executing the command\n $ sh -c 'echo out; echo err >&2; exit 3'\n"),
        "exec header missing:\n{log}"
    );
    ensure!(log.contains("out\n") && log.contains("err\n"), "output missing:\n{log}");
    ensure!(
        log.contains("Command return code: 3, elapsed time: "),
        "status line missing:\n{log}"
    );
    assert!(!entry.timed_out());
    assert!(!entry.build_failed());

    // Every sidecar is on disk, and the hash matches the source.
    let sidecars = &fixture.sidecars;
    assert_eq!(std::fs::read_to_string(sidecars.log())?, log);
    assert_eq!(sidecars.read_elapsed(), Some(entry.elapsed_seconds()));
    assert_eq!(std::fs::read_to_string(sidecars.hash())?, hash_source(&fixture.source)?);
    assert_eq!(entry.content_hash(), hash_source(&fixture.source)?);
    assert!(!sidecars.timeout_marker().exists());
    Ok(())
}

#[tokio::test]
async fn no_build_command() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();

    let entry = fixture
        .execute(None, "echo hello", Duration::from_secs(30), None)
        .await?;
    let log = entry.combined_log();
    ensure!(
        log.starts_with("No need to compile t.c (batchinfo:1/1)\n"),
        "unexpected log header:\n{log}"
    );
    ensure!(log.contains("hello\nCommand return code: 0"), "output missing:\n{log}");
    Ok(())
}

#[tokio::test]
async fn runs_in_sidecar_dir() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();

    fixture
        .execute(None, "sh -c 'echo marker > here.txt'", Duration::from_secs(30), None)
        .await?;
    assert_eq!(
        std::fs::read_to_string(fixture.path().join("here.txt"))?,
        "marker\n"
    );
    Ok(())
}

#[tokio::test]
async fn slow_build_does_not_consume_timeout() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();

    let entry = fixture
        .execute(
            Some("sleep 2"),
            "sh -c 'echo finished'",
            Duration::from_secs(1),
            None,
        )
        .await?;
    let log = entry.combined_log();
    assert!(!entry.timed_out(), "exec timed out:\n{log}");
    ensure!(
        log.contains("finished\nCommand return code: 0"),
        "output missing:\n{log}"
    );
    assert!(!fixture.sidecars.timeout_marker().exists());
    // The recorded elapsed time still covers the build.
    ensure!(
        entry.elapsed_seconds() >= 2.0,
        "elapsed time {} excludes the build",
        entry.elapsed_seconds()
    );
    Ok(())
}

#[tokio::test]
async fn build_failure_skips_exec() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();

    let entry = fixture
        .execute(
            Some("echo broken; exit 2"),
            "sh -c 'echo should not run'",
            Duration::from_secs(30),
            None,
        )
        .await?;
    let log = entry.combined_log();
    ensure!(
        log.ends_with("broken\nCompilation of t.c raised an error (retcode: 2)"),
        "unexpected log:\n{log}"
    );
    ensure!(!log.contains("Executing the command"), "exec ran:\n{log}");
    assert!(entry.build_failed());
    // Build failures depend only on the source, so they are cached.
    assert!(fixture.sidecars.hash().exists());
    Ok(())
}

#[tokio::test]
async fn spawn_failure_is_not_cached() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();

    let err = fixture
        .execute(
            None,
            "mbi-definitely-not-a-command --flag",
            Duration::from_secs(30),
            None,
        )
        .await
        .expect_err("command does not exist");
    assert!(matches!(err, ExecuteError::Spawn { .. }), "{err:?}");

    let log = std::fs::read_to_string(fixture.sidecars.log())?;
    ensure!(
        log.contains("Command could not be started: "),
        "spawn failure not logged:\n{log}"
    );
    assert!(fixture.sidecars.elapsed().exists());
    assert!(!fixture.sidecars.hash().exists());
    Ok(())
}

#[tokio::test]
async fn unbalanced_quotes() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();

    let err = fixture
        .execute(None, "sh -c 'echo", Duration::from_secs(30), None)
        .await
        .expect_err("command does not split");
    assert!(matches!(err, ExecuteError::CommandParse { .. }), "{err:?}");
    assert!(!fixture.sidecars.hash().exists());
    Ok(())
}

#[tokio::test]
async fn timeout_reaps_process_tree() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();
    let timeout = Duration::from_secs(1);

    let start = Instant::now();
    let entry = fixture
        .execute(
            None,
            "sh -c 'sleep 30 & echo $! > grandchild.pid; echo started; wait'",
            timeout,
            None,
        )
        .await?;
    let elapsed = start.elapsed();

    ensure!(
        elapsed < timeout + Duration::from_secs(5),
        "took {elapsed:?} with a timeout of {timeout:?}"
    );
    assert!(entry.timed_out());
    assert!(entry.elapsed_seconds() >= timeout.as_secs_f64());

    let marker = std::fs::read_to_string(fixture.sidecars.timeout_marker())?;
    ensure!(marker.ends_with(" seconds"), "unexpected marker: {marker}");

    let log = entry.combined_log();
    ensure!(log.contains("started\n"), "output missing:\n{log}");
    ensure!(
        log.contains("Command killed by signal "),
        "status line missing:\n{log}"
    );
    // A timed-out run is still complete.
    assert!(fixture.sidecars.hash().exists());

    #[cfg(target_os = "linux")]
    {
        let pid: u32 = std::fs::read_to_string(fixture.path().join("grandchild.pid"))?
            .trim()
            .parse()?;
        ensure!(is_dead(pid), "grandchild {pid} survived the timeout");
    }
    Ok(())
}

#[tokio::test]
async fn line_filter_terminates_early() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();

    let mut seen = Vec::new();
    let mut filter = |line: &str| {
        seen.push(line.to_owned());
        if line.contains("detected a deadlock") {
            LineAction::Terminate
        } else {
            LineAction::Continue
        }
    };

    let start = Instant::now();
    let entry = fixture
        .execute(
            None,
            "sh -c 'echo first; echo \"ERROR: MUST detected a deadlock\"; sleep 30'",
            Duration::from_secs(60),
            Some(&mut filter as &mut dyn LineFilter),
        )
        .await?;

    ensure!(
        start.elapsed() < Duration::from_secs(10),
        "filter did not terminate the run"
    );
    assert!(!entry.timed_out());
    assert!(!fixture.sidecars.timeout_marker().exists());
    assert_eq!(
        seen,
        vec!["first".to_owned(), "ERROR: MUST detected a deadlock".to_owned()]
    );
    Ok(())
}
