// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use mbi_runner::cache::{CacheEntry, ExecutionCache};
use pretty_assertions::assert_eq;
use std::time::Duration;

// Appends a line to `runs.txt` every time the child actually runs.
const COUNTING_COMMAND: &str = "sh -c 'echo run >> runs.txt; echo hello'";

async fn run_cached(fixture: &RunFixture, cache: &ExecutionCache) -> Result<CacheEntry> {
    let id = fixture.sidecars.id();
    if let Some(entry) = cache.load(id, &fixture.source) {
        return Ok(entry);
    }
    cache.invalidate(id)?;
    Ok(fixture
        .execute(
            Some("true"),
            COUNTING_COMMAND,
            Duration::from_secs(30),
            None,
        )
        .await?)
}

fn run_count(fixture: &RunFixture) -> usize {
    std::fs::read_to_string(fixture.path().join("runs.txt"))
        .map(|runs| runs.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn rerun_is_idempotent() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();
    let cache = ExecutionCache::new(fixture.path());

    assert!(!cache.is_valid(fixture.sidecars.id(), &fixture.source));
    let first = run_cached(&fixture, &cache).await?;
    assert!(cache.is_valid(fixture.sidecars.id(), &fixture.source));
    let second = run_cached(&fixture, &cache).await?;

    assert_eq!(run_count(&fixture), 1, "child ran once");
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn source_edit_invalidates() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();
    let cache = ExecutionCache::new(fixture.path());

    let first = run_cached(&fixture, &cache).await?;

    // Change a single byte.
    let mut bytes = std::fs::read(&fixture.source)?;
    bytes[0] = b'I';
    std::fs::write(&fixture.source, bytes)?;
    assert!(!cache.is_valid(fixture.sidecars.id(), &fixture.source));

    let second = run_cached(&fixture, &cache).await?;
    assert_eq!(run_count(&fixture), 2, "child ran again");
    assert_ne!(first.content_hash(), second.content_hash());
    assert_eq!(
        std::fs::read_to_string(fixture.sidecars.hash())?,
        second.content_hash()
    );
    Ok(())
}

#[tokio::test]
async fn incomplete_entry_is_rerun() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();
    let cache = ExecutionCache::new(fixture.path());

    run_cached(&fixture, &cache).await?;
    // Simulate a crash between the elapsed and hash writes.
    std::fs::remove_file(fixture.sidecars.hash())?;
    assert!(!cache.is_valid(fixture.sidecars.id(), &fixture.source));

    run_cached(&fixture, &cache).await?;
    assert_eq!(run_count(&fixture), 2);
    assert!(cache.is_valid(fixture.sidecars.id(), &fixture.source));
    Ok(())
}

#[tokio::test]
async fn stale_timeout_marker_is_removed() -> Result<()> {
    test_init();
    let fixture = RunFixture::new();
    let cache = ExecutionCache::new(fixture.path());

    run_cached(&fixture, &cache).await?;
    std::fs::write(fixture.sidecars.timeout_marker(), "300 seconds")?;
    std::fs::remove_file(fixture.sidecars.hash())?;

    let entry = run_cached(&fixture, &cache).await?;
    assert!(!entry.timed_out());
    assert!(!fixture.sidecars.timeout_marker().exists());
    Ok(())
}
