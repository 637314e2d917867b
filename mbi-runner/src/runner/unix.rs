// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use libc::{SIGKILL, SIGTERM};
use std::{
    fs::File,
    io::{self, PipeReader},
    os::{fd::OwnedFd, unix::process::CommandExt},
    time::Duration,
};

/// Pre-execution configuration on Unix.
///
/// The child becomes the leader of a new process group, so that it and all of its descendants
/// can be signaled at once.
pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.process_group(0);
}

pub(super) fn pipe_reader_to_file(rx: PipeReader) -> File {
    File::from(OwnedFd::from(rx))
}

/// A handle to the process tree rooted at a spawned child.
///
/// On Unix, the tree is the process group the child leads.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProcessHandle {
    pgid: libc::pid_t,
}

impl ProcessHandle {
    pub(super) fn from_child(child: &tokio::process::Child) -> Option<Self> {
        // The child was spawned with process_group(0), so its pgid is its pid.
        child.id().map(|pid| Self {
            pgid: pid as libc::pid_t,
        })
    }

    /// Returns the ID of the process group.
    pub fn id(&self) -> u32 {
        self.pgid as u32
    }

    /// Asks every process in the tree to terminate.
    pub fn signal_terminate(&self) -> io::Result<()> {
        self.signal(SIGTERM)
    }

    /// Terminates every process in the tree: `SIGTERM`, then `SIGKILL` after `grace_period`.
    ///
    /// Processes that are already gone are not an error.
    pub async fn terminate_tree(&self, grace_period: Duration) {
        if let Err(error) = self.signal(SIGTERM) {
            tracing::debug!("failed to send SIGTERM to process group {}: {error}", self.pgid);
        }
        tokio::time::sleep(grace_period).await;
        if let Err(error) = self.signal(SIGKILL) {
            tracing::debug!("failed to send SIGKILL to process group {}: {error}", self.pgid);
        }
    }

    /// Kills every process in the tree immediately.
    pub fn kill_tree(&self) -> io::Result<()> {
        self.signal(SIGKILL)
    }

    /// Returns true if any process in the tree still exists.
    ///
    /// Zombies that were not reaped yet count as existing.
    pub fn is_alive(&self) -> bool {
        // Signal 0 performs the existence and permission checks without sending anything.
        match unsafe { libc::kill(-self.pgid, 0) } {
            0 => true,
            _ => io::Error::last_os_error().raw_os_error() == Some(libc::EPERM),
        }
    }

    fn signal(&self, signal: libc::c_int) -> io::Result<()> {
        if unsafe { libc::kill(-self.pgid, signal) } == 0 {
            return Ok(());
        }
        let error = io::Error::last_os_error();
        if error.raw_os_error() == Some(libc::ESRCH) {
            // The whole group is gone already.
            Ok(())
        } else {
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_tree_reaps_group() {
        let mut cmd = std::process::Command::new("sleep");
        cmd.arg("30");
        set_process_group(&mut cmd);
        let mut child = tokio::process::Command::from(cmd)
            .kill_on_drop(true)
            .spawn()
            .expect("spawned sleep");
        let handle = ProcessHandle::from_child(&child).expect("child is running");
        assert!(handle.is_alive());

        handle.terminate_tree(Duration::from_millis(50)).await;
        child.wait().await.expect("reaped sleep");
        assert!(!handle.is_alive(), "process group {} survived", handle.id());

        // Signaling a group that is gone is not an error.
        handle.kill_tree().expect("no error for a dead group");
    }
}
