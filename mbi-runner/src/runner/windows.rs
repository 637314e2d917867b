// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    fs::File,
    io::{self, PipeReader},
    os::windows::{io::OwnedHandle, process::CommandExt},
    time::Duration,
};

const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

pub(super) fn pipe_reader_to_file(rx: PipeReader) -> File {
    File::from(OwnedHandle::from(rx))
}

/// A handle to the process tree rooted at a spawned child.
///
/// On Windows, the tree is walked by `taskkill /T`.
// TODO: assign the child to a job object so that descendants which outlive their parent are
// terminated too.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub(super) fn from_child(child: &tokio::process::Child) -> Option<Self> {
        child.id().map(|pid| Self { pid })
    }

    /// Returns the ID of the root process.
    pub fn id(&self) -> u32 {
        self.pid
    }

    /// Asks every process in the tree to terminate.
    pub fn signal_terminate(&self) -> io::Result<()> {
        taskkill(self.pid, false)
    }

    /// Terminates every process in the tree, forcibly after `grace_period`.
    pub async fn terminate_tree(&self, grace_period: Duration) {
        let pid = self.pid;
        if let Err(error) = taskkill(pid, false) {
            tracing::debug!("failed to ask process tree {pid} to terminate: {error}");
        }
        tokio::time::sleep(grace_period).await;
        if let Err(error) = taskkill(pid, true) {
            tracing::debug!("failed to kill process tree {pid}: {error}");
        }
    }

    /// Kills every process in the tree immediately.
    pub fn kill_tree(&self) -> io::Result<()> {
        taskkill(self.pid, true)
    }

    /// Returns true if the root process still exists.
    pub fn is_alive(&self) -> bool {
        let filter = format!("PID eq {}", self.pid);
        duct::cmd!("tasklist", "/FI", filter, "/NH")
            .stderr_null()
            .unchecked()
            .read()
            .is_ok_and(|out| out.split_whitespace().any(|word| word == self.pid.to_string()))
    }
}

fn taskkill(pid: u32, force: bool) -> io::Result<()> {
    let mut args = vec!["/T".to_owned()];
    if force {
        args.push("/F".to_owned());
    }
    args.push("/PID".to_owned());
    args.push(pid.to_string());
    // A non-zero exit means the tree is gone already.
    duct::cmd("taskkill", args)
        .stdout_null()
        .stderr_null()
        .unchecked()
        .run()
        .map(|_| ())
}
